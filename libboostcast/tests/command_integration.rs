//! Integration tests for the direct-message command loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use libboostcast::commands::subscriber_lines;
use libboostcast::error::{BoostcastError, RegistryError};
use libboostcast::platforms::mock::MockNetwork;
use libboostcast::{
    BotState, Command, CommandHandler, CommandOutcome, CommandSettings, CredentialPair,
    LevelPolicy, PreferenceLevel, StateStore, SubscriberId,
};
use tempfile::TempDir;

const BOT: &str = "1";
const ADMIN: &str = "7";

struct TestEnv {
    temp_dir: TempDir,
    network: MockNetwork,
    state: BotState,
    handler: CommandHandler,
}

impl TestEnv {
    fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let network = MockNetwork::new();
        network.add_account(BOT, "boostbot", "bot-token");
        network.add_account(ADMIN, "admin", "admin-token");
        network.add_account("x", "stranger", "stranger-token");
        let state = BotState::open(StateStore::new(temp_dir.path().join("state.json")));

        let handler = CommandHandler::new(
            state.clone(),
            Arc::new(network.api("bot-token")),
            Arc::new(network.api("bot-token")),
            CommandSettings {
                bot_account: SubscriberId::from(BOT),
                admins: vec![SubscriberId::from(ADMIN)],
                authorize_url: "https://bot.example/oauth/start".to_string(),
                bot_handle: "boostbot".to_string(),
                app_name: "Boostcast".to_string(),
                app_version: "0.1.0".to_string(),
                command_interval: Duration::from_millis(50),
                rate_limit_backoff: Duration::from_millis(50),
            },
        );

        Ok(Self {
            temp_dir,
            network,
            state,
            handler,
        })
    }

    fn subscribe(&self, id: &str, handle: &str) {
        let credentials = self
            .network
            .add_account(id, handle, &format!("{}-token", handle));
        self.state.register(
            SubscriberId::from(id),
            credentials,
            LevelPolicy::PreserveOr(PreferenceLevel::Standard),
        );
    }

    fn replies_to(&self, id: &str) -> Vec<String> {
        self.network
            .sent_messages()
            .into_iter()
            .filter(|m| m.to.as_str() == id)
            .map(|m| m.text)
            .collect()
    }

    fn reload(&self) -> libboostcast::Document {
        StateStore::new(self.temp_dir.path().join("state.json")).load()
    }
}

#[tokio::test]
async fn test_set_level_for_known_subscriber() -> Result<()> {
    let env = TestEnv::new()?;
    env.subscribe("b", "bob");

    let outcome = env
        .handler
        .handle(&SubscriberId::from("b"), &Command::parse("set-level:3"))
        .await?;

    assert_eq!(outcome, CommandOutcome::LevelChanged(PreferenceLevel::Permissive));
    assert_eq!(
        env.state.level_of(&SubscriberId::from("b")),
        Some(PreferenceLevel::Permissive)
    );
    assert_eq!(env.state.statistics().commands_executed, 1);
    assert_eq!(
        env.reload().subscribers.level_of(&SubscriberId::from("b")),
        Some(PreferenceLevel::Permissive)
    );

    let replies = env.replies_to("b");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("Your new boost level is 3!"));

    Ok(())
}

#[tokio::test]
async fn test_set_level_for_unknown_account() -> Result<()> {
    let env = TestEnv::new()?;
    let stranger = SubscriberId::from("x");

    let err = env
        .handler
        .handle(&stranger, &Command::SetLevel(3))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BoostcastError::Registry(RegistryError::NotSubscribed(ref id)) if id == &stranger
    ));
    assert_eq!(env.state.statistics().commands_executed, 0);
    assert!(!env.state.is_subscribed(&stranger));
    assert!(env.replies_to("x")[0].contains("not subscribed"));

    Ok(())
}

#[tokio::test]
async fn test_set_level_out_of_range() -> Result<()> {
    let env = TestEnv::new()?;
    env.subscribe("b", "bob");

    let err = env
        .handler
        .handle(&SubscriberId::from("b"), &Command::parse("set-level:9"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BoostcastError::Registry(RegistryError::InvalidPreference(9))
    ));
    assert_eq!(
        env.state.level_of(&SubscriberId::from("b")),
        Some(PreferenceLevel::Standard)
    );
    assert_eq!(env.state.statistics().commands_executed, 0);
    assert!(env.replies_to("b")[0].contains("9 is not a valid boost level"));

    Ok(())
}

#[tokio::test]
async fn test_help_reports_current_level() -> Result<()> {
    let env = TestEnv::new()?;
    env.subscribe("b", "bob");

    let outcome = env
        .handler
        .handle(&SubscriberId::from("b"), &Command::Help)
        .await?;

    assert_eq!(outcome, CommandOutcome::HelpSent);
    assert_eq!(env.state.statistics().help_replies_sent, 1);
    assert_eq!(env.state.statistics().commands_executed, 0);
    let reply = &env.replies_to("b")[0];
    assert!(reply.starts_with("Hello bob!"));
    assert!(reply.contains("Your current boost level is 2!"));

    // Strangers get pointed to the authorization page instead
    env.handler
        .handle(&SubscriberId::from("x"), &Command::Help)
        .await?;
    assert!(env.replies_to("x")[0].contains("https://bot.example/oauth/start"));
    assert_eq!(env.state.statistics().help_replies_sent, 2);

    Ok(())
}

#[tokio::test]
async fn test_get_info_is_restricted() -> Result<()> {
    let env = TestEnv::new()?;
    env.subscribe("b", "bob");

    let refused = env
        .handler
        .handle(&SubscriberId::from("x"), &Command::GetInfo)
        .await?;
    assert_eq!(refused, CommandOutcome::Refused);
    assert!(env.replies_to("x").is_empty());
    assert_eq!(env.state.statistics().commands_executed, 0);

    let sent = env
        .handler
        .handle(&SubscriberId::from(ADMIN), &Command::GetInfo)
        .await?;
    assert_eq!(sent, CommandOutcome::InfoSent);
    assert_eq!(env.state.statistics().commands_executed, 1);

    let report = &env.replies_to(ADMIN)[0];
    assert!(report.contains("Bot: Boostcast 0.1.0"));
    assert!(report.contains("Accounts: 1"));
    assert!(report.contains("b - @bob - level: 2"));

    // The bot account itself may ask as well
    let own = env
        .handler
        .handle(&SubscriberId::from(BOT), &Command::GetInfo)
        .await?;
    assert_eq!(own, CommandOutcome::InfoSent);

    Ok(())
}

#[tokio::test]
async fn test_subscriber_lines_carry_handles() -> Result<()> {
    let env = TestEnv::new()?;
    env.subscribe("b", "bob");
    // Registered, but unknown to the instance
    env.state.register(
        SubscriberId::from("g"),
        CredentialPair::new("ghost-token", ""),
        LevelPolicy::Reset(PreferenceLevel::Permissive),
    );

    let api = env.network.api("bot-token");
    let lines = subscriber_lines(&env.state, &api).await;

    let rendered: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            "\tb - @bob - level: 2".to_string(),
            "\tg - @? - level: 3".to_string(),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_poll_handles_commands_oldest_first_and_deletes_them() -> Result<()> {
    let env = TestEnv::new()?;
    env.subscribe("b", "bob");
    env.network.deliver_message(BOT, "b", "help");
    let chatter = env.network.deliver_message(BOT, "b", "thanks for the boosts!");
    env.network.deliver_message(BOT, "b", "set-level:1");
    env.network.deliver_message(BOT, "x", "set-level:2");

    let handled = env.handler.poll_once().await?;

    assert_eq!(handled, 3);
    let inbox = env.network.inbox(BOT);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, chatter);
    assert_eq!(env.network.deleted_messages().len(), 3);

    let replies = env.replies_to("b");
    assert_eq!(replies.len(), 2);
    assert!(replies[0].contains("Your current boost level is 2!"));
    assert!(replies[1].contains("Your new boost level is 1!"));
    assert_eq!(
        env.state.level_of(&SubscriberId::from("b")),
        Some(PreferenceLevel::Restrictive)
    );

    let stats = env.state.statistics();
    assert_eq!(stats.help_replies_sent, 1);
    assert_eq!(stats.commands_executed, 1);

    // Nothing left to do on the next pass
    assert_eq!(env.handler.poll_once().await?, 0);

    Ok(())
}
