//! boost-bot - Boost a source account's posts through every subscriber
//!
//! Runs the dispatch loop, the direct-message command loop and the web
//! authorization flow side by side until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libboostcast::commands::{subscriber_lines, CommandHandler, CommandSettings};
use libboostcast::config::Config;
use libboostcast::dispatch::{CycleReport, DispatchSettings, Dispatcher};
use libboostcast::logging::{LogFormat, LoggingConfig};
use libboostcast::messages::Texts;
use libboostcast::oauth::{self, OAuthContext};
use libboostcast::onboarding::OnboardingSettings;
use libboostcast::platforms::mastodon::{MastodonAuthorizer, MastodonConnector};
use libboostcast::platforms::{ApiConnector, SocialApi};
use libboostcast::{BotState, CredentialPair, Result, StateStore};
use secrecy::ExposeSecret;
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "boost-bot")]
#[command(version)]
#[command(about = "Boost a source account's posts through every subscriber")]
#[command(long_about = "\
boost-bot - Boost a source account's posts through every subscriber

DESCRIPTION:
    boost-bot watches one source account on a Mastodon-API instance and
    boosts each new post through the accounts of everybody who authorized
    the app. Users join through the web flow at /oauth/start and manage
    their subscription by direct message:

        help           - current boost level and instructions
        set-level:<n>  - choose a boost level (1, 2 or 3)
        get-info       - statistics (bot account and admins only)

USAGE:
    # Run in foreground (logs to stderr, transcript to stdout)
    boost-bot

    # Print the subscriber list after every round
    boost-bot --account-list

    # One dispatch round and one command pass, then exit
    boost-bot --once --no-web

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current round)

CONFIGURATION:
    Configuration file: ~/.config/boostcast/config.toml
    State file:         ~/.local/share/boostcast/state.json

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
    3 - Bot credential rejected by the instance
")]
struct Cli {
    /// Configuration file (default: ~/.config/boostcast/config.toml)
    #[arg(short, long, value_name = "PATH", env = "BOOSTCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT", env = "BOOSTCAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Print the saved subscriber list after every round
    #[arg(short, long)]
    account_list: bool,

    /// Run one dispatch round and one command pass, then exit
    #[arg(long)]
    once: bool,

    /// Do not start the web authorization flow
    #[arg(long)]
    no_web: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig {
        format: cli.log_format,
        verbose: cli.verbose,
        ..LoggingConfig::from_env()
    }
    .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    println!("Starting {} {}", config.bot.app_name, VERSION);

    let state = BotState::open(StateStore::new(config.database_path()));
    let connector: Arc<dyn ApiConnector> = Arc::new(MastodonConnector::new(&config.instance.url));

    let bot_api = connector.connect(&CredentialPair::new(
        config.bot.access_token.expose_secret(),
        config
            .bot
            .access_token_secret
            .as_ref()
            .map(|s| s.expose_secret().to_string())
            .unwrap_or_default(),
    ))?;
    let dm_api: Arc<dyn SocialApi> = match &config.bot.dm_access_token {
        Some(token) => connector.connect(&CredentialPair::new(token.expose_secret(), ""))?,
        None => bot_api.clone(),
    };

    let bot_account = match &config.bot.account_id {
        Some(id) => id.clone(),
        None => bot_api.verify_credentials().await?.id,
    };
    info!(bot = %bot_account, "Bot account resolved");

    let texts = Texts {
        app_name: config.bot.app_name.clone(),
        bot_handle: config.bot.handle.clone(),
        authorize_url: config.web.start_url(),
    };

    let dispatcher = Dispatcher::new(
        state.clone(),
        bot_api.clone(),
        connector.clone(),
        DispatchSettings {
            source_account: config.bot.source_account.clone(),
            bot_account: bot_account.clone(),
            let_bot_account_boost: config.bot.let_bot_account_boost,
            poll_interval: config.schedule.poll_interval,
            rate_limit_backoff: config.schedule.rate_limit_backoff,
        },
    );

    let commands = CommandHandler::new(
        state.clone(),
        bot_api.clone(),
        dm_api,
        CommandSettings {
            bot_account: bot_account.clone(),
            admins: config.bot.admins.clone(),
            authorize_url: texts.authorize_url.clone(),
            bot_handle: texts.bot_handle.clone(),
            app_name: texts.app_name.clone(),
            app_version: VERSION.to_string(),
            command_interval: config.schedule.command_interval,
            rate_limit_backoff: config.schedule.rate_limit_backoff,
        },
    );

    if cli.once {
        let report = dispatcher.run_cycle().await?;
        print_round(&state, bot_api.as_ref(), report, cli.account_list).await;
        let handled = commands.poll_once().await?;
        info!("Handled {} command(s)", handled);
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let listener = if cli.no_web {
        None
    } else {
        Some(tokio::net::TcpListener::bind(config.web.listen.as_str()).await?)
    };

    let web = async {
        let Some(listener) = listener else {
            return Ok(());
        };

        let result: Result<()> = match MastodonAuthorizer::new(
            &config.instance.url,
            &config.instance.client_id,
            config.instance.client_secret.expose_secret(),
            &config.instance.redirect_uri,
            config.instance.scopes.clone(),
        ) {
            Ok(authorizer) => {
                let context = Arc::new(OAuthContext {
                    state: state.clone(),
                    bot_api: bot_api.clone(),
                    connector: connector.clone(),
                    authorizer: Arc::new(authorizer),
                    onboarding: OnboardingSettings {
                        bot_account: bot_account.clone(),
                        admins: config.bot.admins.clone(),
                        level_policy: config.registration.level_policy(),
                        texts: texts.clone(),
                    },
                    redirect_success: config.web.redirect_success.clone(),
                    redirect_canceled: config.web.redirect_canceled.clone(),
                    admin_contact: config.web.admin_contact.clone(),
                });
                oauth::serve(listener, oauth::router(context), shutdown.clone()).await
            }
            Err(e) => Err(e),
        };

        // Without the web flow nobody can join; stop the loops as well
        if result.is_err() {
            shutdown.store(true, Ordering::Relaxed);
        }
        result
    };

    let account_list = cli.account_list;
    let round_state = &state;
    let round_api = bot_api.as_ref();
    let (_, _, web_result) = tokio::join!(
        dispatcher.run(shutdown.clone(), move |report| {
            print_round(round_state, round_api, report, account_list)
        }),
        commands.run(shutdown.clone()),
        web,
    );

    state.persist()?;
    web_result?;

    info!("boost-bot stopped");
    Ok(())
}

/// Console transcript of one dispatch round
async fn print_round(
    state: &BotState,
    bot_api: &dyn SocialApi,
    report: CycleReport,
    account_list: bool,
) {
    let document = state.document();
    let stats = document.statistics;

    let accounts = if account_list {
        subscriber_lines(state, bot_api).await
    } else {
        Vec::new()
    };

    println!("======================================================================");
    println!("Round at {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{}", report);
    println!("Accounts: {}", document.subscribers.len());
    for line in &accounts {
        println!("{}", line);
    }
    println!("Posts: {}", stats.posts_observed);
    println!("Boosts: {}", stats.reshares_issued);
    println!("Sent help messages: {}", stats.help_replies_sent);
    println!("Executed bot commands: {}", stats.commands_executed);
    println!("----------------------------------------------------------------------");
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libboostcast::BoostcastError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}
