//! Direct-message command interface
//!
//! Users steer their subscription by messaging the bot. Messages are parsed
//! once into a closed [`Command`] set; anything outside it is left untouched
//! in the inbox. Every recognized message is deleted after it was handled,
//! whether handling succeeded or not, so a command never runs twice.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dispatch::sleep_unless_shutdown;
use crate::error::{BoostcastError, RegistryError, Result};
use crate::messages::{SubscriberLine, Texts};
use crate::platforms::SocialApi;
use crate::state::BotState;
use crate::types::{PreferenceLevel, SubscriberId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    GetInfo,
    SetLevel(u8),
    /// Normalized text of a message that is not a command
    Unrecognized(String),
}

impl Command {
    /// Parse a message body
    ///
    /// Whitespace anywhere in the text is ignored and matching is
    /// case-insensitive, so `" Set-Level: 3 "` is `SetLevel(3)`.
    pub fn parse(text: &str) -> Self {
        let normalized = text.split_whitespace().collect::<String>().to_lowercase();

        match normalized.as_str() {
            "help" => Command::Help,
            "get-info" => Command::GetInfo,
            other => other
                .strip_prefix("set-level:")
                .or_else(|| other.strip_prefix("set-rt-level:"))
                .and_then(|level| level.parse::<u8>().ok())
                .map(Command::SetLevel)
                .unwrap_or_else(|| Command::Unrecognized(normalized.clone())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Help => write!(f, "help"),
            Command::GetInfo => write!(f, "get-info"),
            Command::SetLevel(level) => write!(f, "set-level:{}", level),
            Command::Unrecognized(_) => write!(f, "unrecognized"),
        }
    }
}

/// Every subscriber with the handle looked up through `api`
///
/// A failed lookup leaves the handle empty instead of dropping the line.
pub async fn subscriber_lines(state: &BotState, api: &dyn SocialApi) -> Vec<SubscriberLine> {
    let mut lines = Vec::new();
    for (id, subscriber) in state.snapshot_subscribers() {
        let handle = match api.fetch_user(&id).await {
            Ok(profile) => Some(profile.handle),
            Err(e) => {
                debug!(account = %id, "Profile lookup failed: {}", e);
                None
            }
        };
        lines.push(SubscriberLine {
            id,
            handle,
            level: subscriber.level,
        });
    }
    lines
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    HelpSent,
    LevelChanged(PreferenceLevel),
    InfoSent,
    /// `get-info` from an account that may not see it
    Refused,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub bot_account: SubscriberId,
    pub admins: Vec<SubscriberId>,
    pub authorize_url: String,
    pub bot_handle: String,
    pub app_name: String,
    pub app_version: String,
    pub command_interval: Duration,
    pub rate_limit_backoff: Duration,
}

pub struct CommandHandler {
    state: BotState,
    /// Sends replies and looks up profiles
    bot_api: Arc<dyn SocialApi>,
    /// Reads and deletes the inbound messages
    dm_api: Arc<dyn SocialApi>,
    settings: CommandSettings,
    texts: Texts,
}

impl CommandHandler {
    pub fn new(
        state: BotState,
        bot_api: Arc<dyn SocialApi>,
        dm_api: Arc<dyn SocialApi>,
        settings: CommandSettings,
    ) -> Self {
        let texts = Texts {
            app_name: settings.app_name.clone(),
            bot_handle: settings.bot_handle.clone(),
            authorize_url: settings.authorize_url.clone(),
        };

        Self {
            state,
            bot_api,
            dm_api,
            settings,
            texts,
        }
    }

    fn may_get_info(&self, sender: &SubscriberId) -> bool {
        sender == &self.settings.bot_account || self.settings.admins.contains(sender)
    }

    async fn display_name(&self, id: &SubscriberId) -> String {
        match self.bot_api.fetch_user(id).await {
            Ok(profile) => profile.name().to_string(),
            Err(e) => {
                debug!(account = %id, "Profile lookup failed: {}", e);
                id.to_string()
            }
        }
    }

    async fn reply(&self, to: &SubscriberId, text: &str) -> Result<()> {
        self.bot_api.send_direct_message(to, text).await
    }

    /// Execute one command on behalf of `sender`
    ///
    /// # Errors
    ///
    /// `set-level` from an unknown account or with a level outside 1..=3
    /// returns the registry error after the user was told about it. Failed
    /// replies are returned as upstream errors.
    pub async fn handle(&self, sender: &SubscriberId, command: &Command) -> Result<CommandOutcome> {
        match command {
            Command::Help => {
                let name = self.display_name(sender).await;
                let text = self.texts.help(&name, self.state.level_of(sender));
                self.reply(sender, &text).await?;
                self.state.record_help_reply();
                Ok(CommandOutcome::HelpSent)
            }
            Command::SetLevel(raw) => self.set_level(sender, *raw).await,
            Command::GetInfo => {
                if !self.may_get_info(sender) {
                    info!(sender = %sender, "Received 'get-info' from unauthorized account");
                    return Ok(CommandOutcome::Refused);
                }
                self.send_info(sender).await?;
                self.state.record_command();
                Ok(CommandOutcome::InfoSent)
            }
            Command::Unrecognized(_) => Ok(CommandOutcome::Ignored),
        }
    }

    async fn set_level(&self, sender: &SubscriberId, raw: u8) -> Result<CommandOutcome> {
        let name = self.display_name(sender).await;

        match self.state.set_preference(sender, raw) {
            Ok(level) => {
                info!(subscriber = %sender, level = %level, "Boost level changed");
                self.reply(sender, &self.texts.level_changed(&name, level))
                    .await?;
                Ok(CommandOutcome::LevelChanged(level))
            }
            Err(e) => {
                let text = match &e {
                    RegistryError::NotSubscribed(_) => self.texts.not_subscribed(&name),
                    RegistryError::InvalidPreference(raw) => self.texts.invalid_level(&name, *raw),
                };
                if let Err(reply_error) = self.reply(sender, &text).await {
                    warn!(sender = %sender, "Failed to explain rejected command: {}", reply_error);
                }
                Err(e.into())
            }
        }
    }

    async fn send_info(&self, sender: &SubscriberId) -> Result<()> {
        let lines = subscriber_lines(&self.state, self.bot_api.as_ref()).await;
        let name = self.display_name(sender).await;
        let text = self.texts.info_report(
            &name,
            &self.settings.app_version,
            &lines,
            &self.state.statistics(),
        );
        self.reply(sender, &text).await
    }

    /// Handle every waiting command once, oldest first
    ///
    /// Returns how many messages were handled (and deleted).
    pub async fn poll_once(&self) -> Result<usize> {
        let mut messages = self.dm_api.direct_messages().await?;
        messages.reverse();

        let mut handled = 0;
        for message in messages {
            let command = Command::parse(&message.text);
            if let Command::Unrecognized(text) = &command {
                debug!(sender = %message.sender, text = %text, "Ignoring message that is not a command");
                continue;
            }

            info!(sender = %message.sender, command = %command, "Received command");
            match self.handle(&message.sender, &command).await {
                Ok(outcome) => debug!(?outcome, "Command handled"),
                Err(BoostcastError::Registry(e)) => {
                    info!(sender = %message.sender, "Command rejected: {}", e)
                }
                Err(e) => warn!(sender = %message.sender, command = %command, "Command failed: {}", e),
            }

            if let Err(e) = self.dm_api.delete_direct_message(&message.id).await {
                warn!(message = %message.id, "Failed to delete handled message: {}", e);
            }
            handled += 1;
        }

        Ok(handled)
    }

    /// Poll the inbox until `shutdown` is set
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            interval = ?self.settings.command_interval,
            "Command loop starting"
        );

        while !shutdown.load(Ordering::Relaxed) {
            let wait = match self.poll_once().await {
                Ok(handled) => {
                    if handled > 0 {
                        info!("Handled {} command(s)", handled);
                    }
                    self.settings.command_interval
                }
                Err(e) if e.is_rate_limited() => {
                    warn!(
                        "Rate limited while reading messages, backing off for {:?}: {}",
                        self.settings.rate_limit_backoff, e
                    );
                    self.settings.rate_limit_backoff
                }
                Err(e) => {
                    error!("Error reading direct messages: {}", e);
                    self.settings.command_interval
                }
            };

            sleep_unless_shutdown(wait, &shutdown).await;
        }

        info!("Command loop stopped");
    }
}
