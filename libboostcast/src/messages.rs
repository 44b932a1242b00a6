//! Texts sent to users in direct messages and on the web flow

use std::fmt;

use crate::types::{PreferenceLevel, Statistics, SubscriberId, UserProfile};

/// Values every user-facing text can mention
#[derive(Debug, Clone)]
pub struct Texts {
    pub app_name: String,
    pub bot_handle: String,
    /// Where users (re-)authorize the app
    pub authorize_url: String,
}

/// One line of the `get-info` subscriber list
#[derive(Debug, Clone)]
pub struct SubscriberLine {
    pub id: SubscriberId,
    /// `None` when the profile lookup failed
    pub handle: Option<String>,
    pub level: PreferenceLevel,
}

impl fmt::Display for SubscriberLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\t{} - @{} - level: {}",
            self.id,
            self.handle.as_deref().unwrap_or("?"),
            self.level
        )
    }
}

impl Texts {
    fn signature(&self) -> String {
        format!("Best regards,\nthe {} team", self.app_name)
    }

    fn level_menu(&self) -> String {
        format!(
            "To choose a boost level, send me a direct message with the text:\n\
             - 'set-level:1' to boost only first-class posts\n\
             - 'set-level:2' to boost informative posts\n\
             - 'set-level:3' to boost everything {} finds for you",
            self.app_name
        )
    }

    fn revoke_notice(&self) -> String {
        format!(
            "If you want to stop, revoke the authorization of {} in your account \
             settings. A revoked authorization is deleted on our side; to join again \
             you would have to authorize the app again on:\n{}",
            self.app_name, self.authorize_url
        )
    }

    /// Reply to `help`
    pub fn help(&self, name: &str, level: Option<PreferenceLevel>) -> String {
        match level {
            Some(level) => format!(
                "Hello {}!\n\n{}\n\n{}\n\nYour current boost level is {}!\n\n\
                 For further information send 'help' to @{}!\n\n{}",
                name,
                self.revoke_notice(),
                self.level_menu(),
                level,
                self.bot_handle,
                self.signature()
            ),
            None => format!(
                "Hello {}!\n\nYou are not subscribed to {} yet. Authorize the app on:\n{}\n\n\
                 Afterwards send 'help' to @{} to see what you can configure.\n\n{}",
                name, self.app_name, self.authorize_url, self.bot_handle, self.signature()
            ),
        }
    }

    /// First message after a completed authorization
    pub fn welcome(&self, name: &str, level: PreferenceLevel) -> String {
        format!(
            "Hello {}!\n\nThank you for joining {}!\n\n{}\n\n{}\n\n\
             Your current boost level is {}!\n\nFor further information send 'help' to @{}!\n\n{}",
            name,
            self.app_name,
            self.revoke_notice(),
            self.level_menu(),
            level,
            self.bot_handle,
            self.signature()
        )
    }

    pub fn level_changed(&self, name: &str, level: PreferenceLevel) -> String {
        format!(
            "Hello {}!\n\nYour new boost level is {}!\n\n{}",
            name, level, self.signature()
        )
    }

    pub fn not_subscribed(&self, name: &str) -> String {
        format!(
            "Hello {}!\n\nYou are not subscribed to {}, so there is no boost level to \
             change. Authorize the app first:\n{}\n\n{}",
            name, self.app_name, self.authorize_url, self.signature()
        )
    }

    pub fn invalid_level(&self, name: &str, raw: u8) -> String {
        format!(
            "Hello {}!\n\n{} is not a valid boost level.\n\n{}\n\n{}",
            name,
            raw,
            self.level_menu(),
            self.signature()
        )
    }

    /// Reply to `get-info`
    pub fn info_report(
        &self,
        name: &str,
        version: &str,
        subscribers: &[SubscriberLine],
        statistics: &Statistics,
    ) -> String {
        let mut report = format!("Bot: {} {}\n", self.app_name, version);
        report.push_str(&format!("Accounts: {}\n", subscribers.len()));
        for line in subscribers {
            report.push_str(&format!("{}\n", line));
        }
        report.push_str(&format!("Posts: {}\n", statistics.posts_observed));
        report.push_str(&format!("Boosts: {}\n", statistics.reshares_issued));
        report.push_str(&format!("Sent help messages: {}\n", statistics.help_replies_sent));
        report.push_str(&format!(
            "Executed bot commands: {}",
            statistics.commands_executed
        ));

        format!("Hello {}!\n\n{}\n\n{}", name, report, self.signature())
    }

    /// Sent to the bot account and the admins on every registration
    pub fn new_subscriber_notice(&self, recipient: &str, subscriber: &UserProfile) -> String {
        format!(
            "Hello {}!\n\nA new user subscribed to {}: {} - @{} ({})\n\n{}",
            recipient,
            self.app_name,
            subscriber.id,
            subscriber.handle,
            subscriber.name(),
            self.signature()
        )
    }

    /// HTML body shown when the web flow fails
    pub fn error_page(&self, admin_contact: Option<&str>) -> String {
        let mut page = format!(
            "Something went wrong! Please <a href='{}'>try again</a>",
            self.authorize_url
        );
        match admin_contact {
            Some(contact) => page.push_str(&format!(" or report to {}!", contact)),
            None => page.push('!'),
        }
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts() -> Texts {
        Texts {
            app_name: "Boostcast".to_string(),
            bot_handle: "boostbot".to_string(),
            authorize_url: "https://bot.example/oauth/start".to_string(),
        }
    }

    #[test]
    fn test_help_for_subscriber_mentions_level() {
        let text = texts().help("Alice", Some(PreferenceLevel::Permissive));
        assert!(text.starts_with("Hello Alice!"));
        assert!(text.contains("Your current boost level is 3!"));
        assert!(text.contains("set-level:1"));
        assert!(text.contains("@boostbot"));
    }

    #[test]
    fn test_help_for_stranger_points_to_authorization() {
        let text = texts().help("Bob", None);
        assert!(text.contains("not subscribed"));
        assert!(text.contains("https://bot.example/oauth/start"));
        assert!(!text.contains("current boost level"));
    }

    #[test]
    fn test_info_report_lists_subscribers_and_counters() {
        let statistics = Statistics {
            posts_observed: 4,
            reshares_issued: 7,
            help_replies_sent: 1,
            commands_executed: 2,
        };
        let lines = vec![
            SubscriberLine {
                id: SubscriberId::from("1"),
                handle: Some("alice".to_string()),
                level: PreferenceLevel::Standard,
            },
            SubscriberLine {
                id: SubscriberId::from("2"),
                handle: None,
                level: PreferenceLevel::Restrictive,
            },
        ];

        let text = texts().info_report("Admin", "0.1.0", &lines, &statistics);

        assert!(text.contains("Bot: Boostcast 0.1.0"));
        assert!(text.contains("Accounts: 2"));
        assert!(text.contains("\t1 - @alice - level: 2"));
        assert!(text.contains("\t2 - @? - level: 1"));
        assert!(text.contains("Boosts: 7"));
        assert!(text.contains("Executed bot commands: 2"));
    }

    #[test]
    fn test_signature_uses_configured_name() {
        let mut texts = texts();
        texts.app_name = "FediBoost".to_string();

        let text = texts.level_changed("Alice", PreferenceLevel::Standard);
        assert!(text.ends_with("Best regards,\nthe FediBoost team"));
        assert!(!text.contains("Boostcast"));
        assert!(texts.help("Bob", None).ends_with("the FediBoost team"));
    }

    #[test]
    fn test_error_page_with_and_without_contact() {
        let with = texts().error_page(Some("@admin@social.example"));
        assert!(with.contains("href='https://bot.example/oauth/start'"));
        assert!(with.ends_with("report to @admin@social.example!"));

        assert!(texts().error_page(None).ends_with("try again</a>!"));
    }
}
