//! Completing an authorization
//!
//! Once a user granted access, the new credential is stored and a few
//! courtesy actions follow: mutual follows with the bot, a welcome message
//! and a notice to the bot account and the admins. Only storing the
//! credential can fail the registration; the rest is best effort.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::messages::Texts;
use crate::platforms::{ApiConnector, SocialApi};
use crate::registry::LevelPolicy;
use crate::state::BotState;
use crate::types::{CredentialPair, PreferenceLevel, SubscriberId, UserProfile};

#[derive(Debug, Clone)]
pub struct OnboardingSettings {
    pub bot_account: SubscriberId,
    pub admins: Vec<SubscriberId>,
    pub level_policy: LevelPolicy,
    pub texts: Texts,
}

/// Register a freshly authorized account
///
/// Returns the subscriber's profile.
///
/// # Errors
///
/// Fails when the credential does not work (`verify_credentials`), in which
/// case nothing is stored.
pub async fn complete_authorization(
    state: &BotState,
    bot_api: &Arc<dyn SocialApi>,
    connector: &Arc<dyn ApiConnector>,
    credentials: CredentialPair,
    settings: &OnboardingSettings,
) -> Result<UserProfile> {
    let user_api = connector.connect(&credentials)?;
    let profile = user_api.verify_credentials().await?;

    let created = state.register(profile.id.clone(), credentials, settings.level_policy);
    let level = state.level_of(&profile.id).unwrap_or_default();
    info!(
        subscriber = %profile.id,
        handle = %profile.handle,
        new = created,
        "Saved authorization"
    );

    follow(user_api.as_ref(), &settings.bot_account).await;
    follow(bot_api.as_ref(), &profile.id).await;
    welcome(bot_api.as_ref(), &profile, level, settings).await;
    notify_new_subscriber(bot_api.as_ref(), &profile, settings).await;

    Ok(profile)
}

async fn follow(api: &dyn SocialApi, target: &SubscriberId) {
    match api.follow(target).await {
        Ok(()) => debug!(target = %target, "Followed"),
        Err(e) if e.to_string().contains("follow yourself") => {}
        Err(e) => warn!(target = %target, "Follow failed: {}", e),
    }
}

async fn welcome(
    bot_api: &dyn SocialApi,
    profile: &UserProfile,
    level: PreferenceLevel,
    settings: &OnboardingSettings,
) {
    let text = settings.texts.welcome(profile.name(), level);
    if let Err(e) = bot_api.send_direct_message(&profile.id, &text).await {
        warn!(subscriber = %profile.id, "Failed to send welcome message: {}", e);
    }
}

async fn notify_new_subscriber(
    bot_api: &dyn SocialApi,
    profile: &UserProfile,
    settings: &OnboardingSettings,
) {
    let mut recipients = vec![settings.bot_account.clone()];
    for admin in &settings.admins {
        if !recipients.contains(admin) {
            recipients.push(admin.clone());
        }
    }

    for recipient in recipients {
        let name = match bot_api.fetch_user(&recipient).await {
            Ok(user) => user.handle,
            Err(_) => recipient.to_string(),
        };
        let text = settings.texts.new_subscriber_notice(&name, profile);
        if let Err(e) = bot_api.send_direct_message(&recipient, &text).await {
            warn!(recipient = %recipient, "Failed to send new subscriber notice: {}", e);
        }
    }
}
