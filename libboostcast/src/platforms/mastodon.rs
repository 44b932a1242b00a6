//! Mastodon platform implementation
//!
//! Talks to Mastodon and other Fediverse servers implementing the Mastodon
//! API through the megalodon library. Boosting maps to `reblog_status`,
//! direct messages are `direct`-visibility statuses that reach the bot as
//! mention notifications; a handled message is removed from the inbox by
//! dismissing its notification.

use std::sync::Arc;

use async_trait::async_trait;
use megalodon::entities::{Account, StatusVisibility};
use megalodon::megalodon::PostStatusInputOptions;
use megalodon::{Megalodon, SNS};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, UpstreamError};
use crate::platforms::{ApiConnector, AuthorizationProvider, SocialApi};
use crate::types::{
    CredentialPair, DirectMessage, PostId, PostView, SourcePost, SubscriberId, UserProfile,
};

const USER_AGENT: &str = concat!("boostcast/", env!("CARGO_PKG_VERSION"));

/// Ensure the instance URL carries a scheme and no trailing slash
pub fn normalize_instance_url(instance: &str) -> String {
    let trimmed = instance.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// One authenticated Mastodon account
pub struct MastodonApi {
    client: Box<dyn Megalodon + Send + Sync>,
}

impl MastodonApi {
    /// Create a client acting as the account the token belongs to
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use libboostcast::platforms::mastodon::MastodonApi;
    /// use libboostcast::platforms::SocialApi;
    ///
    /// # async fn example() -> libboostcast::error::Result<()> {
    /// let api = MastodonApi::new("https://mastodon.social", "bot-access-token")?;
    /// let me = api.verify_credentials().await?;
    /// println!("Acting as @{}", me.handle);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(instance_url: &str, access_token: &str) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            normalize_instance_url(instance_url),
            Some(access_token.to_string()),
            Some(USER_AGENT.to_string()),
        )
        .map_err(|e| map_megalodon_error(e, "create client"))?;

        Ok(Self { client })
    }
}

fn profile_of(account: Account) -> UserProfile {
    UserProfile {
        id: SubscriberId::from(account.id),
        handle: account.acct,
        display_name: account.display_name,
    }
}

#[async_trait]
impl SocialApi for MastodonApi {
    async fn verify_credentials(&self) -> Result<UserProfile> {
        let response = self
            .client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "verify credentials"))?;

        Ok(profile_of(response.json))
    }

    async fn fetch_user(&self, id: &SubscriberId) -> Result<UserProfile> {
        let response = self
            .client
            .get_account(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "fetch account"))?;

        Ok(profile_of(response.json))
    }

    async fn recent_posts(&self, account: &SubscriberId) -> Result<Vec<SourcePost>> {
        let response = self
            .client
            .get_account_statuses(account.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "fetch account statuses"))?;

        Ok(response
            .json
            .into_iter()
            .map(|status| SourcePost {
                id: PostId::from(status.id),
                text: plain_text(&status.content),
            })
            .collect())
    }

    async fn fetch_post(&self, id: &PostId) -> Result<PostView> {
        let response = self
            .client
            .get_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "fetch status"))?;

        Ok(PostView {
            id: id.clone(),
            reshared: response.json.reblogged.unwrap_or(false),
        })
    }

    async fn reshare(&self, id: &PostId) -> Result<()> {
        self.client
            .reblog_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "reblog status"))?;

        Ok(())
    }

    async fn follow(&self, id: &SubscriberId) -> Result<()> {
        self.client
            .follow_account(id.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "follow account"))?;

        Ok(())
    }

    async fn direct_messages(&self) -> Result<Vec<DirectMessage>> {
        let response = self
            .client
            .get_notifications(None)
            .await
            .map_err(|e| map_megalodon_error(e, "fetch notifications"))?;

        Ok(response
            .json
            .into_iter()
            .filter_map(|notification| {
                let status = notification.status?;
                if !matches!(status.visibility, StatusVisibility::Direct) {
                    return None;
                }
                Some(DirectMessage {
                    id: notification.id,
                    sender: SubscriberId::from(status.account.id),
                    text: message_body(&status.content),
                })
            })
            .collect())
    }

    async fn send_direct_message(&self, to: &SubscriberId, text: &str) -> Result<()> {
        let recipient = self.fetch_user(to).await?;
        let options = PostStatusInputOptions {
            visibility: Some(StatusVisibility::Direct),
            ..Default::default()
        };

        self.client
            .post_status(format!("@{} {}", recipient.handle, text), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "send direct message"))?;

        Ok(())
    }

    async fn delete_direct_message(&self, id: &str) -> Result<()> {
        self.client
            .dismiss_notification(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "dismiss notification"))?;

        Ok(())
    }
}

/// Builds `MastodonApi` handles for one instance
#[derive(Debug, Clone)]
pub struct MastodonConnector {
    instance_url: String,
}

impl MastodonConnector {
    pub fn new(instance_url: &str) -> Self {
        Self {
            instance_url: normalize_instance_url(instance_url),
        }
    }
}

impl ApiConnector for MastodonConnector {
    fn connect(&self, credentials: &CredentialPair) -> Result<Arc<dyn SocialApi>> {
        let api = MastodonApi::new(&self.instance_url, credentials.access_token())?;
        Ok(Arc::new(api))
    }
}

/// OAuth authorization-code flow against a Mastodon instance
pub struct MastodonAuthorizer {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl MastodonAuthorizer {
    /// Create an authorizer for an application already registered on the instance
    pub fn new(
        instance_url: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        scopes: Vec<String>,
    ) -> Result<Self> {
        let instance_url = normalize_instance_url(instance_url);
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            None,
            Some(USER_AGENT.to_string()),
        )
        .map_err(|e| map_megalodon_error(e, "create client"))?;

        Ok(Self {
            client,
            instance_url,
            client_id: client_id.to_string(),
            client_secret: SecretString::from(client_secret.to_string()),
            redirect_uri: redirect_uri.to_string(),
            scopes,
        })
    }
}

#[async_trait]
impl AuthorizationProvider for MastodonAuthorizer {
    fn authorize_url(&self) -> Result<String> {
        build_authorize_url(
            &self.instance_url,
            &self.client_id,
            &self.redirect_uri,
            &self.scopes,
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<CredentialPair> {
        let token = self
            .client
            .fetch_access_token(
                self.client_id.clone(),
                self.client_secret.expose_secret().to_string(),
                code.to_string(),
                self.redirect_uri.clone(),
            )
            .await
            .map_err(|e| map_megalodon_error(e, "fetch access token"))?;

        Ok(CredentialPair::new(
            token.access_token,
            token.refresh_token.unwrap_or_default(),
        ))
    }
}

fn build_authorize_url(
    instance_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
) -> Result<String> {
    let scope = scopes.join(" ");
    let url = url::Url::parse_with_params(
        &format!("{}/oauth/authorize", instance_url),
        &[
            ("client_id", client_id),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
        ],
    )
    .map_err(|e| UpstreamError::Transient(format!("Invalid instance URL {}: {}", instance_url, e)))?;

    Ok(url.to_string())
}

/// Reduce status HTML to plain text
///
/// Tags are dropped, paragraph and line breaks become spaces, and the common
/// entities are decoded.
pub fn plain_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag.trim_start_matches('/').to_ascii_lowercase();
                if name.starts_with("br") || name.starts_with('p') {
                    text.push(' ');
                }
            }
            _ if in_tag => tag.push(c),
            _ => text.push(c),
        }
    }

    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of a direct message without the mentions that address it
fn message_body(html: &str) -> String {
    plain_text(html)
        .split_whitespace()
        .filter(|word| !word.starts_with('@'))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map megalodon errors to UpstreamError
///
/// # Error Mapping
///
/// - HTTP 401 → `UpstreamError::CredentialInvalid` (token revoked or expired)
/// - HTTP 429 → `UpstreamError::RateLimited`
/// - Any other status → `UpstreamError::Transient`
/// - No status: token/authorization wording → `CredentialInvalid`,
///   rate-limit wording → `RateLimited`, everything else → `Transient`
fn map_megalodon_error<E: std::fmt::Display>(error: E, context: &str) -> UpstreamError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    match extract_http_status(&error_str) {
        Some(401) => UpstreamError::CredentialInvalid(format!(
            "Mastodon rejected the access token ({}): {}",
            context, error_str
        )),
        Some(429) => UpstreamError::RateLimited(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(code) => UpstreamError::Transient(format!(
            "Mastodon HTTP {} ({}): {}",
            code, context, error_str
        )),
        None => {
            if error_lower.contains("unauthorized")
                || error_lower.contains("invalid or expired token")
                || error_lower.contains("access token was revoked")
                || error_lower.contains("access token is invalid")
            {
                UpstreamError::CredentialInvalid(format!(
                    "Mastodon rejected the access token ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit")
                || error_lower.contains("too many requests")
            {
                UpstreamError::RateLimited(format!(
                    "Mastodon rate limit exceeded ({}): {}",
                    context, error_str
                ))
            } else {
                UpstreamError::Transient(format!("Mastodon error ({}): {}", context, error_str))
            }
        }
    }
}

/// Extract HTTP status code from error message
///
/// Looks for patterns like "HTTP 401", "status 403", "code: 429" or a
/// standalone three-digit code followed by a colon or space.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        let is_code = window[..3].iter().all(u8::is_ascii_digit)
            && (window[3] == b':' || window[3] == b' ')
            && (i == 0 || !bytes[i - 1].is_ascii_digit());
        if !is_code {
            continue;
        }
        if let Some(code) = std::str::from_utf8(&window[..3])
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            if (100..=599).contains(&code) {
                return Some(code);
            }
        }
    }

    None
}
