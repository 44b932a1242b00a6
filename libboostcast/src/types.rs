//! Core types for Boostcast

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RegistryError;

/// Identifiers arrive as strings from Mastodon-API instances but older state
/// files stored them as integers; both shapes are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                RawId::deserialize(deserializer).map(|raw| Self(raw.into_string()))
            }
        }
    };
}

string_id!(
    /// Stable account identifier on the upstream instance
    SubscriberId
);

string_id!(
    /// Identifier of a post in the source account's stream
    PostId
);

/// Delegated credential of a subscriber
///
/// Both halves are kept in `SecretString` so they are zeroed on drop and
/// redacted from `Debug` output. For the Mastodon backend the access token is
/// the OAuth bearer token and the secret slot carries the refresh token when
/// the instance issued one.
pub struct CredentialPair {
    access_token: SecretString,
    access_token_secret: SecretString,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, access_token_secret: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            access_token_secret: SecretString::from(access_token_secret.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn access_token_secret(&self) -> &str {
        self.access_token_secret.expose_secret()
    }
}

impl Clone for CredentialPair {
    fn clone(&self) -> Self {
        Self::new(self.access_token(), self.access_token_secret())
    }
}

impl PartialEq for CredentialPair {
    fn eq(&self, other: &Self) -> bool {
        self.access_token() == other.access_token()
            && self.access_token_secret() == other.access_token_secret()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"[REDACTED]")
            .field("access_token_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct RawCredentials {
    access_token: String,
    #[serde(default)]
    access_token_secret: String,
}

impl Serialize for CredentialPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawCredentials {
            access_token: self.access_token().to_string(),
            access_token_secret: self.access_token_secret().to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CredentialPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawCredentials::deserialize(deserializer)?;
        Ok(Self::new(raw.access_token, raw.access_token_secret))
    }
}

/// How selective a subscriber wants boosting to be
///
/// Stored and reported; dispatch does not filter on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PreferenceLevel {
    /// Only first-class posts
    Restrictive = 1,
    /// Informative posts
    #[default]
    Standard = 2,
    /// Everything the source account publishes
    Permissive = 3,
}

impl PreferenceLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PreferenceLevel {
    type Error = RegistryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PreferenceLevel::Restrictive),
            2 => Ok(PreferenceLevel::Standard),
            3 => Ok(PreferenceLevel::Permissive),
            other => Err(RegistryError::InvalidPreference(other)),
        }
    }
}

impl From<PreferenceLevel> for u8 {
    fn from(level: PreferenceLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for PreferenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(flatten)]
    pub credentials: CredentialPair,

    #[serde(default, alias = "retweet_level")]
    pub level: PreferenceLevel,

    /// Unix timestamp of the most recent authorization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_at: Option<i64>,
}

impl Subscriber {
    pub fn new(credentials: CredentialPair, level: PreferenceLevel) -> Self {
        Self {
            credentials,
            level,
            authorized_at: Some(chrono::Utc::now().timestamp()),
        }
    }
}

/// Monotonic counters reported to operators and admins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default, alias = "tweets")]
    pub posts_observed: u64,

    #[serde(default, alias = "retweets")]
    pub reshares_issued: u64,

    #[serde(default, alias = "sent_help_dm")]
    pub help_replies_sent: u64,

    #[serde(default, alias = "received_botcmds")]
    pub commands_executed: u64,
}

/// A post from the source account's timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePost {
    pub id: PostId,
    pub text: String,
}

/// A post as seen by one subscriber's account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostView {
    pub id: PostId,
    /// Whether this account already boosted the post
    pub reshared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: SubscriberId,
    /// Account handle without the leading `@`
    pub handle: String,
    pub display_name: String,
}

impl UserProfile {
    /// Display name, falling back to the handle when the account has none
    pub fn name(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.handle
        } else {
            &self.display_name
        }
    }
}

/// An inbound direct message addressed to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub id: String,
    pub sender: SubscriberId,
    pub text: String,
}
