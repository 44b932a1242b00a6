//! Error types for Boostcast

use std::path::PathBuf;

use thiserror::Error;

use crate::types::SubscriberId;

pub type Result<T> = std::result::Result<T, BoostcastError>;

#[derive(Error, Debug)]
pub enum BoostcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Web server error: {0}")]
    Web(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BoostcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BoostcastError::Config(_) => 2,
            BoostcastError::Upstream(UpstreamError::CredentialInvalid(_)) => 3,
            BoostcastError::Upstream(_) => 1,
            BoostcastError::Storage(_) => 1,
            BoostcastError::Registry(_) => 1,
            BoostcastError::Web(_) => 1,
            BoostcastError::InvalidInput(_) => 1,
        }
    }

    /// True when the upstream rejected the credential the call was made with
    pub fn is_credential_invalid(&self) -> bool {
        matches!(
            self,
            BoostcastError::Upstream(UpstreamError::CredentialInvalid(_))
        )
    }

    /// True when the upstream asked us to slow down
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BoostcastError::Upstream(UpstreamError::RateLimited(_)))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("State file {path} is unreadable: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Failed to write state file {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Account {0} is not subscribed")]
    NotSubscribed(SubscriberId),

    #[error("Invalid preference level {0} (expected 1, 2 or 3)")]
    InvalidPreference(u8),
}

#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("Credential invalid or expired: {0}")]
    CredentialInvalid(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Upstream request failed: {0}")]
    Transient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let error = BoostcastError::Config(ConfigError::MissingField("bot.handle".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_credential_invalid() {
        let error: BoostcastError =
            UpstreamError::CredentialInvalid("token revoked".to_string()).into();
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_other_errors() {
        let rate: BoostcastError = UpstreamError::RateLimited("slow down".to_string()).into();
        assert_eq!(rate.exit_code(), 1);

        let registry: BoostcastError =
            RegistryError::NotSubscribed(SubscriberId::from("42")).into();
        assert_eq!(registry.exit_code(), 1);

        let storage: BoostcastError = StorageError::WriteFailed {
            path: PathBuf::from("/tmp/state.json"),
            reason: "permission denied".to_string(),
        }
        .into();
        assert_eq!(storage.exit_code(), 1);
    }

    #[test]
    fn test_error_classification() {
        let revoked: BoostcastError =
            UpstreamError::CredentialInvalid("401".to_string()).into();
        assert!(revoked.is_credential_invalid());
        assert!(!revoked.is_rate_limited());

        let limited: BoostcastError = UpstreamError::RateLimited("429".to_string()).into();
        assert!(limited.is_rate_limited());
        assert!(!limited.is_credential_invalid());

        let transient: BoostcastError = UpstreamError::Transient("503".to_string()).into();
        assert!(!transient.is_rate_limited());
        assert!(!transient.is_credential_invalid());
    }

    #[test]
    fn test_error_message_formatting() {
        let error: BoostcastError = RegistryError::InvalidPreference(7).into();
        assert_eq!(
            error.to_string(),
            "Registry error: Invalid preference level 7 (expected 1, 2 or 3)"
        );

        let error: BoostcastError =
            RegistryError::NotSubscribed(SubscriberId::from("1076914789")).into();
        assert_eq!(
            error.to_string(),
            "Registry error: Account 1076914789 is not subscribed"
        );

        let error = ConfigError::InvalidValue {
            field: "schedule.poll_interval".to_string(),
            reason: "must be greater than zero".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid value for schedule.poll_interval: must be greater than zero"
        );
    }

    #[test]
    fn test_upstream_error_clone() {
        let original = UpstreamError::Transient("Connection reset".to_string());
        let cloned = original.clone();
        assert_eq!(original.to_string(), cloned.to_string());
    }
}
