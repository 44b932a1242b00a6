//! Upstream platform abstraction and implementations
//!
//! The bot talks to a Mastodon-API instance through three seams:
//!
//! - [`SocialApi`]: one authenticated handle, acting as a single account
//!   (the bot itself, the DM inbox account, or one subscriber)
//! - [`ApiConnector`]: turns a stored credential into such a handle
//! - [`AuthorizationProvider`]: the OAuth consent exchange used by the web flow
//!
//! Implementations must report failures as [`UpstreamError`] variants so the
//! dispatch loop can tell a revoked credential (remove the subscriber) from
//! rate limiting (back off) from anything else (log and move on).
//!
//! # Examples
//!
//! ```no_run
//! use libboostcast::platforms::{ApiConnector, mastodon::MastodonConnector};
//! use libboostcast::types::{CredentialPair, PostId};
//!
//! # async fn example() -> libboostcast::error::Result<()> {
//! let connector = MastodonConnector::new("https://fosstodon.org");
//! let api = connector.connect(&CredentialPair::new("access-token", ""))?;
//!
//! let post = PostId::from("109876543210");
//! if !api.fetch_post(&post).await?.reshared {
//!     api.reshare(&post).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`UpstreamError`]: crate::error::UpstreamError

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    CredentialPair, DirectMessage, PostId, PostView, SourcePost, SubscriberId, UserProfile,
};

pub mod mastodon;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// An authenticated connection acting as one account
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// Profile of the account this handle acts as
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::CredentialInvalid` when the credential was
    /// revoked or has expired.
    async fn verify_credentials(&self) -> Result<UserProfile>;

    /// Profile of any account by id
    async fn fetch_user(&self, id: &SubscriberId) -> Result<UserProfile>;

    /// Most recent posts of an account, newest first
    ///
    /// Returns one page of the account's timeline as the instance serves it
    /// by default.
    async fn recent_posts(&self, account: &SubscriberId) -> Result<Vec<SourcePost>>;

    /// A post as seen by this handle's account
    ///
    /// The returned view tells whether this account already boosted the post,
    /// for example manually through its own client.
    async fn fetch_post(&self, id: &PostId) -> Result<PostView>;

    /// Boost a post as this handle's account
    async fn reshare(&self, id: &PostId) -> Result<()>;

    /// Follow another account
    async fn follow(&self, id: &SubscriberId) -> Result<()>;

    /// Direct messages waiting in this account's inbox, newest first
    async fn direct_messages(&self) -> Result<Vec<DirectMessage>>;

    /// Send a private message to an account
    async fn send_direct_message(&self, to: &SubscriberId, text: &str) -> Result<()>;

    /// Remove a handled message from the inbox
    async fn delete_direct_message(&self, id: &str) -> Result<()>;
}

/// Builds per-account handles from stored credentials
///
/// Connecting does not talk to the network; an invalid credential surfaces
/// on the first call made with the returned handle.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, credentials: &CredentialPair) -> Result<Arc<dyn SocialApi>>;
}

/// The consent side of the OAuth flow
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// URL the user is redirected to in order to grant access
    fn authorize_url(&self) -> Result<String>;

    /// Exchange the code returned to the redirect URI for a durable credential
    async fn exchange_code(&self, code: &str) -> Result<CredentialPair>;
}
