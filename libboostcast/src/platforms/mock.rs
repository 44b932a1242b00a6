//! Mock platform implementation for testing
//!
//! `MockNetwork` simulates a small Mastodon instance in memory: accounts with
//! access tokens, timelines, boosts, follows and direct messages. Handles
//! created by `MockConnector` act as whichever account owns the token, and
//! every call is recorded so tests can assert on fan-out behaviour without
//! network access.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Result, UpstreamError};
use crate::platforms::{ApiConnector, AuthorizationProvider, SocialApi};
use crate::types::{
    CredentialPair, DirectMessage, PostId, PostView, SourcePost, SubscriberId, UserProfile,
};

/// Callback run when an account fetches a post, before the fetch completes
pub type FetchHook = Arc<dyn Fn(&SubscriberId, &PostId) + Send + Sync>;

/// A direct message sent through the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub from: SubscriberId,
    pub to: SubscriberId,
    pub text: String,
}

#[derive(Default)]
struct World {
    users: HashMap<SubscriberId, UserProfile>,
    tokens: HashMap<String, SubscriberId>,
    revoked: HashSet<String>,
    failing: HashMap<String, UpstreamError>,
    timelines: HashMap<SubscriberId, Vec<SourcePost>>,
    poll_failures: Vec<UpstreamError>,
    reshared: HashSet<(SubscriberId, PostId)>,
    fetch_calls: Vec<(SubscriberId, PostId)>,
    reshare_calls: Vec<(SubscriberId, PostId)>,
    poll_calls: usize,
    follows: Vec<(SubscriberId, SubscriberId)>,
    inboxes: HashMap<SubscriberId, Vec<DirectMessage>>,
    next_message_id: u64,
    sent: Vec<SentMessage>,
    deleted: Vec<String>,
    auth_codes: HashMap<String, CredentialPair>,
    fetch_hook: Option<FetchHook>,
}

/// Shared in-memory instance
#[derive(Clone, Default)]
pub struct MockNetwork {
    world: Arc<Mutex<World>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an account reachable with the given token
    pub fn add_account(&self, id: &str, handle: &str, token: &str) -> CredentialPair {
        let id = SubscriberId::from(id);
        let mut world = self.world();
        world.users.insert(
            id.clone(),
            UserProfile {
                id: id.clone(),
                handle: handle.to_string(),
                display_name: handle.to_string(),
            },
        );
        world.tokens.insert(token.to_string(), id);
        CredentialPair::new(token, format!("{}-refresh", token))
    }

    /// Make every call with this token fail as revoked
    pub fn revoke_token(&self, token: &str) {
        self.world().revoked.insert(token.to_string());
    }

    /// Make every call with this token fail with the given error
    pub fn fail_token(&self, token: &str, error: UpstreamError) {
        self.world().failing.insert(token.to_string(), error);
    }

    /// Publish a post on an account's timeline
    pub fn publish(&self, account: &str, post_id: &str, text: &str) {
        self.world()
            .timelines
            .entry(SubscriberId::from(account))
            .or_default()
            .push(SourcePost {
                id: PostId::from(post_id),
                text: text.to_string(),
            });
    }

    /// Fail the next timeline fetch with the given error
    pub fn fail_next_poll(&self, error: UpstreamError) {
        self.world().poll_failures.push(error);
    }

    /// Mark a post as already boosted by an account (e.g. by hand)
    pub fn mark_reshared(&self, account: &str, post_id: &str) {
        self.world()
            .reshared
            .insert((SubscriberId::from(account), PostId::from(post_id)));
    }

    pub fn set_fetch_hook(&self, hook: FetchHook) {
        self.world().fetch_hook = Some(hook);
    }

    /// Deliver a direct message into an account's inbox and return its id
    pub fn deliver_message(&self, to: &str, from: &str, text: &str) -> String {
        let mut world = self.world();
        world.next_message_id += 1;
        let id = format!("dm-{}", world.next_message_id);
        world
            .inboxes
            .entry(SubscriberId::from(to))
            .or_default()
            .push(DirectMessage {
                id: id.clone(),
                sender: SubscriberId::from(from),
                text: text.to_string(),
            });
        id
    }

    /// Register an authorization code the authorizer will accept
    pub fn add_auth_code(&self, code: &str, credentials: CredentialPair) {
        self.world()
            .auth_codes
            .insert(code.to_string(), credentials);
    }

    pub fn reshare_calls(&self) -> Vec<(SubscriberId, PostId)> {
        self.world().reshare_calls.clone()
    }

    pub fn fetch_calls(&self) -> Vec<(SubscriberId, PostId)> {
        self.world().fetch_calls.clone()
    }

    pub fn poll_calls(&self) -> usize {
        self.world().poll_calls
    }

    pub fn has_reshared(&self, account: &str, post_id: &str) -> bool {
        self.world()
            .reshared
            .contains(&(SubscriberId::from(account), PostId::from(post_id)))
    }

    pub fn follows(&self) -> Vec<(SubscriberId, SubscriberId)> {
        self.world().follows.clone()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.world().sent.clone()
    }

    pub fn deleted_messages(&self) -> Vec<String> {
        self.world().deleted.clone()
    }

    pub fn inbox(&self, account: &str) -> Vec<DirectMessage> {
        self.world()
            .inboxes
            .get(&SubscriberId::from(account))
            .cloned()
            .unwrap_or_default()
    }

    /// Handle acting as the owner of the token
    pub fn api(&self, token: &str) -> MockApi {
        MockApi {
            network: self.clone(),
            token: token.to_string(),
        }
    }
}

/// Handle acting as one mock account
pub struct MockApi {
    network: MockNetwork,
    token: String,
}

impl MockApi {
    fn account(&self, world: &World) -> Result<SubscriberId> {
        if world.revoked.contains(&self.token) {
            return Err(UpstreamError::CredentialInvalid("Invalid or expired token".to_string()).into());
        }
        if let Some(error) = world.failing.get(&self.token) {
            return Err(error.clone().into());
        }
        world
            .tokens
            .get(&self.token)
            .cloned()
            .ok_or_else(|| UpstreamError::CredentialInvalid("Unknown access token".to_string()).into())
    }

    fn profile(world: &World, id: &SubscriberId) -> Result<UserProfile> {
        world
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| UpstreamError::Transient(format!("HTTP 404 account {} not found", id)).into())
    }
}

#[async_trait]
impl SocialApi for MockApi {
    async fn verify_credentials(&self) -> Result<UserProfile> {
        let world = self.network.world();
        let me = self.account(&world)?;
        Self::profile(&world, &me)
    }

    async fn fetch_user(&self, id: &SubscriberId) -> Result<UserProfile> {
        let world = self.network.world();
        self.account(&world)?;
        Self::profile(&world, id)
    }

    async fn recent_posts(&self, account: &SubscriberId) -> Result<Vec<SourcePost>> {
        let mut world = self.network.world();
        world.poll_calls += 1;
        if !world.poll_failures.is_empty() {
            return Err(world.poll_failures.remove(0).into());
        }
        self.account(&world)?;
        let mut posts = world.timelines.get(account).cloned().unwrap_or_default();
        posts.reverse();
        Ok(posts)
    }

    async fn fetch_post(&self, id: &PostId) -> Result<PostView> {
        let (me, hook) = {
            let mut world = self.network.world();
            let me = self.account(&world);
            if let Ok(me) = &me {
                world.fetch_calls.push((me.clone(), id.clone()));
            }
            (me?, world.fetch_hook.clone())
        };

        if let Some(hook) = hook {
            hook(&me, id);
        }

        let world = self.network.world();
        Ok(PostView {
            id: id.clone(),
            reshared: world.reshared.contains(&(me, id.clone())),
        })
    }

    async fn reshare(&self, id: &PostId) -> Result<()> {
        let mut world = self.network.world();
        let me = self.account(&world)?;
        world.reshare_calls.push((me.clone(), id.clone()));
        world.reshared.insert((me, id.clone()));
        Ok(())
    }

    async fn follow(&self, id: &SubscriberId) -> Result<()> {
        let mut world = self.network.world();
        let me = self.account(&world)?;
        if &me == id {
            return Err(UpstreamError::Transient("HTTP 403 You can't follow yourself".to_string()).into());
        }
        world.follows.push((me, id.clone()));
        Ok(())
    }

    async fn direct_messages(&self) -> Result<Vec<DirectMessage>> {
        let world = self.network.world();
        let me = self.account(&world)?;
        let mut messages = world.inboxes.get(&me).cloned().unwrap_or_default();
        messages.reverse();
        Ok(messages)
    }

    async fn send_direct_message(&self, to: &SubscriberId, text: &str) -> Result<()> {
        let mut world = self.network.world();
        let me = self.account(&world)?;
        Self::profile(&world, to)?;
        world.sent.push(SentMessage {
            from: me,
            to: to.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_direct_message(&self, id: &str) -> Result<()> {
        let mut world = self.network.world();
        let me = self.account(&world)?;
        if let Some(inbox) = world.inboxes.get_mut(&me) {
            inbox.retain(|m| m.id != id);
        }
        world.deleted.push(id.to_string());
        Ok(())
    }
}

/// Connector handing out `MockApi` handles
#[derive(Clone)]
pub struct MockConnector {
    network: MockNetwork,
}

impl MockConnector {
    pub fn new(network: MockNetwork) -> Self {
        Self { network }
    }
}

impl ApiConnector for MockConnector {
    fn connect(&self, credentials: &CredentialPair) -> Result<Arc<dyn SocialApi>> {
        Ok(Arc::new(self.network.api(credentials.access_token())))
    }
}

/// Authorizer accepting the codes registered with `MockNetwork::add_auth_code`
#[derive(Clone)]
pub struct MockAuthorizer {
    network: MockNetwork,
}

impl MockAuthorizer {
    pub fn new(network: MockNetwork) -> Self {
        Self { network }
    }
}

#[async_trait]
impl AuthorizationProvider for MockAuthorizer {
    fn authorize_url(&self) -> Result<String> {
        Ok("https://mock.example/oauth/authorize?client_id=mock".to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<CredentialPair> {
        self.network
            .world()
            .auth_codes
            .get(code)
            .cloned()
            .ok_or_else(|| UpstreamError::CredentialInvalid(format!("Unknown authorization code {}", code)).into())
    }
}
