//! Shared in-memory bot state
//!
//! The dispatch loop, the command loop and the web authorization flow all
//! work on one `Document`. `BotState` guards it with a single mutex; every
//! read-modify-persist sequence happens under one acquisition, and the guard
//! is never held across an `.await`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info};

use crate::error::{RegistryError, StorageError};
use crate::registry::LevelPolicy;
use crate::store::{Document, StateStore};
use crate::types::{CredentialPair, PostId, PreferenceLevel, Statistics, Subscriber, SubscriberId};

struct Inner {
    document: Document,
    in_flight: HashSet<PostId>,
    store: StateStore,
}

/// Cloneable handle to the shared document
#[derive(Clone)]
pub struct BotState {
    inner: Arc<Mutex<Inner>>,
}

impl BotState {
    /// Load the document from the store and wrap it
    pub fn open(store: StateStore) -> Self {
        let document = store.load();
        Self::with_document(store, document)
    }

    /// Wrap an already loaded document
    pub fn with_document(store: StateStore, document: Document) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                document,
                in_flight: HashSet::new(),
                store,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic in another holder leaves the document consistent: every
        // mutation is a single field update or map operation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clone of the whole document, for reporting
    pub fn document(&self) -> Document {
        self.lock().document.clone()
    }

    pub fn statistics(&self) -> Statistics {
        self.lock().document.statistics
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().document.subscribers.len()
    }

    pub fn seen_count(&self) -> usize {
        self.lock().document.posts.len()
    }

    pub fn has_seen(&self, id: &PostId) -> bool {
        self.lock().document.posts.has_seen(id)
    }

    pub fn is_subscribed(&self, id: &SubscriberId) -> bool {
        self.lock().document.subscribers.contains(id)
    }

    pub fn level_of(&self, id: &SubscriberId) -> Option<PreferenceLevel> {
        self.lock().document.subscribers.level_of(id)
    }

    /// Point-in-time copy of the registry used as the fan-out target set
    pub fn snapshot_subscribers(&self) -> Vec<(SubscriberId, Subscriber)> {
        self.lock().document.subscribers.snapshot()
    }

    /// Reserve a post for dispatch
    ///
    /// Returns `false` when the post is already in the ledger or another pass
    /// currently holds it. The check and the reservation happen under the
    /// same lock.
    pub fn begin_post(&self, id: &PostId) -> bool {
        let mut inner = self.lock();
        if inner.document.posts.has_seen(id) || inner.in_flight.contains(id) {
            return false;
        }
        inner.in_flight.insert(id.clone());
        true
    }

    /// Mark a reserved post as processed and persist
    ///
    /// The posts-observed counter moves only when the post enters the ledger
    /// for the first time.
    pub fn commit_post(&self, id: &PostId) {
        let mut inner = self.lock();
        inner.in_flight.remove(id);
        if inner.document.posts.mark_seen(id.clone()) {
            inner.document.statistics.posts_observed += 1;
        }
        Self::persist_locked(&inner);
    }

    /// Release a reservation without marking the post
    pub fn abandon_post(&self, id: &PostId) {
        self.lock().in_flight.remove(id);
    }

    /// Count one successful boost; persisted with the post commit
    pub fn record_reshare(&self) {
        self.lock().document.statistics.reshares_issued += 1;
    }

    /// Drop a subscriber whose credential is no longer accepted
    ///
    /// Persists immediately so the credential is never tried again, even if
    /// the process dies before the current pass completes.
    pub fn revoke(&self, id: &SubscriberId) -> bool {
        let mut inner = self.lock();
        let removed = inner.document.subscribers.remove(id).is_some();
        if removed {
            info!(subscriber = %id, "Removed subscriber with invalid or expired credential");
            Self::persist_locked(&inner);
        } else {
            debug!(subscriber = %id, "Revocation for unknown subscriber ignored");
        }
        removed
    }

    /// Store a freshly authorized credential
    ///
    /// Returns `true` for a first-time registration.
    pub fn register(
        &self,
        id: SubscriberId,
        credentials: CredentialPair,
        policy: LevelPolicy,
    ) -> bool {
        let mut inner = self.lock();
        let created = inner.document.subscribers.put(id, credentials, policy);
        Self::persist_locked(&inner);
        created
    }

    /// Change a subscriber's level on their request
    ///
    /// Counts as an executed command only when it succeeds.
    pub fn set_preference(
        &self,
        id: &SubscriberId,
        level: u8,
    ) -> Result<PreferenceLevel, RegistryError> {
        let mut inner = self.lock();
        let level = inner.document.subscribers.set_preference(id, level)?;
        inner.document.statistics.commands_executed += 1;
        Self::persist_locked(&inner);
        Ok(level)
    }

    pub fn record_help_reply(&self) {
        let mut inner = self.lock();
        inner.document.statistics.help_replies_sent += 1;
        Self::persist_locked(&inner);
    }

    pub fn record_command(&self) {
        let mut inner = self.lock();
        inner.document.statistics.commands_executed += 1;
        Self::persist_locked(&inner);
    }

    /// Write the current document to disk
    ///
    /// Counters that are not saved on their own (boosts) reach the file here
    /// or with the next post commit.
    pub fn persist(&self) -> Result<(), StorageError> {
        let inner = self.lock();
        inner.store.save(&inner.document)
    }

    /// Save failures never stop the bot: the in-memory document stays
    /// authoritative and the next mutation retries the write.
    fn persist_locked(inner: &Inner) {
        if let Err(e) = inner.store.save(&inner.document) {
            error!("CRITICAL: {}; changes are kept in memory only", e);
            eprintln!("Error: can not save state file: {}", e);
        }
    }
}
