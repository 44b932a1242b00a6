//! Subscriber registry
//!
//! Holds, per subscriber, the delegated credential and the chosen preference
//! level. Absence of an entry means "not subscribed".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::{CredentialPair, PreferenceLevel, Subscriber, SubscriberId};

/// What `put` does with the level of an existing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelPolicy {
    /// Always write the given level, discarding any earlier choice
    Reset(PreferenceLevel),
    /// Keep an existing subscriber's level; use the given one for new entries
    PreserveOr(PreferenceLevel),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credential of a subscriber
    pub fn get(&self, id: &SubscriberId) -> Result<&CredentialPair, RegistryError> {
        self.subscribers
            .get(id)
            .map(|s| &s.credentials)
            .ok_or_else(|| RegistryError::NotSubscribed(id.clone()))
    }

    pub fn subscriber(&self, id: &SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(id)
    }

    pub fn level_of(&self, id: &SubscriberId) -> Option<PreferenceLevel> {
        self.subscribers.get(id).map(|s| s.level)
    }

    /// Insert or update a subscriber
    ///
    /// Returns `true` when the identity was not registered before.
    pub fn put(
        &mut self,
        id: SubscriberId,
        credentials: CredentialPair,
        policy: LevelPolicy,
    ) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(existing) => {
                existing.credentials = credentials;
                existing.authorized_at = Some(chrono::Utc::now().timestamp());
                if let LevelPolicy::Reset(level) = policy {
                    existing.level = level;
                }
                false
            }
            None => {
                let level = match policy {
                    LevelPolicy::Reset(level) | LevelPolicy::PreserveOr(level) => level,
                };
                self.subscribers
                    .insert(id, Subscriber::new(credentials, level));
                true
            }
        }
    }

    /// Remove a subscriber; removing an absent one is not an error
    pub fn remove(&mut self, id: &SubscriberId) -> Option<Subscriber> {
        self.subscribers.remove(id)
    }

    /// Change a subscriber's preference level
    ///
    /// The raw level is validated before the lookup so a malformed request is
    /// reported as such even for unknown senders.
    pub fn set_preference(
        &mut self,
        id: &SubscriberId,
        level: u8,
    ) -> Result<PreferenceLevel, RegistryError> {
        let level = PreferenceLevel::try_from(level)?;
        let subscriber = self
            .subscribers
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotSubscribed(id.clone()))?;
        subscriber.level = level;
        Ok(level)
    }

    /// Point-in-time copy of every entry, in identity order
    pub fn snapshot(&self) -> Vec<(SubscriberId, Subscriber)> {
        self.subscribers
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SubscriberId, &Subscriber)> {
        self.subscribers.iter()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(token: &str) -> CredentialPair {
        CredentialPair::new(token, format!("{}-secret", token))
    }

    #[test]
    fn test_get_missing_is_not_subscribed() {
        let registry = Registry::new();
        let id = SubscriberId::from("42");

        assert_eq!(
            registry.get(&id).unwrap_err(),
            RegistryError::NotSubscribed(id)
        );
    }

    #[test]
    fn test_put_new_subscriber() {
        let mut registry = Registry::new();
        let id = SubscriberId::from("42");

        let created = registry.put(
            id.clone(),
            creds("tok"),
            LevelPolicy::PreserveOr(PreferenceLevel::Standard),
        );

        assert!(created);
        assert_eq!(registry.get(&id).unwrap().access_token(), "tok");
        assert_eq!(registry.level_of(&id), Some(PreferenceLevel::Standard));
        assert!(registry.subscriber(&id).unwrap().authorized_at.is_some());
    }

    #[test]
    fn test_put_preserve_keeps_chosen_level() {
        let mut registry = Registry::new();
        let id = SubscriberId::from("42");
        let policy = LevelPolicy::PreserveOr(PreferenceLevel::Standard);

        registry.put(id.clone(), creds("old"), policy);
        registry.set_preference(&id, 3).unwrap();
        let created = registry.put(id.clone(), creds("new"), policy);

        assert!(!created);
        assert_eq!(registry.get(&id).unwrap().access_token(), "new");
        assert_eq!(registry.level_of(&id), Some(PreferenceLevel::Permissive));
    }

    #[test]
    fn test_put_reset_overwrites_level() {
        let mut registry = Registry::new();
        let id = SubscriberId::from("42");

        registry.put(
            id.clone(),
            creds("old"),
            LevelPolicy::Reset(PreferenceLevel::Standard),
        );
        registry.set_preference(&id, 1).unwrap();
        registry.put(
            id.clone(),
            creds("new"),
            LevelPolicy::Reset(PreferenceLevel::Standard),
        );

        assert_eq!(registry.level_of(&id), Some(PreferenceLevel::Standard));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = Registry::new();
        let id = SubscriberId::from("42");
        registry.put(
            id.clone(),
            creds("tok"),
            LevelPolicy::PreserveOr(PreferenceLevel::Standard),
        );

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_preference_errors() {
        let mut registry = Registry::new();
        let known = SubscriberId::from("1");
        let unknown = SubscriberId::from("2");
        registry.put(
            known.clone(),
            creds("tok"),
            LevelPolicy::PreserveOr(PreferenceLevel::Standard),
        );

        assert_eq!(
            registry.set_preference(&unknown, 2),
            Err(RegistryError::NotSubscribed(unknown.clone()))
        );
        assert_eq!(
            registry.set_preference(&known, 0),
            Err(RegistryError::InvalidPreference(0))
        );
        assert_eq!(
            registry.set_preference(&unknown, 5),
            Err(RegistryError::InvalidPreference(5))
        );
        assert_eq!(registry.level_of(&known), Some(PreferenceLevel::Standard));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut registry = Registry::new();
        for id in ["b", "a", "c"] {
            registry.put(
                SubscriberId::from(id),
                creds(id),
                LevelPolicy::PreserveOr(PreferenceLevel::Standard),
            );
        }

        let snapshot = registry.snapshot();
        registry.remove(&SubscriberId::from("b"));

        let ids: Vec<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(registry.len(), 2);
    }
}
