//! Durable storage for the bot document
//!
//! The whole state (processed posts, subscribers, counters) is a single JSON
//! document. Every save first copies the previous file aside to
//! `<file>.backup`, then rewrites the document in place.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::ledger::Ledger;
use crate::registry::Registry;
use crate::types::Statistics;

/// Everything the bot persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, alias = "tweets")]
    pub posts: Ledger,

    #[serde(default, alias = "accounts")]
    pub subscribers: Registry,

    #[serde(default, alias = "statistic")]
    pub statistics: Statistics,
}

/// Owner of the on-disk representation
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    /// Sibling file that holds the previous version of the document
    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".backup")
    }

    /// Where an unreadable state file is moved on load
    pub fn corrupt_path(&self) -> PathBuf {
        self.sibling(".corrupt")
    }

    /// Load the document
    ///
    /// A missing file yields an empty document. So does an unreadable or
    /// corrupt one, after logging. The bad file is moved to
    /// [`corrupt_path`](Self::corrupt_path) so the next save cannot copy it
    /// over the backup, which stays untouched for manual recovery.
    pub fn load(&self) -> Document {
        match self.try_load() {
            Ok(Some(document)) => {
                tracing::debug!(
                    path = %self.path.display(),
                    subscribers = document.subscribers.len(),
                    posts = document.posts.len(),
                    "Loaded state file"
                );
                document
            }
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "No state file yet, starting empty");
                Document::default()
            }
            Err(e) => {
                tracing::error!(
                    backup = %self.backup_path().display(),
                    "{}; starting with an empty document",
                    e
                );
                self.quarantine();
                Document::default()
            }
        }
    }

    fn quarantine(&self) {
        match fs::rename(&self.path, self.corrupt_path()) {
            Ok(()) => tracing::warn!(
                moved_to = %self.corrupt_path().display(),
                "Moved unreadable state file aside"
            ),
            Err(e) => tracing::error!(
                path = %self.path.display(),
                "Failed to move unreadable state file aside: {}",
                e
            ),
        }
    }

    fn try_load(&self) -> Result<Option<Document>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unreadable(e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.unreadable(e))
    }

    /// Persist the document, keeping the previous version as a backup
    pub fn save(&self, document: &Document) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.write_failed(e))?;
            }
        }

        match fs::copy(&self.path, self.backup_path()) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    backup = %self.backup_path().display(),
                    "Failed to copy state file aside: {}",
                    e
                );
            }
        }

        let file = File::create(&self.path).map_err(|e| self.write_failed(e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, document).map_err(|e| self.write_failed(e))?;
        writer.flush().map_err(|e| self.write_failed(e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| self.write_failed(e))?;

        Ok(())
    }

    fn unreadable(&self, reason: impl ToString) -> StorageError {
        StorageError::Unreadable {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn write_failed(&self, reason: impl ToString) -> StorageError {
        StorageError::WriteFailed {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LevelPolicy;
    use crate::types::{CredentialPair, PostId, PreferenceLevel, SubscriberId};
    use tempfile::TempDir;

    fn sample_document() -> Document {
        let mut document = Document::default();
        document.posts.mark_seen(PostId::from("123"));
        document.posts.mark_seen(PostId::from("124"));
        document.subscribers.put(
            SubscriberId::from("42"),
            CredentialPair::new("tok", "sec"),
            LevelPolicy::PreserveOr(PreferenceLevel::Permissive),
        );
        document.statistics.posts_observed = 2;
        document.statistics.reshares_issued = 1;
        document
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));

        assert_eq!(store.load(), Document::default());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = StateStore::new(&path);
        assert_eq!(store.load(), Document::default());
    }

    #[test]
    fn test_corrupt_file_does_not_replace_backup() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));
        let good = sample_document();
        fs::write(store.backup_path(), serde_json::to_string(&good).unwrap()).unwrap();
        fs::write(store.path(), "{ truncated").unwrap();

        let loaded = store.load();
        assert_eq!(loaded, Document::default());
        assert!(!store.path().exists());
        assert_eq!(fs::read_to_string(store.corrupt_path()).unwrap(), "{ truncated");

        store.save(&loaded).unwrap();

        let backup: Document =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup, good);
        assert_eq!(store.load(), Document::default());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));
        let document = sample_document();

        store.save(&document).unwrap();
        let loaded = store.load();

        assert_eq!(loaded, document);
        store.save(&loaded).unwrap();
        assert_eq!(store.load(), document);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("db").join("nested").join("state.json"));

        store.save(&Document::default()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_save_keeps_previous_version_as_backup() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));

        store.save(&Document::default()).unwrap();
        assert!(!store.backup_path().exists());

        let document = sample_document();
        store.save(&document).unwrap();

        let backup: Document =
            serde_json::from_str(&fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(backup, Document::default());
        assert_eq!(store.load(), document);
    }

    #[test]
    fn test_backup_path_is_sibling() {
        let store = StateStore::new("/var/lib/boostcast/state.json");
        assert_eq!(
            store.backup_path(),
            PathBuf::from("/var/lib/boostcast/state.json.backup")
        );
    }

    #[test]
    fn test_loads_legacy_document_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
                "tweets": [1149653187391823872],
                "accounts": {
                    "964500628914491394": {
                        "access_token": "tok",
                        "access_token_secret": "sec",
                        "retweet_level": 1
                    }
                },
                "statistic": {"tweets": 1, "retweets": 3, "sent_help_dm": 0, "received_botcmds": 2}
            }"#,
        )
        .unwrap();

        let document = StateStore::new(&path).load();

        assert!(document.posts.has_seen(&PostId::from("1149653187391823872")));
        let id = SubscriberId::from("964500628914491394");
        assert_eq!(
            document.subscribers.level_of(&id),
            Some(PreferenceLevel::Restrictive)
        );
        assert_eq!(document.statistics.reshares_issued, 3);
        assert_eq!(document.statistics.commands_executed, 2);
    }

    #[test]
    #[cfg(unix)]
    fn test_save_failure_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        let store = StateStore::new(locked.join("state.json"));
        let result = store.save(&Document::default());

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o700)).unwrap();

        // Root ignores directory permissions, so only assert when the write was refused
        if let Err(e) = result {
            assert!(matches!(e, StorageError::WriteFailed { .. }));
        }
    }
}
