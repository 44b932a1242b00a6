//! Ledger of source posts that have already been dispatched

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::PostId;

/// Set of processed post ids
///
/// Membership is what matters; insertion order is kept for the on-disk array
/// and for debugging output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PostId>", into = "Vec<PostId>")]
pub struct Ledger {
    order: Vec<PostId>,
    index: HashSet<PostId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_seen(&self, id: &PostId) -> bool {
        self.index.contains(id)
    }

    /// Record a post as processed
    ///
    /// Returns `true` only the first time a given id is marked.
    pub fn mark_seen(&mut self, id: PostId) -> bool {
        if self.index.insert(id.clone()) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    /// Processed ids in the order they were first marked
    pub fn iter(&self) -> impl Iterator<Item = &PostId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl From<Vec<PostId>> for Ledger {
    fn from(ids: Vec<PostId>) -> Self {
        let mut ledger = Ledger::new();
        for id in ids {
            ledger.mark_seen(id);
        }
        ledger
    }
}

impl From<Ledger> for Vec<PostId> {
    fn from(ledger: Ledger) -> Self {
        ledger.order
    }
}
