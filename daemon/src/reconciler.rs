//! Frame-to-frame delta of group keys

use crate::aggregator::{GroupKey, GroupMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Keys are sorted within each list. Apply `removed` before `added`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub removed: Vec<GroupKey>,
    pub updated: Vec<GroupKey>,
    pub added: Vec<GroupKey>,
}

impl Delta {
    pub fn is_structural(&self) -> bool {
        !self.removed.is_empty() || !self.added.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    previous: BTreeSet<GroupKey>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous_keys(&self) -> &BTreeSet<GroupKey> {
        &self.previous
    }

    pub fn reconcile(&mut self, next: &GroupMap) -> Delta {
        let keys: BTreeSet<GroupKey> = next.keys().cloned().collect();
        let delta = Delta {
            removed: self.previous.difference(&keys).cloned().collect(),
            updated: keys.intersection(&self.previous).cloned().collect(),
            added: keys.difference(&self.previous).cloned().collect(),
        };
        self.previous = keys;
        delta
    }

    pub fn reset(&mut self) {
        self.previous.clear();
    }
}
