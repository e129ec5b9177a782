//! Folds process frames into named groups per category

use crate::classifier::Classifier;
use crate::wire::Sample;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    App,
    Background,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::App => write!(f, "app"),
            Category::Background => write!(f, "background"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub category: Category,
    pub name: String,
}

impl GroupKey {
    pub fn new(category: Category, name: impl Into<String>) -> Self {
        Self { category, name: name.into() }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidDetail {
    pub cpu_percent: f64,
    pub mem_mb: f64,
    pub state: char,
    pub threads: u32,
}

/// All live pids sharing a name within one category, rebuilt every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub category: Category,
    pub name: String,
    pub pids: BTreeSet<u32>,
    pub cpu_percent: f64,
    pub mem_mb: f64,
    pub state: char,
    pub detail: BTreeMap<u32, PidDetail>,
}

impl ProcessGroup {
    fn new(key: &GroupKey, state: char) -> Self {
        Self {
            category: key.category,
            name: key.name.clone(),
            pids: BTreeSet::new(),
            cpu_percent: 0.0,
            mem_mb: 0.0,
            state,
            detail: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.category, self.name.clone())
    }

    fn add(&mut self, sample: &Sample) {
        let mem_mb = kb_to_mib(sample.mem_kb);
        self.pids.insert(sample.pid);
        self.cpu_percent += sample.cpu_percent;
        self.mem_mb += mem_mb;
        self.detail.insert(
            sample.pid,
            PidDetail {
                cpu_percent: sample.cpu_percent,
                mem_mb,
                state: sample.state,
                threads: sample.thread_count,
            },
        );
    }

    pub fn thread_count(&self) -> u64 {
        self.detail.values().map(|d| u64::from(d.threads)).sum()
    }
}

pub type GroupMap = BTreeMap<GroupKey, ProcessGroup>;

pub fn kb_to_mib(kb: u64) -> f64 {
    kb as f64 / 1024.0
}

pub fn count_by_category(groups: &GroupMap, category: Category) -> usize {
    groups.keys().filter(|k| k.category == category).count()
}

pub struct Aggregator {
    cleanup_every: u32,
    cycles: u32,
}

impl Aggregator {
    pub fn new(cleanup_every: u32) -> Self {
        Self { cleanup_every: cleanup_every.max(1), cycles: 0 }
    }

    /// Classifies every sample and sums it into its `(category, name)` group.
    ///
    /// Classification is per pid, so one name can land in both categories
    /// when only some of its processes own a window.
    pub fn aggregate(&mut self, samples: &[Sample], classifier: &mut Classifier) -> GroupMap {
        self.cycles += 1;
        if self.cycles >= self.cleanup_every {
            self.cycles = 0;
            let live: HashSet<u32> = samples.iter().map(|s| s.pid).collect();
            let purged = classifier.purge_absent(&live);
            debug!(purged, remaining = classifier.cache_len(), "classification cache cleanup");
        }

        let mut groups = GroupMap::new();
        for sample in samples {
            let category = if classifier.classify(sample.pid, &sample.name) {
                Category::App
            } else {
                Category::Background
            };
            let key = GroupKey::new(category, sample.name.clone());
            groups
                .entry(key)
                .or_insert_with_key(|key| ProcessGroup::new(key, sample.state))
                .add(sample);
        }
        groups
    }
}

impl Default for Aggregator {
    fn default() -> Self { Self::new(30) }
}
