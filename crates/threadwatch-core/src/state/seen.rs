//! Insertion-ordered set of notified comment ids

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Ids of comments that were already notified
///
/// Membership is the sole authority for "already notified". Insertion order
/// is kept so that pruning evicts the oldest ids first; it is also the order
/// in which ids are written to the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SeenSet {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` was already notified
    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Record `id` as notified
    ///
    /// Returns `false` if it was already present; its position is unchanged.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if id.is_empty() || self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    /// Evict the oldest ids until at most `cap` remain
    ///
    /// A cap of 0 means unlimited. Returns the number of evicted ids.
    pub fn prune(&mut self, cap: usize) -> usize {
        if cap == 0 {
            return 0;
        }
        let mut evicted = 0;
        while self.order.len() > cap {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
                evicted += 1;
            }
        }
        evicted
    }

    /// Number of remembered ids
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing has been seen yet
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for SeenSet {
    fn from(ids: Vec<String>) -> Self {
        let mut set = SeenSet::new();
        for id in ids {
            set.insert(id);
        }
        set
    }
}

impl From<SeenSet> for Vec<String> {
    fn from(set: SeenSet) -> Self {
        set.order.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for SeenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = SeenSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
