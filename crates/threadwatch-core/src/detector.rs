//! Change detection
//!
//! Diffs freshly parsed records against the [`SeenSet`]. The detector never
//! mutates state; the engine decides what to commit.
//!
//! ## Trust Level
//!
//! - ✅ Membership in the SeenSet is the only criterion for "already notified"
//! - ✅ Page order is preserved
//! - ❌ Records missing from the page are never reported (no deletion events)
//! - ❌ An empty page never affects the SeenSet

use std::collections::HashSet;

use crate::parser::CommentRecord;
use crate::state::SeenSet;

/// Records whose id is not in `seen`, in their original order
///
/// A record id that occurs more than once is returned only for its first
/// occurrence.
pub fn detect(records: &[CommentRecord], seen: &SeenSet) -> Vec<CommentRecord> {
    let mut emitted = HashSet::new();
    records
        .iter()
        .filter(|record| !seen.contains(&record.id))
        .filter(|record| emitted.insert(record.id.as_str()))
        .cloned()
        .collect()
}

/// Add every record id to `seen` without notifying
///
/// Used to start monitoring a busy page without a notification storm.
/// Returns the number of newly added ids.
pub fn mark_all_seen(records: &[CommentRecord], seen: &mut SeenSet) -> usize {
    records
        .iter()
        .filter(|record| seen.insert(record.id.as_str()))
        .count()
}
