// # State
//
// The process's only durable artifact, and the StateStore implementations
// that persist it.

pub mod file;
pub mod memory;
pub mod seen;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use seen::SeenSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable monitor state
///
/// Loaded once at startup, mutated only by the `PollEngine` after a dispatch
/// attempt completes, and persisted after every tick that produced new
/// records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Ids of comments already notified, oldest first
    #[serde(default, rename = "seen_comment_ids")]
    pub seen: SeenSet,

    /// When the page was last fetched successfully
    #[serde(default)]
    pub last_successful_poll: Option<DateTime<Utc>>,
}

impl State {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }
}
