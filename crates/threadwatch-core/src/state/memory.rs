// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// Provides a simple state store that doesn't persist across restarts.
// Useful for testing and for throwaway runs.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - The first tick after a restart sees every comment as new

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::State;
use crate::Error;
use crate::traits::state_store::StateStore;

/// In-memory state store implementation
///
/// Cloning shares the underlying state, which lets tests inspect what the
/// engine saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<State>>,
    seen_limit: usize,
    saves: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store without a cap
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that prunes to `seen_limit` on save
    pub fn with_limit(seen_limit: usize) -> Self {
        Self {
            seen_limit,
            ..Self::default()
        }
    }

    /// Create a store pre-populated with `state`
    pub fn with_state(state: State) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
            ..Self::default()
        }
    }

    /// Snapshot of the last saved state
    pub async fn snapshot(&self) -> State {
        self.inner.read().await.clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> State {
        self.inner.read().await.clone()
    }

    async fn save(&self, state: &mut State) -> Result<(), Error> {
        state.seen.prune(self.seen_limit);
        *self.inner.write().await = state.clone();
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
