// # State Store Trait
//
// Defines the interface for persistent state management.
//
// ## Purpose
//
// The state store is what makes notifications exactly-once across restarts.
// It keeps:
// - The ids of comments that were already notified (bounded, oldest evicted)
// - The timestamp of the last successful poll
//
// ## Implementations
//
// - File-based: JSON file with atomic replace
// - In-memory: tests and throwaway runs
//
// ## Usage
//
// ```rust,ignore
// use threadwatch_core::StateStore;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* StateStore implementation */;
//
//     let mut state = store.load().await;
//     state.seen.insert("12345");
//     store.save(&mut state).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::state::State;

/// Trait for state store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// The store is owned exclusively by the `PollEngine` for the lifetime of
/// the process: single writer, no concurrent readers.
///
/// ## Implementation Guidelines
///
/// - **Never fail a load**: a missing, unreadable or malformed state
///   degrades to `State::default()` with a warning
/// - **Atomic saves**: a crash during `save` must leave either the previous
///   valid state or the complete new one
/// - **Bounded**: `save` prunes the seen set to the configured cap first
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted state
    ///
    /// Never fails: anomalies are logged and an empty state is returned.
    async fn load(&self) -> State;

    /// Prune the seen set to the configured cap and persist the state
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The new state is durable
    /// - `Err(Error)`: Nothing was replaced; the previous state is intact
    async fn save(&self, state: &mut State) -> Result<(), crate::Error>;
}
