// # threadwatch-core
//
// Core library for the comment-watching system.
//
// ## Architecture Overview
//
// This library provides the change-detection and delivery engine:
// - **PageSource**: Trait for fetching the watched page
// - **PageParser**: Turns a page into ordered comment records
// - **Detector**: Diffs records against the seen set
// - **NotificationDispatcher**: Formats comments and delivers them with retries
// - **NotificationSink**: Trait for the outbound messaging endpoint
// - **StateStore**: Trait for crash-safe persistence of the seen set
// - **PollEngine**: Orchestrates fetch → parse → detect → dispatch → persist
// - **ComponentRegistry**: Plugin-based registry for sources and sinks
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from transports
// 2. **Exactly Once**: A comment is notified once while its id is remembered
// 3. **Plugin-Based**: Sources and sinks are registered dynamically
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Fail Soft**: Fetch, parse and delivery problems never end the process

pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod parser;
pub mod registry;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{
    EngineConfig, InitialMode, PageConfig, PageSourceConfig, SinkConfig, StartupConfig,
    StateStoreConfig, WatchConfig,
};
pub use detector::{detect, mark_all_seen};
pub use dispatcher::{DeliveryOutcome, NotificationDispatcher, RetryPolicy};
pub use engine::{EngineEvent, PollEngine, Session, TickReport};
pub use error::{Error, Result};
pub use parser::{CommentRecord, PageParser};
pub use registry::ComponentRegistry;
pub use state::{FileStateStore, MemoryStateStore, SeenSet, State};
pub use traits::{FetchedPage, NotificationSink, PageSource, StateStore};
