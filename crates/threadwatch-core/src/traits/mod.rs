//! Core traits for the threadwatch system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`PageSource`]: Fetch the watched page
//! - [`NotificationSink`]: Deliver text and images to the operator
//! - [`StateStore`]: Durable record of already-notified comments

pub mod notification_sink;
pub mod page_source;
pub mod state_store;

pub use notification_sink::{NotificationSink, NotificationSinkFactory};
pub use page_source::{FetchedPage, PageSource, PageSourceFactory};
pub use state_store::StateStore;
