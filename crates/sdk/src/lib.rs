//! RestFeed SDK
//!
//! Client-side consumption of RestFeed feeds: a cursor-driven polling loop
//! with at-least-once, order-preserving, crash-safe delivery.
//!
//! # Overview
//!
//! The SDK provides three seams and the loop that drives them:
//!
//! - [`FeedClient`] - fetches feed pages by link ([`HttpFeedClient`] speaks
//!   the JSON protocol over reqwest)
//! - [`CursorStore`] - durable storage for the client cursor
//!   ([`MemoryCursorStore`], [`FileCursorStore`])
//! - [`EntryHandler`] - applies entries downstream; must be idempotent
//!   under re-delivery
//! - [`FeedPoller`] - the fetch/process/persist state machine
//!
//! # Quick Start
//!
//! ```ignore
//! use restfeed_sdk::{EntryHandler, FeedEntry, FeedPoller, FileCursorStore, PollerConfig};
//!
//! struct OrderProjection;
//!
//! impl EntryHandler for OrderProjection {
//!     async fn handle(&self, entry: &FeedEntry) -> Result<(), restfeed_sdk::BoxError> {
//!         // Deduplicate on entry.dedup_key(), then apply.
//!         println!("{} {} at {}", entry.meta.operation, entry.meta.id, entry.position);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PollerConfig::new("http://localhost:8844/orders")
//!         .with_poll_delay(2_000);
//!
//!     let store = FileCursorStore::new("/var/lib/myservice/cursors");
//!     let poller = FeedPoller::http(config, store, OrderProjection)?;
//!
//!     let handle = poller.spawn();
//!     // ... run until shutdown
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Delivery contract
//!
//! Entries of a page are handled strictly in order. The cursor is persisted
//! only after every item of the page succeeded, so a crash is recovered by
//! replaying the same page from the last persisted cursor - safe because
//! handlers deduplicate via [`FeedEntry::dedup_key`]. Transport failures and
//! 5xx responses are retried with backoff and never lose progress; a 4xx or
//! exhausted cursor persistence surfaces as a fatal [`PollError`] with the
//! last-known-good cursor intact.

pub mod client;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod poller;
pub mod types;

// Re-export main types at crate root
pub use client::{FeedClient, HttpFeedClient};
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
pub use error::{BoxError, FetchError, PollError};
pub use handler::EntryHandler;
pub use poller::{FeedPoller, PollerHandle};
pub use types::{PollerConfig, PollerState};

// Re-export the shared wire model
pub use restfeed_types::{
    ClientCursor, EntryMeta, FeedEntry, FeedPage, Operation, PageLinks,
};
