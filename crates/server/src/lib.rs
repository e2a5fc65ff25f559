//! RestFeed Server
//!
//! Hosts ordered feeds over plain HTTP - data snapshots with per-id
//! compaction, or immutable domain events, consumed by cursor-driven
//! polling clients.
//!
//! # Features
//!
//! - **Strictly increasing positions**: every appended entry gets a
//!   server-wide unique, monotonic sequence position
//! - **Per-id compaction**: on a data feed, appending an id supersedes the
//!   prior entry for that id; its position becomes a gap
//! - **Gap-tolerant offset resolution**: reading after a compacted position
//!   transparently continues from the next surviving entry
//! - **Linked pages**: responses carry `self`/`next` links; a missing `next`
//!   tells the consumer to idle before retrying
//! - **Long-polling**: optionally wait a bounded duration for new entries
//!   before returning an empty page
//!
//! # Example
//!
//! ```rust,no_run
//! use restfeed_server::{server, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ServerOptions {
//!         port: 8844,
//!         host: "127.0.0.1".to_string(),
//!         ..Default::default()
//!     };
//!
//!     server::start_server(options).await.unwrap();
//! }
//! ```
//!
//! # Protocol
//!
//! ## Creating a feed
//!
//! ```text
//! PUT /orders HTTP/1.1
//! Feed-Kind: data
//!
//! Response: 201 Created
//! ```
//!
//! ## Appending an entry
//!
//! ```text
//! POST /orders HTTP/1.1
//! Content-Type: application/json
//!
//! {"type": "com.example.order", "id": "123456", "data": {"total": 4200}}
//!
//! Response: 200 OK
//! Feed-Position: 124
//! ```
//!
//! ## Reading
//!
//! ```text
//! GET /orders?offset=123 HTTP/1.1
//! Accept: application/json
//!
//! Response: 200 OK
//!
//! {
//!   "links": {"self": "/orders?offset=123", "next": "/orders?offset=126"},
//!   "items": [
//!     {"position": 124, "meta": {"type": "com.example.order", "id": "123456",
//!      "created": "2024-05-05T14:30:00Z"}, "data": {"total": 4200}},
//!     {"position": 126, "meta": {"type": "com.example.order", "id": "777777",
//!      "created": "2024-05-05T14:31:00Z"}, "data": {"total": 900}}
//!   ]
//! }
//! ```
//!
//! ## Long-polling
//!
//! ```text
//! GET /orders?offset=126&live=long-poll HTTP/1.1
//!
//! (waits up to the configured bound for new entries)
//!
//! Response: 200 OK with the empty page if nothing arrived
//! ```

pub mod allocator;
pub mod page;
pub mod resolver;
pub mod server;
pub mod store;

// Re-export commonly used items
pub use allocator::{AllocationExhausted, PositionAllocator};
pub use resolver::OffsetResolver;
pub use server::{create_router, start_server, AppState, ServerOptions};
pub use store::{
    AppendNotification, AppendRequest, Feed, FeedLifecycleEvent, FeedStore, StoreError,
};
