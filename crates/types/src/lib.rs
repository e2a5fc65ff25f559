//! Shared wire model for RestFeed.
//!
//! Both the server and the sdk speak the same JSON shapes: a [`FeedPage`] of
//! [`FeedEntry`] items linked by `self`/`next`, and the [`ClientCursor`] a
//! consumer persists between polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Entry operation. `put` publishes a new state or event, `delete` retires
/// the referenced resource (a tombstone).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Put,
    Delete,
}

impl Operation {
    /// Used to omit the default operation on the wire.
    pub fn is_put(&self) -> bool {
        matches!(self, Operation::Put)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Put => write!(f, "put"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Metadata carried by every feed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    /// Type discriminator, e.g. `com.example.order`.
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Caller-assigned logical key. At most one live entry per id exists in
    /// a data feed.
    pub id: String,
    #[serde(default, skip_serializing_if = "Operation::is_put")]
    pub operation: Operation,
    /// When the entry was appended (UTC).
    pub created: DateTime<Utc>,
    /// Producer-supplied token for downstream deduplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// A single entry in a feed.
///
/// `position` is server-assigned, globally unique and strictly increasing in
/// allocation order. Positions are never reused and never renumbered;
/// consumers must not assume contiguity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub position: i64,
    pub meta: EntryMeta,
    /// Opaque payload. Absent signals a tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl FeedEntry {
    /// Whether this entry retires the referenced resource.
    pub fn is_tombstone(&self) -> bool {
        self.meta.operation == Operation::Delete
    }

    /// Key handlers deduplicate re-deliveries on: the producer's idempotency
    /// key when present, otherwise id, operation and position combined.
    pub fn dedup_key(&self) -> String {
        match &self.meta.idempotency_key {
            Some(key) => key.clone(),
            None => format!(
                "{}:{}:{}",
                self.meta.id, self.meta.operation, self.position
            ),
        }
    }
}

/// Links of a feed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLinks {
    /// Always present; echoes the requested offset verbatim.
    #[serde(rename = "self")]
    pub self_link: String,
    /// Present iff the page is non-empty; encodes the highest position in
    /// the page. Absent means the consumer should idle before retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// One page of a feed, as returned by `GET <feedPath>`.
///
/// Items are strictly ascending by position, never duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub links: PageLinks,
    pub items: Vec<FeedEntry>,
}

impl FeedPage {
    /// Position of the last item, if any.
    pub fn last_position(&self) -> Option<i64> {
        self.items.last().map(|entry| entry.position)
    }
}

/// Durable pointer marking a consumer's progress through a feed.
///
/// `current_link` is either the feed root (nothing processed yet) or the
/// last `next` link received. Advanced only after a page's items were fully
/// processed, and persisted before the next fetch with a new offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCursor {
    pub feed_root_url: String,
    pub current_link: String,
}

impl ClientCursor {
    /// Cursor of a fresh subscription, pointing at the feed root.
    pub fn initial(feed_root_url: impl Into<String>) -> Self {
        let feed_root_url = feed_root_url.into();
        Self {
            current_link: feed_root_url.clone(),
            feed_root_url,
        }
    }
}

/// Kind of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Current-state snapshots; appending an id supersedes the prior entry
    /// for that id (compaction).
    Data,
    /// Immutable domain events; retained until an explicit retention cutoff.
    Event,
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedKind::Data => write!(f, "data"),
            FeedKind::Event => write!(f, "event"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown feed kind: {0}")]
pub struct UnknownFeedKind(pub String);

impl std::str::FromStr for FeedKind {
    type Err = UnknownFeedKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "data" => Ok(FeedKind::Data),
            "event" => Ok(FeedKind::Event),
            other => Err(UnknownFeedKind(other.to_string())),
        }
    }
}
