use std::future::Future;

use restfeed_types::FeedEntry;

use crate::error::BoxError;

/// Applies feed entries to downstream state.
///
/// Handlers MUST be idempotent under re-delivery: after a crash the poller
/// replays the last unacknowledged page from the persisted cursor, so the
/// same entry can arrive more than once. Deduplicate on
/// [`FeedEntry::dedup_key`] - the producer's idempotency key when present,
/// otherwise id, operation and position.
///
/// A returned error halts the current page; the poller re-fetches the same
/// offset after backoff, never skipping ahead past a failed entry.
pub trait EntryHandler: Send + Sync + 'static {
    fn handle(&self, entry: &FeedEntry) -> impl Future<Output = Result<(), BoxError>> + Send;
}
