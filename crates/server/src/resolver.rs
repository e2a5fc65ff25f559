//! Offset resolution against stored feeds.
//!
//! Answers "entries after position P, up to the server-chosen limit",
//! including gap handling: an offset landing on a compacted position is not
//! an error, resolution continues from the next surviving entry. The
//! long-poll variant waits a bounded duration for new entries before
//! returning the empty result.

use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use restfeed_types::FeedEntry;

use crate::store::{EntryFilter, FeedStore, StoreError};

/// Resolves client-supplied offsets into entry batches.
#[derive(Clone)]
pub struct OffsetResolver {
    store: Arc<FeedStore>,
    page_limit: usize,
}

impl OffsetResolver {
    pub fn new(store: Arc<FeedStore>, page_limit: usize) -> Self {
        Self { store, page_limit }
    }

    /// The server-chosen page limit. Not client-settable.
    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    /// Entries with `position > offset`, ascending, at most `page_limit`.
    ///
    /// `None` reads from the start of the feed. An offset beyond the end
    /// yields an empty batch; an offset on a compacted position resolves
    /// from the next surviving one. Reads are snapshot-consistent with
    /// concurrent compaction.
    pub fn query(
        &self,
        path: &str,
        offset: Option<i64>,
        filter: Option<&EntryFilter>,
    ) -> Result<Vec<Arc<FeedEntry>>, StoreError> {
        let feed = self.store.feed(path)?;
        Ok(feed.entries_after(offset, self.page_limit, filter))
    }

    /// Like [`query`](Self::query), but when the result would be empty,
    /// wait up to `wait` for a matching append before giving up.
    ///
    /// An optional capability; correctness never depends on it.
    pub async fn query_or_wait(
        &self,
        path: &str,
        offset: Option<i64>,
        filter: Option<&EntryFilter>,
        wait: Duration,
    ) -> Result<Vec<Arc<FeedEntry>>, StoreError> {
        // Subscribe before the first query so appends landing in between
        // are not missed.
        let mut rx = self.store.subscribe();

        let entries = self.query(path, offset, filter)?;
        if !entries.is_empty() {
            return Ok(entries);
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(notification)) => {
                    if notification.path != path {
                        continue;
                    }
                    if offset.is_some_and(|after| notification.position <= after) {
                        continue;
                    }
                    let entries = self.query(path, offset, filter)?;
                    if !entries.is_empty() {
                        return Ok(entries);
                    }
                    // Filtered out; keep waiting.
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!(path = %path, skipped, "Long-poll waiter lagged, re-querying");
                    let entries = self.query(path, offset, filter)?;
                    if !entries.is_empty() {
                        return Ok(entries);
                    }
                }
                // Deadline reached or store gone: report what is there now.
                Ok(Err(RecvError::Closed)) | Err(_) => return self.query(path, offset, filter),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use restfeed_types::FeedKind;

    use crate::store::AppendRequest;

    use super::*;

    fn store_with_feed(path: &str, kind: FeedKind) -> Arc<FeedStore> {
        let store = FeedStore::new();
        store.create(path, kind).unwrap();
        store
    }

    #[test]
    fn test_query_is_strictly_greater_and_limited() {
        let store = store_with_feed("/audit", FeedKind::Event);
        for i in 0..5 {
            store
                .append("/audit", AppendRequest::put("t", format!("{i}"), json!({})))
                .unwrap();
        }

        let resolver = OffsetResolver::new(Arc::clone(&store), 2);

        let positions: Vec<i64> = resolver
            .query("/audit", None, None)
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        assert_eq!(positions, vec![1, 2]);

        let positions: Vec<i64> = resolver
            .query("/audit", Some(2), None)
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        assert_eq!(positions, vec![3, 4]);
    }

    #[test]
    fn test_compacted_offset_resolves_from_next_survivor() {
        let store = store_with_feed("/orders", FeedKind::Data);

        let first = store
            .append("/orders", AppendRequest::put("t", "A", json!({"v": 1})))
            .unwrap();
        let other = store
            .append("/orders", AppendRequest::put("t", "B", json!({})))
            .unwrap();
        let second = store
            .append("/orders", AppendRequest::put("t", "A", json!({"v": 2})))
            .unwrap();

        let resolver = OffsetResolver::new(Arc::clone(&store), 100);

        // The requested offset sits exactly on the compacted position of
        // the first "A" entry; resolution continues past it.
        let positions: Vec<i64> = resolver
            .query("/orders", Some(first.position), None)
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        assert_eq!(positions, vec![other.position, second.position]);
    }

    #[test]
    fn test_offset_beyond_end_is_empty_not_an_error() {
        let store = store_with_feed("/orders", FeedKind::Data);
        store
            .append("/orders", AppendRequest::put("t", "A", json!({})))
            .unwrap();

        let resolver = OffsetResolver::new(Arc::clone(&store), 100);
        assert!(resolver.query("/orders", Some(99), None).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_feed_is_an_error() {
        let store = FeedStore::new();
        let resolver = OffsetResolver::new(store, 100);
        assert!(matches!(
            resolver.query("/nope", None, None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_filter_applies_before_pagination() {
        let store = store_with_feed("/orders", FeedKind::Data);
        for i in 0..4 {
            let entry_type = if i % 2 == 0 { "com.example.order" } else { "com.example.other" };
            store
                .append("/orders", AppendRequest::put(entry_type, format!("{i}"), json!({})))
                .unwrap();
        }

        let resolver = OffsetResolver::new(Arc::clone(&store), 2);
        let filter: EntryFilter =
            Arc::new(|entry: &FeedEntry| entry.meta.entry_type == "com.example.order");

        let positions: Vec<i64> = resolver
            .query("/orders", None, Some(&filter))
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        // The limit counts filtered entries, not scanned ones.
        assert_eq!(positions, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_append() {
        let store = store_with_feed("/orders", FeedKind::Data);
        let resolver = OffsetResolver::new(Arc::clone(&store), 100);

        let appender = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            appender
                .append("/orders", AppendRequest::put("t", "A", json!({})))
                .unwrap();
        });

        let entries = resolver
            .query_or_wait("/orders", None, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_long_poll_deadline_returns_empty() {
        let store = store_with_feed("/orders", FeedKind::Data);
        let resolver = OffsetResolver::new(Arc::clone(&store), 100);

        let entries = resolver
            .query_or_wait("/orders", None, None, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_long_poll_ignores_other_feeds() {
        let store = store_with_feed("/orders", FeedKind::Data);
        store.create("/audit", FeedKind::Event).unwrap();
        let resolver = OffsetResolver::new(Arc::clone(&store), 100);

        let appender = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            appender
                .append("/audit", AppendRequest::put("t", "A", json!({})))
                .unwrap();
        });

        let entries = resolver
            .query_or_wait("/orders", None, None, Duration::from_millis(150))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
