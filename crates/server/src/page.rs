//! Turning resolved entry batches into the link+items response model.

use std::sync::Arc;

use restfeed_types::{FeedEntry, FeedPage, PageLinks};

/// Encode a feed link for an optional offset.
pub fn offset_link(feed_path: &str, offset: Option<i64>) -> String {
    match offset {
        Some(offset) => format!("{feed_path}?offset={offset}"),
        None => feed_path.to_string(),
    }
}

/// Build the page for a resolved batch.
///
/// `self` echoes the requested offset verbatim. `next` is present iff the
/// batch is non-empty and encodes the highest position in the page; its
/// absence tells the consumer to idle before retrying the same offset,
/// while any non-empty page invites an immediate re-fetch.
pub fn build_page(
    feed_path: &str,
    requested_offset: Option<i64>,
    items: Vec<Arc<FeedEntry>>,
) -> FeedPage {
    let next = items
        .last()
        .map(|last| offset_link(feed_path, Some(last.position)));

    FeedPage {
        links: PageLinks {
            self_link: offset_link(feed_path, requested_offset),
            next,
        },
        items: items.iter().map(|entry| FeedEntry::clone(entry)).collect(),
    }
}
