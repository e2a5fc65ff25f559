//! Durable cursor storage.
//!
//! The poller persists its [`ClientCursor`] through this seam only after a
//! page was fully processed, which is what makes crash-recovery replay safe.

use std::{collections::HashMap, future::Future, path::PathBuf, sync::Arc};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use restfeed_types::ClientCursor;

use crate::error::BoxError;

/// Durable storage for client cursors, keyed by feed root URL.
pub trait CursorStore: Send + Sync + 'static {
    fn load(
        &self,
        feed_url: &str,
    ) -> impl Future<Output = Result<Option<ClientCursor>, BoxError>> + Send;

    fn save(&self, cursor: &ClientCursor) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// In-memory store, for tests and processes that accept replay-from-start
/// after a restart.
#[derive(Clone, Default)]
pub struct MemoryCursorStore {
    cursors: Arc<RwLock<HashMap<String, ClientCursor>>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    async fn load(&self, feed_url: &str) -> Result<Option<ClientCursor>, BoxError> {
        Ok(self.cursors.read().get(feed_url).cloned())
    }

    async fn save(&self, cursor: &ClientCursor) -> Result<(), BoxError> {
        self.cursors
            .write()
            .insert(cursor.feed_root_url.clone(), cursor.clone());
        Ok(())
    }
}

/// File-backed store: one JSON document per feed under a directory.
///
/// Feed URLs are base64url-encoded into file names. A save writes a
/// temporary file, fsyncs it and renames it over the target, so a crash
/// mid-save leaves the prior cursor intact.
#[derive(Clone)]
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn cursor_path(&self, feed_url: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(feed_url.as_bytes());
        self.dir.join(format!("{name}.json"))
    }
}

impl CursorStore for FileCursorStore {
    async fn load(&self, feed_url: &str) -> Result<Option<ClientCursor>, BoxError> {
        let path = self.cursor_path(feed_url);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn save(&self, cursor: &ClientCursor) -> Result<(), BoxError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.cursor_path(&cursor.feed_root_url);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec(cursor)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&raw).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), link = %cursor.current_link, "Persisted cursor");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCursorStore::new();
        let feed = "http://localhost:8844/orders";

        assert!(store.load(feed).await.unwrap().is_none());

        let mut cursor = ClientCursor::initial(feed);
        store.save(&cursor).await.unwrap();
        assert_eq!(store.load(feed).await.unwrap(), Some(cursor.clone()));

        cursor.current_link = "/orders?offset=126".to_string();
        store.save(&cursor).await.unwrap();
        assert_eq!(store.load(feed).await.unwrap(), Some(cursor));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path());
        let feed = "http://localhost:8844/orders";

        assert!(store.load(feed).await.unwrap().is_none());

        let mut cursor = ClientCursor::initial(feed);
        cursor.current_link = "/orders?offset=42".to_string();
        store.save(&cursor).await.unwrap();

        // A fresh store over the same directory sees the cursor.
        let reopened = FileCursorStore::new(dir.path());
        assert_eq!(reopened.load(feed).await.unwrap(), Some(cursor));
    }

    #[tokio::test]
    async fn test_file_store_keys_feeds_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path());

        let orders = ClientCursor::initial("http://localhost:8844/orders");
        let audit = ClientCursor::initial("http://localhost:8844/audit");
        store.save(&orders).await.unwrap();
        store.save(&audit).await.unwrap();

        assert_eq!(
            store.load(&orders.feed_root_url).await.unwrap(),
            Some(orders)
        );
        assert_eq!(store.load(&audit.feed_root_url).await.unwrap(), Some(audit));
    }
}
