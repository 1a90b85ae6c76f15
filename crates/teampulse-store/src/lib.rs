//! Atomic JSON document storage.
//!
//! Each collection is one JSON file wrapped in an envelope carrying a
//! `lastUpdated` stamp. Writes go to a uniquely named temporary sibling
//! file first and are committed with an atomic rename, so readers only
//! ever observe a complete document and concurrent writers never trip
//! over each other's temp files. There is no locking: concurrent
//! `update` calls on the same collection race and the later write wins
//! in full; callers serialize logically related writes themselves.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use teampulse_schema::{
    CacheDoc, CacheEntry, ChannelsDoc, LearningDoc, MessagesDoc, SummariesDoc, TagsDoc, UsersDoc,
};
use thiserror::Error;
use uuid::Uuid;

/// Cache entries older than this are treated as absent at read time.
pub const CACHE_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize document '{name}': {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write document '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    last_updated: DateTime<Utc>,
    data: T,
}

/// One named document collection backed by `<dir>/<name>.json`.
pub struct Collection<T> {
    name: String,
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: dir.join(format!("{name}.json")),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current snapshot, or the default shape when the file is missing or
    /// unreadable. Read failures never propagate; write failures always do.
    pub async fn read(&self) -> T {
        self.read_envelope().await.map(|e| e.data).unwrap_or_default()
    }

    /// Timestamp of the last committed write, if the document exists.
    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.read_envelope().await.map(|e| e.last_updated)
    }

    async fn read_envelope(&self) -> Option<Envelope<T>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("failed to read document '{}': {e}", self.name);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!("corrupt document '{}', using default: {e}", self.name);
                None
            }
        }
    }

    /// Full-replace the document. Serializes into a uniquely named
    /// `.tmp` sibling, then renames over the live file. Unique temp
    /// names keep the rename atomic for any interleaving of writers.
    pub async fn write(&self, snapshot: &T) -> Result<(), StoreError> {
        let envelope = Envelope {
            last_updated: Utc::now(),
            data: snapshot,
        };
        let json =
            serde_json::to_string_pretty(&envelope).map_err(|source| StoreError::Serialize {
                name: self.name.clone(),
                source,
            })?;

        let io_err = |source| StoreError::Write {
            name: self.name.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)
    }

    /// Read-modify-write. Returns the written snapshot, so a subsequent
    /// `read` observes exactly this result.
    pub async fn update<F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut T),
    {
        let mut snapshot = self.read().await;
        f(&mut snapshot);
        self.write(&snapshot).await?;
        Ok(snapshot)
    }
}

/// Read-through cache on top of the cache collection. Entries past the
/// TTL are reported absent; nothing evicts them in the background.
pub struct CacheStore {
    inner: Collection<CacheDoc>,
}

impl CacheStore {
    fn new(dir: &Path) -> Self {
        Self {
            inner: Collection::new(dir, "cache"),
        }
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let doc = self.inner.read().await;
        let entry = doc.entries.get(key)?;
        if Utc::now() - entry.cached_at > Duration::hours(CACHE_TTL_HOURS) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.inner
            .update(|doc| {
                doc.entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value,
                        cached_at: Utc::now(),
                    },
                );
            })
            .await?;
        Ok(())
    }

    /// Raw access for tests and maintenance tooling.
    pub fn collection(&self) -> &Collection<CacheDoc> {
        &self.inner
    }
}

/// The seven document collections, rooted at one data directory.
///
/// Constructed once and passed into every component; no component touches
/// the backing files directly.
pub struct StorageContext {
    pub messages: Collection<MessagesDoc>,
    pub users: Collection<UsersDoc>,
    pub channels: Collection<ChannelsDoc>,
    pub tags: Collection<TagsDoc>,
    pub summaries: Collection<SummariesDoc>,
    pub learning: Collection<LearningDoc>,
    pub cache: CacheStore,
}

impl StorageContext {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            messages: Collection::new(data_dir, "messages"),
            users: Collection::new(data_dir, "users"),
            channels: Collection::new(data_dir, "channels"),
            tags: Collection::new(data_dir, "tags"),
            summaries: Collection::new(data_dir, "summaries"),
            learning: Collection::new(data_dir, "corrections"),
            cache: CacheStore::new(data_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teampulse_schema::{Message, Tag, TagCategory};

    fn msg(id: &str) -> Message {
        Message {
            id: id.into(),
            channel_id: "C1".into(),
            user_id: "U1".into(),
            text: "hello".into(),
            ts: Utc::now(),
            reactions: vec![],
            thread_ts: None,
            tags: vec![],
            importance: None,
            squad: None,
        }
    }

    #[tokio::test]
    async fn read_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let coll: Collection<MessagesDoc> = Collection::new(dir.path(), "messages");
        let doc = coll.read().await;
        assert!(doc.messages.is_empty());
        assert!(coll.last_updated().await.is_none());
    }

    #[tokio::test]
    async fn update_then_read_observes_result() {
        let dir = tempfile::tempdir().unwrap();
        let coll: Collection<MessagesDoc> = Collection::new(dir.path(), "messages");

        let written = coll
            .update(|doc| {
                doc.messages.insert("C1-1".into(), msg("C1-1"));
            })
            .await
            .unwrap();
        assert_eq!(written.messages.len(), 1);

        let read_back = coll.read().await;
        assert_eq!(read_back.messages.len(), 1);
        assert!(read_back.messages.contains_key("C1-1"));
        assert!(coll.last_updated().await.is_some());
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let coll: Collection<TagsDoc> = Collection::new(dir.path(), "tags");
        coll.update(|doc| {
            doc.tags
                .insert("infra".into(), Tag::new("infra", TagCategory::Keyword, 0.8));
        })
        .await
        .unwrap();

        tokio::fs::write(dir.path().join("tags.json"), "{not json")
            .await
            .unwrap();
        let doc = coll.read().await;
        assert!(doc.tags.is_empty());
    }

    #[tokio::test]
    async fn leftover_temp_file_never_shadows_committed_document() {
        let dir = tempfile::tempdir().unwrap();
        let coll: Collection<MessagesDoc> = Collection::new(dir.path(), "messages");
        coll.update(|doc| {
            doc.messages.insert("C1-1".into(), msg("C1-1"));
        })
        .await
        .unwrap();

        // Simulate a crash after the temp write but before the rename.
        tokio::fs::write(
            dir.path().join("messages.json.tmp"),
            r#"{"lastUpdated":"2025-01-01T00:00:00Z","data":{"messages":{}}}"#,
        )
        .await
        .unwrap();

        let doc = coll.read().await;
        assert_eq!(doc.messages.len(), 1);
        assert!(doc.messages.contains_key("C1-1"));
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_collide_on_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let coll: Collection<MessagesDoc> = Collection::new(dir.path(), "messages");

        // Every writer must commit cleanly; which snapshot survives is
        // last-write-wins, but no interleaving may surface an error.
        let (a, b, c, d) = tokio::join!(
            coll.update(|doc| {
                doc.messages.insert("C1-1".into(), msg("C1-1"));
            }),
            coll.update(|doc| {
                doc.messages.insert("C1-2".into(), msg("C1-2"));
            }),
            coll.update(|doc| {
                doc.messages.insert("C1-3".into(), msg("C1-3"));
            }),
            coll.update(|doc| {
                doc.messages.insert("C1-4".into(), msg("C1-4"));
            }),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        d.unwrap();

        let doc = coll.read().await;
        assert!(!doc.messages.is_empty());
    }

    #[tokio::test]
    async fn write_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let coll: Collection<MessagesDoc> = Collection::new(dir.path(), "messages");
        coll.update(|doc| {
            doc.messages.insert("C1-1".into(), msg("C1-1"));
            doc.messages.insert("C1-2".into(), msg("C1-2"));
        })
        .await
        .unwrap();

        let mut replacement = MessagesDoc::default();
        replacement.messages.insert("C9-1".into(), msg("C9-1"));
        coll.write(&replacement).await.unwrap();

        let doc = coll.read().await;
        assert_eq!(doc.messages.len(), 1);
        assert!(doc.messages.contains_key("C9-1"));
    }

    #[tokio::test]
    async fn cache_get_fresh_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(dir.path());
        ctx.cache
            .put("summary_2025-06-01", serde_json::json!({"content": "ok"}))
            .await
            .unwrap();

        let hit = ctx.cache.get("summary_2025-06-01").await;
        assert_eq!(hit.unwrap()["content"], "ok");
        assert!(ctx.cache.get("other").await.is_none());
    }

    #[tokio::test]
    async fn cache_entry_past_ttl_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(dir.path());
        ctx.cache
            .put("stale", serde_json::json!("v"))
            .await
            .unwrap();

        // Age the entry past the TTL directly in the backing document.
        ctx.cache
            .collection()
            .update(|doc| {
                let entry = doc.entries.get_mut("stale").unwrap();
                entry.cached_at = Utc::now() - Duration::hours(CACHE_TTL_HOURS + 1);
            })
            .await
            .unwrap();

        assert!(ctx.cache.get("stale").await.is_none());
    }

    #[tokio::test]
    async fn storage_context_collections_are_independent_files() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(dir.path());
        ctx.messages
            .update(|doc| {
                doc.messages.insert("C1-1".into(), msg("C1-1"));
            })
            .await
            .unwrap();

        assert!(dir.path().join("messages.json").exists());
        assert!(!dir.path().join("tags.json").exists());
        assert!(ctx.tags.read().await.tags.is_empty());
    }
}
