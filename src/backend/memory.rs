use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{RecordStore, Snapshot, StoreError, Subscription};
use crate::model::RawRecord;
use crate::util::write_atomic;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    id: String,
    fields: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    collections: BTreeMap<String, Vec<StoredDoc>>,
}

struct Subscriber {
    id: u64,
    collection: String,
    tx: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct Inner {
    data: StoreFile,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    injected: VecDeque<StoreError>,
    deny_writes: bool,
    persist_path: Option<PathBuf>,
}

impl Inner {
    fn snapshot(&self, collection: &str) -> Snapshot {
        self.data
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|doc| RawRecord::new(doc.id.clone(), doc.fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_write(&mut self) -> Result<(), StoreError> {
        if let Some(err) = self.injected.pop_front() {
            return Err(err);
        }
        if self.deny_writes {
            return Err(StoreError::PermissionDenied);
        }
        Ok(())
    }

    fn stored(&self, collection: &str) -> Vec<StoredDoc> {
        self.data
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Install `docs` as the new contents of `collection`. Nothing changes in
    /// memory unless the write reached disk first.
    fn commit(&mut self, collection: &str, docs: Vec<StoredDoc>) -> Result<(), StoreError> {
        if let Some(path) = &self.persist_path {
            let mut next = StoreFile {
                collections: self.data.collections.clone(),
            };
            next.collections.insert(collection.to_string(), docs);
            let bytes = serde_json::to_vec_pretty(&next)
                .map_err(|err| StoreError::Persist(err.to_string()))?;
            write_atomic(path, &bytes).map_err(|err| StoreError::Persist(err.to_string()))?;
            self.data = next;
        } else {
            self.data.collections.insert(collection.to_string(), docs);
        }
        let snapshot = self.snapshot(collection);
        self.subscribers.retain(|sub| {
            sub.collection != collection || sub.tx.send(snapshot.clone()).is_ok()
        });
        Ok(())
    }
}

/// In-process document store. Every write fans a full snapshot out to the
/// collection's subscribers; writes can optionally be persisted to a JSON file.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from `path` (empty if the file does not exist) and
    /// persist every later write back to it.
    pub fn open(path: &Path) -> AppResult<Self> {
        let data = if path.exists() {
            let bytes = fs::read(path).map_err(|err| {
                AppError::from(err).with_context("path", path.display().to_string())
            })?;
            serde_json::from_slice::<StoreFile>(&bytes).map_err(|err| {
                AppError::from(err).with_context("path", path.display().to_string())
            })?
        } else {
            StoreFile::default()
        };
        info!(
            target: "stockroom",
            event = "store_opened",
            path = %path.display(),
            collections = data.collections.len()
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                persist_path: Some(path.to_path_buf()),
                ..Inner::default()
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next write fail with `err`. Queued failures are consumed in order.
    pub fn inject_failure(&self, err: StoreError) {
        self.lock().injected.push_back(err);
    }

    /// Reject every write with `PermissionDenied` while set.
    pub fn set_deny_writes(&self, deny: bool) {
        self.lock().deny_writes = deny;
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|sub| !sub.tx.is_closed())
            .count()
    }

    pub fn documents(&self, collection: &str) -> Snapshot {
        self.lock().snapshot(collection)
    }

    fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.check_write()?;
        let id = Uuid::now_v7().simple().to_string();
        let mut docs = inner.stored(collection);
        docs.push(StoredDoc {
            id: id.clone(),
            fields,
        });
        inner.commit(collection, docs)?;
        debug!(target: "stockroom", event = "store_created", collection, id = %id);
        Ok(id)
    }

    fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_write()?;
        let mut docs = inner.stored(collection);
        let doc = docs
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.fields.extend(fields);
        inner.commit(collection, docs)?;
        debug!(target: "stockroom", event = "store_updated", collection, id);
        Ok(())
    }

    fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_write()?;
        let mut docs = inner.stored(collection);
        let before = docs.len();
        docs.retain(|doc| doc.id != id);
        if docs.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        inner.commit(collection, docs)?;
        debug!(target: "stockroom", event = "store_deleted", collection, id);
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn subscribe(&self, collection: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        let _ = tx.send(inner.snapshot(collection));
        inner.subscribers.push(Subscriber {
            id,
            collection: collection.to_string(),
            tx,
        });
        drop(inner);

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.subscribers.retain(|sub| sub.id != id);
            }
        }))
    }

    fn create<'a>(
        &'a self,
        collection: &'a str,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        async move { self.insert(collection, fields) }.boxed()
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: Map<String, Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move { self.merge(collection, id, fields) }.boxed()
    }

    fn delete<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move { self.remove(collection, id) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quantity_patch;
    use serde_json::json;
    use tempfile::tempdir;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn subscribe_delivers_current_contents_then_changes() {
        let store = MemoryStore::new();
        let id = store
            .create("inventory", fields(json!({ "code": "A1", "quantity": 1 })))
            .await
            .unwrap();

        let mut sub = store.subscribe("inventory").unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, id);

        store
            .update("inventory", &id, quantity_patch(9))
            .await
            .unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(second[0].data.get("quantity"), Some(&json!(9)));
        assert_eq!(second[0].data.get("code"), Some(&json!("A1")));
    }

    #[tokio::test]
    async fn other_collections_do_not_notify() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("inventory").unwrap();
        assert_eq!(sub.try_next(), Some(Vec::new()));
        store.create("audit", Map::new()).await.unwrap();
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn dropping_subscription_detaches_it() {
        let store = MemoryStore::new();
        let sub = store.subscribe("inventory").unwrap();
        assert_eq!(store.subscriber_count(), 1);
        sub.close();
        assert_eq!(store.subscriber_count(), 0);
        store.create("inventory", Map::new()).await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = MemoryStore::new();
        store.inject_failure(StoreError::Unavailable("offline".into()));
        let err = store.create("inventory", Map::new()).await.unwrap_err();
        assert_eq!(err, StoreError::Unavailable("offline".into()));
        assert!(store.create("inventory", Map::new()).await.is_ok());
    }

    #[tokio::test]
    async fn missing_documents_are_reported() {
        let store = MemoryStore::new();
        assert_eq!(
            store.update("inventory", "nope", Map::new()).await,
            Err(StoreError::NotFound("nope".into()))
        );
        assert_eq!(
            store.delete("inventory", "nope").await,
            Err(StoreError::NotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn denied_writes_leave_contents_untouched() {
        let store = MemoryStore::new();
        store.set_deny_writes(true);
        assert_eq!(
            store.create("inventory", Map::new()).await,
            Err(StoreError::PermissionDenied)
        );
        assert!(store.documents("inventory").is_empty());
    }

    #[tokio::test]
    async fn failed_persist_leaves_contents_and_subscribers_untouched() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        let store = MemoryStore::open(&data_dir.join("store.json")).unwrap();
        let id = store
            .create("inventory", fields(json!({ "code": "A1", "quantity": 4 })))
            .await
            .unwrap();
        let mut sub = store.subscribe("inventory").unwrap();
        assert_eq!(sub.try_next().map(|snapshot| snapshot.len()), Some(1));

        fs::remove_dir_all(&data_dir).unwrap();

        let err = store
            .create("inventory", fields(json!({ "code": "B1" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Persist(_)), "{err:?}");
        assert!(matches!(
            store.update("inventory", &id, quantity_patch(9)).await,
            Err(StoreError::Persist(_))
        ));
        assert!(matches!(
            store.delete("inventory", &id).await,
            Err(StoreError::Persist(_))
        ));

        let docs = store.documents("inventory");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].data.get("quantity"), Some(&json!(4)));
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn persisted_store_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::open(&path).unwrap();
        let id = store
            .create("inventory", fields(json!({ "code": "B2" })))
            .await
            .unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).unwrap();
        let docs = reopened.documents("inventory");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
    }
}
