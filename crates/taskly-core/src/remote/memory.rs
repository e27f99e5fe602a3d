//! In-process document store
//!
//! Implements the full `DocumentStore` contract, realtime listeners included,
//! without a network. Used for local-only mode and for tests, which can
//! inject failures globally (`set_offline`) or per path prefix (`fail_path`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::document::{CollectionPath, Document, DocumentPath, FieldFilter, RemoteDocument};
use super::error::{RemoteError, RemoteResult};
use super::store::{BatchWrite, DocumentStore, Subscription, WriteBatch};

struct Listener {
    collection: CollectionPath,
    filter: Option<FieldFilter>,
    tx: mpsc::UnboundedSender<Vec<RemoteDocument>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<DocumentPath, Document>,
    listeners: Vec<Listener>,
    offline: bool,
    failing_prefixes: Vec<String>,
    committed_batches: Vec<usize>,
}

impl Inner {
    fn check(&self, path: &str) -> RemoteResult<()> {
        if self.offline {
            return Err(RemoteError::Unavailable("memory store is offline".into()));
        }
        if self.failing_prefixes.iter().any(|p| path.starts_with(p)) {
            return Err(RemoteError::Status {
                path: path.to_string(),
                status: 500,
                body: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn query(&self, collection: &CollectionPath, filter: Option<&FieldFilter>) -> Vec<RemoteDocument> {
        self.docs
            .iter()
            .filter(|(path, _)| path.parent() == *collection)
            .filter(|(_, doc)| filter.map_or(true, |f| f.matches(doc)))
            .map(|(path, doc)| RemoteDocument {
                path: path.clone(),
                data: doc.clone(),
            })
            .collect()
    }

    /// Push fresh snapshots to listeners on the touched collections
    fn notify(&mut self, touched: &BTreeSet<CollectionPath>) {
        self.listeners
            .retain(|l| !l.cancel.is_cancelled() && !l.tx.is_closed());

        let snapshots: Vec<(usize, Vec<RemoteDocument>)> = self
            .listeners
            .iter()
            .enumerate()
            .filter(|(_, l)| touched.contains(&l.collection))
            .map(|(i, l)| (i, self.query(&l.collection, l.filter.as_ref())))
            .collect();

        for (i, snapshot) in snapshots {
            let _ = self.listeners[i].tx.send(snapshot);
        }
    }
}

/// `DocumentStore` held entirely in memory
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every operation fail with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make operations on paths starting with `prefix` fail
    pub fn fail_path(&self, prefix: impl Into<String>) {
        self.lock().failing_prefixes.push(prefix.into());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.offline = false;
        inner.failing_prefixes.clear();
    }

    pub fn contains(&self, path: &DocumentPath) -> bool {
        self.lock().docs.contains_key(path)
    }

    pub fn document(&self, path: &DocumentPath) -> Option<Document> {
        self.lock().docs.get(path).cloned()
    }

    /// Number of documents directly inside `collection`
    pub fn count(&self, collection: &CollectionPath) -> usize {
        self.lock().query(collection, None).len()
    }

    /// Sizes of the batches committed so far
    pub fn committed_batches(&self) -> Vec<usize> {
        self.lock().committed_batches.clone()
    }

    pub fn listener_count(&self) -> usize {
        let mut inner = self.lock();
        inner
            .listeners
            .retain(|l| !l.cancel.is_cancelled() && !l.tx.is_closed());
        inner.listeners.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn set(&self, path: &DocumentPath, doc: Document) -> RemoteResult<()> {
        let mut inner = self.lock();
        inner.check(path.as_str())?;
        inner.docs.insert(path.clone(), doc);
        inner.notify(&BTreeSet::from([path.parent()]));
        Ok(())
    }

    async fn update(&self, path: &DocumentPath, fields: Document) -> RemoteResult<()> {
        let mut inner = self.lock();
        inner.check(path.as_str())?;
        let Some(existing) = inner.docs.get_mut(path) else {
            return Err(RemoteError::NotFound(path.to_string()));
        };
        existing.extend(fields);
        inner.notify(&BTreeSet::from([path.parent()]));
        Ok(())
    }

    async fn get(&self, path: &DocumentPath) -> RemoteResult<Option<Document>> {
        let inner = self.lock();
        inner.check(path.as_str())?;
        Ok(inner.docs.get(path).cloned())
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> RemoteResult<Vec<RemoteDocument>> {
        let inner = self.lock();
        inner.check(collection.as_str())?;
        Ok(inner.query(collection, filter))
    }

    async fn delete(&self, path: &DocumentPath) -> RemoteResult<()> {
        let mut inner = self.lock();
        inner.check(path.as_str())?;
        if inner.docs.remove(path).is_some() {
            inner.notify(&BTreeSet::from([path.parent()]));
        }
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()> {
        batch.check_limit()?;
        let mut inner = self.lock();

        // All or nothing
        for write in batch.writes() {
            let (BatchWrite::Set(path, _) | BatchWrite::Delete(path)) = write;
            inner.check(path.as_str())?;
        }

        let size = batch.len();
        let mut touched = BTreeSet::new();
        for write in batch.into_writes() {
            match write {
                BatchWrite::Set(path, doc) => {
                    touched.insert(path.parent());
                    inner.docs.insert(path, doc);
                }
                BatchWrite::Delete(path) => {
                    touched.insert(path.parent());
                    inner.docs.remove(&path);
                }
            }
        }
        inner.committed_batches.push(size);
        inner.notify(&touched);
        debug!(size, "Committed batch");
        Ok(())
    }

    async fn listen(
        &self,
        collection: &CollectionPath,
        filter: Option<FieldFilter>,
    ) -> RemoteResult<Subscription> {
        let mut inner = self.lock();
        inner.check(collection.as_str())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let _ = tx.send(inner.query(collection, filter.as_ref()));

        inner.listeners.push(Listener {
            collection: collection.clone(),
            filter,
            tx,
            cancel: cancel.clone(),
        });
        Ok(Subscription::new(rx, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(user: &str) -> Document {
        let mut d = Document::new();
        d.insert("userId".into(), json!(user));
        d
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("tasks/u1/userTasks/t1");

        store.set(&path, doc("u1")).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), Some(doc("u1")));

        store.delete(&path).await.unwrap();
        assert!(store.get(&path).await.unwrap().is_none());
        // Deleting again is fine
        store.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_only_direct_children() {
        let store = MemoryDocumentStore::new();
        store.set(&DocumentPath::new("s/a"), doc("u1")).await.unwrap();
        store.set(&DocumentPath::new("s/b"), doc("u2")).await.unwrap();
        store.set(&DocumentPath::new("s/a/nested/c"), doc("u1")).await.unwrap();

        let all = store.query(&CollectionPath::new("s"), None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filter = FieldFilter::eq("userId", "u1");
        let mine = store.query(&CollectionPath::new("s"), Some(&filter)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].path.id(), "a");
    }

    #[tokio::test]
    async fn test_update_merges_and_requires_existing() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("active_sessions/u1");

        let err = store.update(&path, doc("u1")).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));

        store.set(&path, doc("u1")).await.unwrap();
        let mut fields = Document::new();
        fields.insert("deviceId".into(), json!("d1"));
        store.update(&path, fields).await.unwrap();

        let stored = store.get(&path).await.unwrap().unwrap();
        assert_eq!(stored["userId"], json!("u1"));
        assert_eq!(stored["deviceId"], json!("d1"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryDocumentStore::new();
        let path = DocumentPath::new("tasks/u1/userTasks/t1");

        store.set_offline(true);
        assert!(store.set(&path, doc("u1")).await.unwrap_err().is_transient());

        store.clear_failures();
        store.fail_path("tasks/u1");
        assert!(store.set(&path, doc("u1")).await.is_err());
        assert!(store
            .set(&DocumentPath::new("tasks/u2/userTasks/t1"), doc("u2"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let store = MemoryDocumentStore::new();
        store.fail_path("s/bad");

        let mut batch = WriteBatch::new();
        batch
            .set(DocumentPath::new("s/good"), doc("u1"))
            .set(DocumentPath::new("s/bad"), doc("u1"));
        assert!(store.commit(batch).await.is_err());
        assert!(!store.contains(&DocumentPath::new("s/good")));
        assert!(store.committed_batches().is_empty());
    }

    #[tokio::test]
    async fn test_listen_delivers_initial_and_changes() {
        let store = MemoryDocumentStore::new();
        let collection = CollectionPath::new("active_sessions");
        store.set(&collection.doc("u1"), doc("u1")).await.unwrap();

        let mut sub = store
            .listen(&collection, Some(FieldFilter::eq("userId", "u1")))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().len(), 1);

        // Writes to other users still produce a snapshot of this query
        store.set(&collection.doc("u2"), doc("u2")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().len(), 1);

        store.delete(&collection.doc("u1")).await.unwrap();
        assert!(sub.next().await.unwrap().is_empty());

        assert_eq!(store.listener_count(), 1);
        drop(sub);
        assert_eq!(store.listener_count(), 0);
    }
}
