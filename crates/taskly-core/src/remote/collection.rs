//! Per-entity remote operations
//!
//! Wraps a `DocumentStore` with the path convention and codec of one entity
//! type. Every operation stands alone: failures are logged here and returned
//! to the caller.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::document::{DocumentPath, FieldFilter, RemoteEntity};
use super::error::{RemoteError, RemoteResult};
use super::store::{DocumentStore, WriteBatch, BATCH_LIMIT};
use crate::models::SyncEntity;

pub struct RemoteCollection<T> {
    store: Arc<dyn DocumentStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RemoteCollection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T: SyncEntity + RemoteEntity> RemoteCollection<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Write the entity under its owner
    ///
    /// Entities without an owner are skipped with a warning; returns whether
    /// anything was written.
    pub async fn save(&self, entity: &T) -> RemoteResult<bool> {
        let Some(user_id) = entity.user_id().filter(|u| !u.is_empty()) else {
            warn!(kind = %T::KIND, id = entity.id(), "Not saving remotely: no owner");
            return Ok(false);
        };

        let path = T::path_for(user_id, entity.id());
        match self.store.set(&path, entity.to_document()).await {
            Ok(()) => {
                debug!(%path, "Saved remote document");
                Ok(true)
            }
            Err(e) => {
                error!(%path, error = %e, "Remote save failed");
                Err(e)
            }
        }
    }

    pub async fn get(&self, id: &str, user_id: &str) -> RemoteResult<Option<T>> {
        let path = T::path_for(user_id, id);
        let doc = self.store.get(&path).await.map_err(|e| {
            error!(%path, error = %e, "Remote get failed");
            e
        })?;
        doc.map(|d| T::from_document(&path, &d)).transpose()
    }

    /// All documents of a user; undecodable documents are skipped
    pub async fn get_all_for_user(
        &self,
        user_id: &str,
        filter: Option<&FieldFilter>,
    ) -> RemoteResult<Vec<T>> {
        let collection = T::collection_for(user_id);
        let docs = self.store.query(&collection, filter).await.map_err(|e| {
            error!(%collection, error = %e, "Remote query failed");
            e
        })?;

        let mut entities = Vec::with_capacity(docs.len());
        for doc in docs {
            match T::from_document(&doc.path, &doc.data) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!(path = %doc.path, error = %e, "Skipping undecodable document"),
            }
        }
        Ok(entities)
    }

    pub async fn delete_one(&self, id: &str, user_id: &str) -> RemoteResult<()> {
        let path = T::path_for(user_id, id);
        self.store.delete(&path).await.map_err(|e| {
            error!(%path, error = %e, "Remote delete failed");
            e
        })
    }

    /// Delete every document of a user in batches of at most `BATCH_LIMIT`
    ///
    /// Each chunk is committed on its own; a failed chunk does not stop the
    /// remaining ones and is reported as `PartialBatch`.
    pub async fn delete_all_for_user(&self, user_id: &str) -> RemoteResult<usize> {
        let collection = T::collection_for(user_id);
        let docs = self.store.query(&collection, None).await.map_err(|e| {
            error!(%collection, error = %e, "Remote query failed");
            e
        })?;
        let paths: Vec<DocumentPath> = docs.into_iter().map(|d| d.path).collect();
        self.delete_paths(paths).await
    }

    /// Batched delete of selected ids of one user
    pub async fn delete_ids(&self, user_id: &str, ids: &[String]) -> RemoteResult<usize> {
        let paths = ids.iter().map(|id| T::path_for(user_id, id)).collect();
        self.delete_paths(paths).await
    }

    async fn delete_paths(&self, paths: Vec<DocumentPath>) -> RemoteResult<usize> {
        let mut deleted = 0;
        let mut failed = 0;

        for chunk in paths.chunks(BATCH_LIMIT) {
            let mut batch = WriteBatch::new();
            for path in chunk {
                batch.delete(path.clone());
            }

            match self.store.commit(batch).await {
                Ok(()) => deleted += chunk.len(),
                Err(e) => {
                    warn!(kind = %T::KIND, size = chunk.len(), error = %e, "Batch delete chunk failed");
                    failed += chunk.len();
                }
            }
        }

        if failed > 0 {
            return Err(RemoteError::PartialBatch { deleted, failed });
        }
        debug!(kind = %T::KIND, deleted, "Batch delete complete");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, Task};
    use crate::remote::MemoryDocumentStore;

    fn owned(title: &str, user: &str) -> Task {
        let mut t = Task::new(title);
        t.user_id = Some(user.to_string());
        t
    }

    fn setup() -> (Arc<MemoryDocumentStore>, RemoteCollection<Task>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let remote = RemoteCollection::new(store.clone() as Arc<dyn DocumentStore>);
        (store, remote)
    }

    #[tokio::test]
    async fn test_save_without_owner_is_skipped() {
        let (store, remote) = setup();
        let task = Task::new("local only");

        assert!(!remote.save(&task).await.unwrap());
        assert_eq!(store.count(&Task::collection_for("")), 0);
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let (store, remote) = setup();
        let task = owned("synced", "u1");

        assert!(remote.save(&task).await.unwrap());
        assert!(store.contains(&Task::path_for("u1", &task.id)));
        assert_eq!(remote.get(&task.id, "u1").await.unwrap(), Some(task.clone()));
        assert!(remote.get(&task.id, "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_skips_bad_documents() {
        let (store, remote) = setup();
        remote.save(&owned("one", "u1")).await.unwrap();
        remote.save(&owned("two", "u1")).await.unwrap();
        store
            .set(&Task::path_for("u1", "broken"), Default::default())
            .await
            .unwrap();

        let all = remote.get_all_for_user("u1", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filter = FieldFilter::eq("Title", "two");
        let filtered = remote.get_all_for_user("u1", Some(&filter)).await.unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_all_chunks_batches() {
        let (store, remote) = setup();
        let projects: RemoteCollection<Project> = RemoteCollection::new(store.clone());

        for i in 0..(BATCH_LIMIT + 10) {
            remote.save(&owned(&format!("t{i}"), "u1")).await.unwrap();
        }
        let mut p = Project::new("keep");
        p.user_id = Some("u1".into());
        projects.save(&p).await.unwrap();

        let deleted = remote.delete_all_for_user("u1").await.unwrap();
        assert_eq!(deleted, BATCH_LIMIT + 10);
        assert_eq!(store.committed_batches(), vec![BATCH_LIMIT, 10]);
        assert_eq!(store.count(&Task::collection_for("u1")), 0);
        assert_eq!(store.count(&Project::collection_for("u1")), 1);
    }

    #[tokio::test]
    async fn test_remote_errors_propagate() {
        let (store, remote) = setup();
        store.set_offline(true);

        assert!(remote.save(&owned("t", "u1")).await.is_err());
        assert!(remote.get_all_for_user("u1", None).await.is_err());
        assert!(remote.delete_one("t", "u1").await.is_err());
    }
}
