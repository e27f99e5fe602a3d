//! Remote document store contract
//!
//! A backend stores JSON documents by path, answers equality queries on a
//! collection, commits bounded write batches, and pushes realtime snapshots
//! of a query to subscribers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::document::{CollectionPath, Document, DocumentPath, FieldFilter, RemoteDocument};
use super::error::{RemoteError, RemoteResult};

/// Maximum writes per committed batch
pub const BATCH_LIMIT: usize = 450;

/// One write inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    Set(DocumentPath, Document),
    Delete(DocumentPath),
}

/// A group of writes committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<BatchWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocumentPath, doc: Document) -> &mut Self {
        self.writes.push(BatchWrite::Set(path, doc));
        self
    }

    pub fn delete(&mut self, path: DocumentPath) -> &mut Self {
        self.writes.push(BatchWrite::Delete(path));
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[BatchWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<BatchWrite> {
        self.writes
    }

    /// Reject batches over the provider limit before sending
    pub fn check_limit(&self) -> RemoteResult<()> {
        if self.writes.len() > BATCH_LIMIT {
            return Err(RemoteError::BatchTooLarge {
                size: self.writes.len(),
                limit: BATCH_LIMIT,
            });
        }
        Ok(())
    }
}

/// Live query subscription
///
/// Each item is the full result set of the query after a change. Dropping
/// the subscription stops the underlying watch.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Vec<RemoteDocument>>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Vec<RemoteDocument>>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next snapshot; `None` once the watch has ended
    pub async fn next(&mut self) -> Option<Vec<RemoteDocument>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Backend for the remote document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite a document
    async fn set(&self, path: &DocumentPath, doc: Document) -> RemoteResult<()>;

    /// Merge fields into an existing document; `NotFound` if it is missing
    async fn update(&self, path: &DocumentPath, fields: Document) -> RemoteResult<()>;

    async fn get(&self, path: &DocumentPath) -> RemoteResult<Option<Document>>;

    /// Documents directly inside `collection`, optionally filtered
    async fn query(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> RemoteResult<Vec<RemoteDocument>>;

    /// Delete a document; deleting a missing document succeeds
    async fn delete(&self, path: &DocumentPath) -> RemoteResult<()>;

    /// Commit up to `BATCH_LIMIT` writes atomically
    async fn commit(&self, batch: WriteBatch) -> RemoteResult<()>;

    /// Subscribe to the result set of a query
    ///
    /// The current result set is delivered first, then one snapshot per change.
    async fn listen(
        &self,
        collection: &CollectionPath,
        filter: Option<FieldFilter>,
    ) -> RemoteResult<Subscription>;
}
