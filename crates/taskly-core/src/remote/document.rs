//! Remote documents and paths
//!
//! Entities live at `{collection}/{userId}/{userCollection}/{id}`: one
//! top-level collection per entity type, sharded by owning user.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RemoteResult;

/// A remote document body
pub type Document = serde_json::Map<String, Value>;

/// Slash-separated path to a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(path.as_ref().trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, the document id
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection containing this document
    pub fn parent(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_string()),
            None => CollectionPath(String::new()),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slash-separated path to a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(path.as_ref().trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, id))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document together with its path, as returned by queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub path: DocumentPath,
    pub data: Document,
}

/// Equality filter on a top-level document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

/// Conversion between an entity and its remote document
pub trait RemoteEntity: Sized {
    /// Top-level collection, e.g. `tasks`
    const COLLECTION: &'static str;
    /// Per-user subcollection, e.g. `userTasks`
    const USER_COLLECTION: &'static str;

    fn to_document(&self) -> Document;
    fn from_document(path: &DocumentPath, doc: &Document) -> RemoteResult<Self>;

    /// `{collection}/{user_id}/{userCollection}`
    fn collection_for(user_id: &str) -> CollectionPath {
        CollectionPath(format!(
            "{}/{}/{}",
            Self::COLLECTION,
            user_id,
            Self::USER_COLLECTION
        ))
    }

    fn path_for(user_id: &str, id: &str) -> DocumentPath {
        Self::collection_for(user_id).doc(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_path_parts() {
        let path = DocumentPath::new("/tasks/u1/userTasks/t1/");
        assert_eq!(path.as_str(), "tasks/u1/userTasks/t1");
        assert_eq!(path.id(), "t1");
        assert_eq!(path.parent(), CollectionPath::new("tasks/u1/userTasks"));
    }

    #[test]
    fn test_collection_doc() {
        let collection = CollectionPath::new("active_sessions");
        assert_eq!(collection.doc("u1").as_str(), "active_sessions/u1");
        assert_eq!(collection.doc("u1").parent(), collection);
    }

    #[test]
    fn test_field_filter() {
        let mut doc = Document::new();
        doc.insert("userId".into(), json!("u1"));

        assert!(FieldFilter::eq("userId", "u1").matches(&doc));
        assert!(!FieldFilter::eq("userId", "u2").matches(&doc));
        assert!(!FieldFilter::eq("deviceId", "d1").matches(&doc));
    }
}
