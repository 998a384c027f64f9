use std::{error, fmt, result, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub mod batch;
pub mod memory;
pub mod query;
pub mod subscription;

pub use batch::{Precondition, WriteBatch, WriteOp};
pub use memory::MemoryStore;
pub use query::{Direction, Filter, FilterOp, OrderBy, Query};
pub use subscription::Subscription;

/// Schemaless document body.
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self(path.into().trim_matches('/').to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc<S: Into<String>>(&self, id: S) -> DocumentPath {
        DocumentPath::new(self.clone(), id)
    }

    /// A collection nested below a document, e.g. `providers/P1/units`.
    pub fn nested<P, S>(parent: P, parent_id: &str, name: S) -> Self
    where
        P: AsRef<str>,
        S: AsRef<str>,
    {
        Self::new(format!("{}/{}/{}", parent.as_ref(), parent_id, name.as_ref()))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocumentPath {
    pub fn new<S: Into<String>>(collection: CollectionPath, id: S) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as read at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub data: Document,
    /// Store wide write sequence number of the last write to this document.
    pub version: u64,
    /// Store wide write sequence number of the write that created it.
    pub create_sequence: u64,
}

impl DocumentSnapshot {
    pub fn id(&self) -> &str {
        &self.path.id
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        query::lookup(&self.data, name)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.data.clone()))
            .map_err(StoreError::from)
    }
}

#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(DocumentPath),
    AlreadyExists(DocumentPath),
    PreconditionFailed { path: DocumentPath, reason: String },
    Unavailable(String),
    Serialization(Arc<serde_json::Error>),
    NotAnObject,
}

impl error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::NotFound(path) => write!(f, "document {} does not exist", path),
            StoreError::AlreadyExists(path) => {
                write!(f, "document {} already exists", path)
            }
            StoreError::PreconditionFailed { path, reason } => {
                write!(f, "precondition on {} failed: {}", path, reason)
            }
            StoreError::Unavailable(why) => write!(f, "document store unavailable: {}", why),
            StoreError::Serialization(why) => write!(f, "serialization error: {}", why),
            StoreError::NotAnObject => write!(f, "documents must be json objects"),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Serialization(Arc::new(value))
    }
}

pub type Result<T> = result::Result<T, StoreError>;

/// Serializes a value into a document body.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}

/// A networked collection store with live queries and atomic conditional
/// batches. Cloning yields another handle to the same store.
#[async_trait]
pub trait DocumentStore: Clone + Send + Sync + Sized + 'static {
    async fn get(&self, path: &DocumentPath) -> Result<Option<DocumentSnapshot>>;

    /// One-shot read of a query's current result.
    async fn query(&self, query: Query) -> Result<Vec<DocumentSnapshot>>;

    /// Live read of a query. The subscription holds the current result right
    /// away and receives the full new result after every write that changes
    /// it. Dropping the subscription unsubscribes.
    async fn subscribe(&self, query: Query) -> Result<Subscription>;

    /// Creates a document with a fresh id.
    async fn add(&self, collection: &CollectionPath, data: Document) -> Result<DocumentPath>;

    /// Shallow merges `patch` into an existing document.
    async fn update(&self, path: &DocumentPath, patch: Document) -> Result<()>;

    async fn delete(&self, path: &DocumentPath) -> Result<()>;

    /// Applies all writes of the batch if, and only if, all of its
    /// preconditions hold and every write is valid. Otherwise nothing is
    /// written.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
