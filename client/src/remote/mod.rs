//! Remote collaborators: the document store, blob storage and callable
//! procedures.
//!
//! The catalog only ever talks to these through the traits below. The
//! [`http`] module implements them over a JSON gateway; [`memory`] keeps
//! everything in process for tests and demos.

use async_trait::async_trait;
use catalog_engine::{SyncCursor, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod http;
pub mod memory;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// Remote call errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote store unreachable")]
    Offline,

    #[error("No remote store configured")]
    NotConfigured,

    #[error("Remote request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed remote response: {0}")]
    Decode(String),

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    #[error("Not found remotely: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Offline | RemoteError::Timeout | RemoteError::Http(_) => true,
            RemoteError::Status { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() {
            RemoteError::Offline
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if err.is_builder() {
            RemoteError::InvalidUrl(err.to_string())
        } else {
            RemoteError::Http(err.to_string())
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// One entry of the remote change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Server-assigned, increases with every remote write
    pub stamp: u64,
    pub id: String,
    pub document: Value,
}

impl RemoteChange {
    /// The cursor position just past this change.
    pub fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.stamp, self.id.clone())
    }
}

/// A page of the remote change history, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBatch {
    pub changes: Vec<RemoteChange>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    ArrayContains,
}

/// A field predicate for remote queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Evaluate against a document. Missing fields only match `Ne`.
    pub fn matches(&self, document: &Value) -> bool {
        let Some(actual) = document.get(&self.field) else {
            return self.op == FilterOp::Ne;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Lt => compare(actual, &self.value).is_some_and(|o| o.is_lt()),
            FilterOp::Lte => compare(actual, &self.value).is_some_and(|o| o.is_le()),
            FilterOp::Gt => compare(actual, &self.value).is_some_and(|o| o.is_gt()),
            FilterOp::Gte => compare(actual, &self.value).is_some_and(|o| o.is_ge()),
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|options| options.contains(actual)),
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// One write of an atomic multi-document batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BatchOp {
    Set {
        collection: String,
        id: String,
        document: Value,
    },
    Update {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Remote document/collection store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Insert a document under a server-assigned id and return the id.
    async fn create(&self, collection: &str, document: Value) -> RemoteResult<String>;

    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>>;

    /// Create or replace the document stored under `id`.
    async fn set(&self, collection: &str, id: &str, document: Value) -> RemoteResult<()>;

    /// Merge `fields` into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>)
        -> RemoteResult<()>;

    /// Remove the document. Removing an absent id succeeds.
    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()>;

    async fn query(&self, collection: &str, filters: &[Filter]) -> RemoteResult<Vec<Value>>;

    /// Changes after `cursor`, oldest first, at most `limit` of them.
    async fn changes_since(
        &self,
        collection: &str,
        cursor: &SyncCursor,
        limit: usize,
    ) -> RemoteResult<ChangeBatch>;

    /// Apply every op or none.
    async fn batch_write(&self, ops: Vec<BatchOp>) -> RemoteResult<()>;
}

/// Object storage for images.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store `bytes` at `path` and return its stable download URL.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> RemoteResult<String>;

    /// Remove the object at `path`. Removing an absent object succeeds.
    async fn delete(&self, path: &str) -> RemoteResult<()>;
}

/// Result envelope of a callable procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcedureResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Server-authoritative operations invoked by name.
#[async_trait]
pub trait ProcedureGateway: Send + Sync + 'static {
    async fn call(&self, name: &str, payload: Value) -> RemoteResult<ProcedureResponse>;
}

/// Blob path for an uploaded file: `{category}/{owner}/{now}_{filename}`.
pub fn blob_path(category: &str, owner: &str, filename: &str, now: Timestamp) -> String {
    format!("{category}/{owner}/{now}_{filename}")
}

/// The remote collaborators of one catalog.
#[derive(Clone)]
pub struct RemoteServices {
    pub store: Arc<dyn RemoteStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub procedures: Arc<dyn ProcedureGateway>,
    configured: bool,
}

impl RemoteServices {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        blobs: Arc<dyn BlobStore>,
        procedures: Arc<dyn ProcedureGateway>,
    ) -> Self {
        Self {
            store,
            blobs,
            procedures,
            configured: true,
        }
    }

    /// Local-only operation: every remote call fails with `NotConfigured`.
    pub fn unconfigured() -> Self {
        let none = Arc::new(Unconfigured);
        Self {
            store: none.clone(),
            blobs: none.clone(),
            procedures: none,
            configured: false,
        }
    }

    pub fn http(remote: HttpRemote) -> Self {
        let remote = Arc::new(remote);
        Self::new(remote.clone(), remote.clone(), remote)
    }

    pub fn memory(remote: Arc<MemoryRemote>) -> Self {
        Self::new(remote.clone(), remote.clone(), remote)
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }
}

impl std::fmt::Debug for RemoteServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServices")
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

struct Unconfigured;

#[async_trait]
impl RemoteStore for Unconfigured {
    async fn create(&self, _: &str, _: Value) -> RemoteResult<String> {
        Err(RemoteError::NotConfigured)
    }

    async fn get(&self, _: &str, _: &str) -> RemoteResult<Option<Value>> {
        Err(RemoteError::NotConfigured)
    }

    async fn set(&self, _: &str, _: &str, _: Value) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn update(&self, _: &str, _: &str, _: Map<String, Value>) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn delete(&self, _: &str, _: &str) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn query(&self, _: &str, _: &[Filter]) -> RemoteResult<Vec<Value>> {
        Err(RemoteError::NotConfigured)
    }

    async fn changes_since(&self, _: &str, _: &SyncCursor, _: usize) -> RemoteResult<ChangeBatch> {
        Err(RemoteError::NotConfigured)
    }

    async fn batch_write(&self, _: Vec<BatchOp>) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }
}

#[async_trait]
impl BlobStore for Unconfigured {
    async fn upload(&self, _: &str, _: Vec<u8>, _: &str) -> RemoteResult<String> {
        Err(RemoteError::NotConfigured)
    }

    async fn delete(&self, _: &str) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }
}

#[async_trait]
impl ProcedureGateway for Unconfigured {
    async fn call(&self, _: &str, _: Value) -> RemoteResult<ProcedureResponse> {
        Err(RemoteError::NotConfigured)
    }
}
