//! The record store: local, durable product documents.
//!
//! [`RecordStore`] is the whole storage contract the catalog relies on.
//! Writes are keyed replacements only. There is no insert that could fail on
//! a duplicate id, and removing an absent id is not an error, so every write
//! is safe to retry.
//!
//! [`SyncJournal`] persists the sync bookkeeping kept beside the documents:
//! the outbox of unacknowledged local writes and the pull cursor.

use crate::error::Result;
use async_trait::async_trait;
use catalog_engine::{PendingOp, Product, ProductId, ProductQuery, Sequence, SyncCursor};
use std::collections::HashMap;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Create the document if absent, otherwise replace it whole.
    async fn upsert(&self, product: &Product) -> Result<()>;

    /// The document stored under `id`, if any.
    async fn find_by_id(&self, id: &str) -> Result<Option<Product>>;

    /// The stored documents among `ids`, keyed by id.
    async fn find_many(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>>;

    /// Documents matching `query`, in storage order.
    async fn query_all(&self, query: &ProductQuery) -> Result<Vec<Product>>;

    /// Remove the document stored under `id`. Returns whether one existed.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Every stored id, in storage order.
    async fn ids(&self) -> Result<Vec<ProductId>>;

    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
pub trait SyncJournal: Send + Sync + 'static {
    /// All persisted pending ops, oldest first.
    async fn load_pending(&self) -> Result<Vec<PendingOp>>;

    /// Persist `op`, replacing the pending op of the same product.
    async fn save_pending(&self, op: &PendingOp) -> Result<()>;

    /// Forget the pending op of `product_id` if it is still `seq`.
    async fn remove_pending(&self, product_id: &str, seq: Sequence) -> Result<()>;

    /// Forget the pending op of `product_id`.
    async fn discard_pending(&self, product_id: &str) -> Result<()>;

    /// The pull cursor of `collection`, or the origin.
    async fn load_cursor(&self, collection: &str) -> Result<SyncCursor>;

    async fn save_cursor(&self, collection: &str, cursor: &SyncCursor) -> Result<()>;
}
