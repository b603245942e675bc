//! In-memory record store.
//!
//! Not durable: everything is lost when the process exits. Used for tests and
//! for `:memory:` configurations. It can also be switched unavailable to
//! exercise storage-fault handling.

use super::{RecordStore, SyncJournal};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use catalog_engine::{PendingOp, Product, ProductId, ProductQuery, Sequence, SyncCursor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Documents {
    /// Ids in insertion order
    order: Vec<ProductId>,
    by_id: HashMap<ProductId, Product>,
}

#[derive(Debug, Default)]
struct Journal {
    pending: HashMap<ProductId, PendingOp>,
    cursors: HashMap<String, SyncCursor>,
}

#[derive(Debug)]
pub struct MemoryRecordStore {
    documents: RwLock<Documents>,
    journal: RwLock<Journal>,
    available: AtomicBool,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Documents::default()),
            journal: RwLock::new(Journal::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every following operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::StoreUnavailable(
                "in-memory store switched off".into(),
            ))
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, product: &Product) -> Result<()> {
        self.check_available()?;
        let mut docs = self.documents.write().await;
        if docs
            .by_id
            .insert(product.id.clone(), product.clone())
            .is_none()
        {
            docs.order.push(product.id.clone());
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Product>> {
        self.check_available()?;
        Ok(self.documents.read().await.by_id.get(id).cloned())
    }

    async fn find_many(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        self.check_available()?;
        let docs = self.documents.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| docs.by_id.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    async fn query_all(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        self.check_available()?;
        let docs = self.documents.read().await;
        Ok(query.apply(docs.order.iter().filter_map(|id| docs.by_id.get(id))))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        self.check_available()?;
        let mut docs = self.documents.write().await;
        if docs.by_id.remove(id).is_some() {
            docs.order.retain(|existing| existing != id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn ids(&self) -> Result<Vec<ProductId>> {
        self.check_available()?;
        Ok(self.documents.read().await.order.clone())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl SyncJournal for MemoryRecordStore {
    async fn load_pending(&self) -> Result<Vec<PendingOp>> {
        self.check_available()?;
        let mut ops: Vec<_> = self.journal.read().await.pending.values().cloned().collect();
        ops.sort_by_key(|op| op.seq);
        Ok(ops)
    }

    async fn save_pending(&self, op: &PendingOp) -> Result<()> {
        self.check_available()?;
        self.journal
            .write()
            .await
            .pending
            .insert(op.product_id.clone(), op.clone());
        Ok(())
    }

    async fn remove_pending(&self, product_id: &str, seq: Sequence) -> Result<()> {
        self.check_available()?;
        let mut journal = self.journal.write().await;
        if journal
            .pending
            .get(product_id)
            .is_some_and(|op| op.seq == seq)
        {
            journal.pending.remove(product_id);
        }
        Ok(())
    }

    async fn discard_pending(&self, product_id: &str) -> Result<()> {
        self.check_available()?;
        self.journal.write().await.pending.remove(product_id);
        Ok(())
    }

    async fn load_cursor(&self, collection: &str) -> Result<SyncCursor> {
        self.check_available()?;
        Ok(self
            .journal
            .read()
            .await
            .cursors
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_cursor(&self, collection: &str, cursor: &SyncCursor) -> Result<()> {
        self.check_available()?;
        self.journal
            .write()
            .await
            .cursors
            .insert(collection.to_string(), cursor.clone());
        Ok(())
    }
}
