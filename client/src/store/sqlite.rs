//! SQLite-backed record store.

use super::{RecordStore, SyncJournal};
use crate::db::{self, Pool};
use crate::error::Result;
use async_trait::async_trait;
use catalog_engine::{PendingOp, Product, ProductId, ProductQuery, Sequence, SyncCursor};
use std::collections::HashMap;

/// Record store and sync journal in one SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: Pool,
    durable: bool,
}

impl SqliteRecordStore {
    /// Open the database file at `path` and bring its schema up to date.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = db::create_pool(path).await?;
        db::run_migrations(&pool).await?;
        tracing::info!(path = %path, "Opened record store");
        Ok(Self {
            pool,
            durable: true,
        })
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = db::create_memory_pool().await?;
        db::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            durable: false,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Close the pool. Later operations fail with a storage error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, product: &Product) -> Result<()> {
        db::products::upsert_product(&self.pool, product).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Product>> {
        Ok(db::products::get_product(&self.pool, id).await?)
    }

    async fn find_many(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        let found = db::products::get_products(&self.pool, ids).await?;
        Ok(found.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    async fn query_all(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        let mut products = db::products::list_products(&self.pool).await?;
        if !query.is_all() {
            products.retain(|p| query.matches(p));
        }
        Ok(products)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(db::products::delete_product(&self.pool, id).await?)
    }

    async fn ids(&self) -> Result<Vec<ProductId>> {
        Ok(db::products::list_product_ids(&self.pool).await?)
    }

    fn is_durable(&self) -> bool {
        self.durable
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[async_trait]
impl SyncJournal for SqliteRecordStore {
    async fn load_pending(&self) -> Result<Vec<PendingOp>> {
        Ok(db::journal::load_pending(&self.pool).await?)
    }

    async fn save_pending(&self, op: &PendingOp) -> Result<()> {
        db::journal::save_pending(&self.pool, op).await?;
        Ok(())
    }

    async fn remove_pending(&self, product_id: &str, seq: Sequence) -> Result<()> {
        db::journal::remove_pending(&self.pool, product_id, seq).await?;
        Ok(())
    }

    async fn discard_pending(&self, product_id: &str) -> Result<()> {
        db::journal::discard_pending(&self.pool, product_id).await?;
        Ok(())
    }

    async fn load_cursor(&self, collection: &str) -> Result<SyncCursor> {
        match db::journal::load_cursor(&self.pool, collection).await? {
            Some(token) => Ok(SyncCursor::from_token(&token)?),
            None => Ok(SyncCursor::origin()),
        }
    }

    async fn save_cursor(&self, collection: &str, cursor: &SyncCursor) -> Result<()> {
        db::journal::save_cursor(&self.pool, collection, &cursor.to_token()).await?;
        Ok(())
    }
}
