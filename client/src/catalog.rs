//! The catalog service: record store, sync journal and change feed behind
//! one write gate.
//!
//! Every write, local or remote, goes through [`Catalog`] while holding the
//! outbox lock. That serializes writes per id, keeps the persisted journal in
//! step with the in-memory outbox, and makes "is a delete pending for this id"
//! a question with a stable answer for the duration of a pull batch.

use crate::config::FeedSettings;
use crate::error::Result;
use crate::feed::{ChangeFeed, Subscription};
use crate::store::{MemoryRecordStore, RecordStore, SyncJournal};
use catalog_engine::{
    next_stamp, Backoff, Clock, CollectionSchema, Outbox, PendingOp, PendingWrite, Product,
    ProductId, ProductQuery, ReconcileResult, Reconciler, SyncCursor, Timestamp, PRODUCTS,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Catalog {
    store: Arc<dyn RecordStore>,
    journal: Arc<dyn SyncJournal>,
    feed: ChangeFeed,
    outbox: Mutex<Outbox>,
    clock: Arc<dyn Clock>,
    schema: CollectionSchema,
    reconciler_claimed: AtomicBool,
}

impl Catalog {
    /// Open the catalog, restoring unacknowledged writes from the journal.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        journal: Arc<dyn SyncJournal>,
        clock: Arc<dyn Clock>,
        feed: FeedSettings,
    ) -> Result<Arc<Self>> {
        let pending = journal.load_pending().await?;
        if !pending.is_empty() {
            tracing::info!(pending = pending.len(), "Restored pending writes");
        }

        Ok(Arc::new(Self {
            feed: ChangeFeed::new(Arc::clone(&store), feed),
            store,
            journal,
            outbox: Mutex::new(Outbox::restore(pending)),
            clock,
            schema: CollectionSchema::products(),
            reconciler_claimed: AtomicBool::new(false),
        }))
    }

    /// A non-durable catalog over a fresh in-memory store.
    pub async fn in_memory(clock: Arc<dyn Clock>, feed: FeedSettings) -> Result<Arc<Self>> {
        let store = Arc::new(MemoryRecordStore::new());
        Self::open(store.clone(), store, clock, feed).await
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Follow `query` through the change feed.
    pub fn subscribe(&self, query: ProductQuery) -> Subscription {
        self.feed.subscribe(query)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Product>> {
        self.store.find_by_id(id).await
    }

    pub async fn query_all(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        self.store.query_all(query).await
    }

    /// Write `product` locally and queue it for the remote store.
    ///
    /// The stored `updated_at` never moves backwards for an id. Returns the
    /// product as stored.
    pub async fn upsert_local(&self, mut product: Product) -> Result<Product> {
        product.validate()?;
        let now = self.now();
        let mut outbox = self.outbox.lock().await;

        let existing = self.guard(self.store.find_by_id(&product.id).await)?;
        product.updated_at = next_stamp(
            existing.as_ref().map(|p| p.updated_at),
            product.updated_at,
        );
        let replaced_image = existing
            .and_then(|p| p.image_path)
            .filter(|path| product.image_path.as_ref() != Some(path));

        let previous = outbox.get(&product.id).cloned();
        let op = outbox.enqueue_upsert_replacing(product.clone(), replaced_image, now);
        if let Err(err) = self.journal.save_pending(&op).await {
            restore(&mut outbox, &product.id, previous);
            return Err(self.fault(err));
        }
        if let Err(err) = self.store.upsert(&product).await {
            self.rollback(&mut outbox, &product.id, previous).await;
            return Err(self.fault(err));
        }
        let pending = outbox.len();
        drop(outbox);

        tracing::debug!(product_id = %product.id, updated_at = product.updated_at, pending, "Local upsert");
        self.feed.notify();
        Ok(product)
    }

    /// Remove `id` locally and queue the remote delete.
    ///
    /// Until the delete is acknowledged, pulled copies of `id` are ignored.
    /// Returns whether a local document existed.
    pub async fn remove_local(&self, id: &str) -> Result<bool> {
        let now = self.now();
        let mut outbox = self.outbox.lock().await;

        let existing = self.guard(self.store.find_by_id(id).await)?;
        let image_path = existing
            .as_ref()
            .and_then(|p| p.image_path.clone())
            .or_else(|| {
                outbox.get(id).and_then(|op| match &op.write {
                    PendingWrite::Upsert { product } => product.image_path.clone(),
                    PendingWrite::Delete { image_path } => image_path.clone(),
                })
            });

        let previous = outbox.get(id).cloned();
        let op = outbox.enqueue_delete(id, image_path, now);
        if let Err(err) = self.journal.save_pending(&op).await {
            restore(&mut outbox, id, previous);
            return Err(self.fault(err));
        }
        let removed = match self.store.remove(id).await {
            Ok(removed) => removed,
            Err(err) => {
                self.rollback(&mut outbox, id, previous).await;
                return Err(self.fault(err));
            }
        };
        let pending = outbox.len();
        drop(outbox);

        tracing::debug!(product_id = %id, removed, pending, "Local delete");
        self.feed.notify();
        Ok(removed)
    }

    /// Reconcile pulled documents into the store.
    pub async fn apply_remote(&self, incoming: Vec<Product>) -> Result<ReconcileResult> {
        if incoming.is_empty() {
            return Ok(ReconcileResult::default());
        }

        let mut outbox = self.outbox.lock().await;
        let ids: Vec<ProductId> = incoming.iter().map(|p| p.id.clone()).collect();
        let stored = self.guard(self.store.find_many(&ids).await)?;
        let plan = Reconciler::new(&outbox).plan(incoming, &stored);

        for id in &plan.discard_pending {
            self.guard(self.journal.discard_pending(id).await)?;
            outbox.discard(id);
        }

        let mut written = 0;
        for product in &plan.apply {
            if let Err(err) = self.store.upsert(product).await {
                if written > 0 {
                    self.feed.notify();
                }
                return Err(self.fault(err));
            }
            written += 1;
        }
        drop(outbox);

        for conflict in &plan.result.conflicts {
            tracing::info!(
                product_id = %conflict.product_id,
                local = conflict.local_updated_at,
                remote = conflict.remote_updated_at,
                resolution = ?conflict.resolution,
                "Resolved write conflict"
            );
        }
        if !plan.result.suppressed.is_empty() {
            tracing::debug!(ids = ?plan.result.suppressed, "Held back pulled copies of locally deleted products");
        }
        if written > 0 {
            self.feed.notify();
        }

        Ok(plan.result)
    }

    /// Remove local products the remote store no longer has.
    ///
    /// Products with a pending local write are kept. Returns the removed ids.
    pub async fn prune_absent(&self, remote_ids: &HashSet<ProductId>) -> Result<Vec<ProductId>> {
        let outbox = self.outbox.lock().await;
        let local = self.guard(self.store.ids().await)?;

        let mut removed = Vec::new();
        for id in local {
            if remote_ids.contains(&id) || outbox.get(&id).is_some() {
                continue;
            }
            if self.guard(self.store.remove(&id).await)? {
                removed.push(id);
            }
        }
        drop(outbox);

        if !removed.is_empty() {
            tracing::info!(ids = ?removed, "Removed products deleted remotely");
            self.feed.notify();
        }
        Ok(removed)
    }

    /// Pending writes due for a push attempt at `now`, oldest first.
    pub async fn due_pending(&self, now: Timestamp) -> Vec<PendingOp> {
        self.outbox.lock().await.due(now)
    }

    pub async fn pending_ops(&self) -> Vec<PendingOp> {
        self.outbox.lock().await.all()
    }

    pub async fn pending_count(&self) -> usize {
        self.outbox.lock().await.len()
    }

    /// Whether a local write to `id` has not reached the remote store yet.
    pub async fn has_pending(&self, id: &str) -> bool {
        self.outbox.lock().await.get(id).is_some()
    }

    pub async fn next_due_at(&self) -> Option<Timestamp> {
        self.outbox.lock().await.next_due_at()
    }

    /// Mark `op` as applied remotely. Returns false if a newer write replaced it.
    pub async fn acknowledge(&self, op: &PendingOp) -> Result<bool> {
        let mut outbox = self.outbox.lock().await;
        if !outbox.acknowledge(&op.product_id, op.seq) {
            return Ok(false);
        }
        self.guard(self.journal.remove_pending(&op.product_id, op.seq).await)?;
        Ok(true)
    }

    /// Record a failed push of `op` and schedule its retry.
    pub async fn defer(
        &self,
        op: &PendingOp,
        error: &str,
        backoff: &Backoff,
    ) -> Result<Option<PendingOp>> {
        let now = self.now();
        let mut outbox = self.outbox.lock().await;
        let Some(updated) = outbox.record_failure(&op.product_id, op.seq, error, now, backoff)
        else {
            return Ok(None);
        };
        self.guard(self.journal.save_pending(&updated).await)?;
        Ok(Some(updated))
    }

    pub async fn load_cursor(&self) -> Result<SyncCursor> {
        self.journal.load_cursor(PRODUCTS).await
    }

    pub async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        self.journal.save_cursor(PRODUCTS, cursor).await
    }

    /// Take the single reconciler slot of this catalog.
    pub(crate) fn claim_reconciler(&self) -> bool {
        self.reconciler_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_reconciler(&self) {
        self.reconciler_claimed.store(false, Ordering::Release);
    }

    /// Undo a journaled write whose store write failed.
    async fn rollback(&self, outbox: &mut Outbox, id: &str, previous: Option<PendingOp>) {
        let undone = match &previous {
            Some(op) => self.journal.save_pending(op).await,
            None => self.journal.discard_pending(id).await,
        };
        if let Err(err) = undone {
            tracing::error!(product_id = %id, error = %err, "Could not roll back journaled write");
        }
        restore(outbox, id, previous);
    }

    /// Surface storage faults to subscribers as well as the caller.
    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| self.fault(err))
    }

    fn fault(&self, err: crate::error::ClientError) -> crate::error::ClientError {
        if err.is_local_storage_fault() {
            tracing::error!(error = %err, "Record store fault");
            self.feed.notify();
        }
        err
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("backend", &self.store.backend_name())
            .field("durable", &self.store.is_durable())
            .finish_non_exhaustive()
    }
}

fn restore(outbox: &mut Outbox, id: &str, previous: Option<PendingOp>) {
    match previous {
        Some(op) => outbox.reinstate(op),
        None => {
            outbox.discard(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_engine::ManualClock;

    async fn catalog(now: Timestamp) -> (Arc<ManualClock>, Arc<Catalog>) {
        let clock = Arc::new(ManualClock::new(now));
        let catalog = Catalog::in_memory(clock.clone(), FeedSettings::default())
            .await
            .unwrap();
        (clock, catalog)
    }

    #[tokio::test]
    async fn local_upsert_is_visible_and_pending() {
        let (_clock, catalog) = catalog(100).await;
        let mut p1 = Product::new("p1", "Latte", 100);
        p1.sale_price = 10.0;

        catalog.upsert_local(p1.clone()).await.unwrap();

        assert_eq!(catalog.find_by_id("p1").await.unwrap(), Some(p1));
        assert!(catalog.has_pending("p1").await);
        assert_eq!(catalog.pending_count().await, 1);
    }

    #[tokio::test]
    async fn local_stamps_never_regress() {
        let (_clock, catalog) = catalog(100).await;
        catalog
            .upsert_local(Product::new("p1", "Latte", 500))
            .await
            .unwrap();

        let stored = catalog
            .upsert_local(Product::new("p1", "Latte v2", 200))
            .await
            .unwrap();
        assert_eq!(stored.updated_at, 500);
    }

    #[tokio::test]
    async fn invalid_products_never_reach_the_store() {
        let (_clock, catalog) = catalog(1).await;
        let err = catalog
            .upsert_local(Product::new("p1", " ", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ClientError::Validation(_)));
        assert!(catalog.find_by_id("p1").await.unwrap().is_none());
        assert_eq!(catalog.pending_count().await, 0);
    }

    #[tokio::test]
    async fn delete_carries_image_path() {
        let (_clock, catalog) = catalog(1).await;
        let mut p = Product::new("p1", "Latte", 1);
        p.image_path = Some("products/o/1_latte.png".into());
        catalog.upsert_local(p).await.unwrap();

        assert!(catalog.remove_local("p1").await.unwrap());
        assert!(!catalog.remove_local("p1").await.unwrap());

        let ops = catalog.pending_ops().await;
        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops[0].write,
            PendingWrite::Delete {
                image_path: Some("products/o/1_latte.png".into())
            }
        );
    }

    #[tokio::test]
    async fn acknowledge_and_defer() {
        let (clock, catalog) = catalog(1_000).await;
        catalog
            .upsert_local(Product::new("p1", "Latte", 1_000))
            .await
            .unwrap();
        let op = catalog.due_pending(1_000).await.remove(0);

        let backoff = Backoff::new(100, 1_000);
        let deferred = catalog.defer(&op, "offline", &backoff).await.unwrap().unwrap();
        assert_eq!(deferred.next_attempt_at, 1_100);
        assert!(catalog.due_pending(clock.now_ms()).await.is_empty());

        assert!(catalog.acknowledge(&deferred).await.unwrap());
        assert_eq!(catalog.pending_count().await, 0);
        assert!(!catalog.acknowledge(&deferred).await.unwrap());
    }

    #[tokio::test]
    async fn prune_keeps_pending_products() {
        let (_clock, catalog) = catalog(1).await;
        catalog
            .apply_remote(vec![Product::new("synced", "A", 1), Product::new("gone", "B", 1)])
            .await
            .unwrap();
        catalog
            .upsert_local(Product::new("offline", "C", 1))
            .await
            .unwrap();

        let remote: HashSet<ProductId> = ["synced".to_string()].into_iter().collect();
        let removed = catalog.prune_absent(&remote).await.unwrap();

        assert_eq!(removed, vec!["gone".to_string()]);
        assert!(catalog.find_by_id("offline").await.unwrap().is_some());
    }

    /// Reads work, writes fail.
    struct FrozenStore(MemoryRecordStore);

    #[async_trait::async_trait]
    impl RecordStore for FrozenStore {
        async fn upsert(&self, _: &Product) -> Result<()> {
            Err(crate::error::ClientError::StoreUnavailable("disk full".into()))
        }
        async fn find_by_id(&self, id: &str) -> Result<Option<Product>> {
            self.0.find_by_id(id).await
        }
        async fn find_many(
            &self,
            ids: &[ProductId],
        ) -> Result<std::collections::HashMap<ProductId, Product>> {
            self.0.find_many(ids).await
        }
        async fn query_all(&self, query: &ProductQuery) -> Result<Vec<Product>> {
            self.0.query_all(query).await
        }
        async fn remove(&self, _: &str) -> Result<bool> {
            Err(crate::error::ClientError::StoreUnavailable("disk full".into()))
        }
        async fn ids(&self) -> Result<Vec<ProductId>> {
            self.0.ids().await
        }
        fn is_durable(&self) -> bool {
            false
        }
        fn backend_name(&self) -> &'static str {
            "frozen"
        }
    }

    #[tokio::test]
    async fn failed_store_write_leaves_nothing_pending() {
        let documents = MemoryRecordStore::new();
        documents
            .upsert(&Product::new("p1", "Latte", 1))
            .await
            .unwrap();
        let journal = Arc::new(MemoryRecordStore::new());
        let catalog = Catalog::open(
            Arc::new(FrozenStore(documents)),
            journal.clone(),
            Arc::new(ManualClock::new(10)),
            FeedSettings::default(),
        )
        .await
        .unwrap();

        let err = catalog
            .upsert_local(Product::new("p2", "Tea", 10))
            .await
            .unwrap_err();
        assert!(err.is_local_storage_fault());
        assert!(catalog.remove_local("p1").await.is_err());

        assert_eq!(catalog.pending_count().await, 0);
        assert!(journal.load_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_store_write_keeps_the_earlier_pending_write() {
        let journal = Arc::new(MemoryRecordStore::new());
        let documents = MemoryRecordStore::new();
        let catalog = Catalog::open(
            Arc::new(documents),
            journal.clone(),
            Arc::new(ManualClock::new(10)),
            FeedSettings::default(),
        )
        .await
        .unwrap();
        let queued = catalog
            .upsert_local(Product::new("p1", "Latte", 10))
            .await
            .unwrap();
        let before = catalog.pending_ops().await;

        // Reopen the same journal over a store that refuses writes.
        let frozen = FrozenStore(MemoryRecordStore::new());
        frozen.0.upsert(&queued).await.unwrap();
        let catalog = Catalog::open(
            Arc::new(frozen),
            journal.clone(),
            Arc::new(ManualClock::new(20)),
            FeedSettings::default(),
        )
        .await
        .unwrap();

        assert!(catalog.remove_local("p1").await.is_err());
        assert_eq!(catalog.pending_ops().await, before);
        assert_eq!(journal.load_pending().await.unwrap(), before);
    }

    #[tokio::test]
    async fn replacing_an_image_marks_the_old_one_stale() {
        let (_clock, catalog) = catalog(1).await;
        let mut p = Product::new("p1", "Latte", 1);
        p.image_path = Some("products/o/1_old.png".into());
        catalog.apply_remote(vec![p.clone()]).await.unwrap();

        p.image_path = Some("products/o/2_new.png".into());
        catalog.upsert_local(p).await.unwrap();

        let ops = catalog.pending_ops().await;
        assert_eq!(ops[0].stale_images, vec!["products/o/1_old.png".to_string()]);
    }

    #[tokio::test]
    async fn reconciler_slot_is_exclusive() {
        let (_clock, catalog) = catalog(1).await;
        assert!(catalog.claim_reconciler());
        assert!(!catalog.claim_reconciler());
        catalog.release_reconciler();
        assert!(catalog.claim_reconciler());
    }
}
