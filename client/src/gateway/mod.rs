//! The mutation gateway: every write a screen can make.
//!
//! Product edits go local-first. They land in the record store right away,
//! are queued for the remote store, and the reconciler is nudged to push them.
//! Orders, sales and scans are server-authoritative and go straight to the
//! remote procedures (see [`orders`]).

use crate::catalog::Catalog;
use crate::error::{ClientError, Result};
use crate::remote::{blob_path, RemoteServices};
use crate::sync::{SyncHandle, SyncStatus};
use catalog_engine::{NewProduct, Product, ProductPatch};
use std::sync::Arc;

pub mod orders;
pub mod scope;

pub use orders::{
    OrderDraft, OrderLine, OrderReceipt, SaleReceipt, SaleRequest, ScannedLine, CREATE_ORDER,
    FINALIZE_SALE, SCAN_ORDER_SLIP,
};
pub use scope::ScreenScope;

/// Blob category of product images.
pub const PRODUCT_IMAGES: &str = "products";

#[derive(Clone)]
pub struct MutationGateway {
    catalog: Arc<Catalog>,
    remote: RemoteServices,
    sync: Option<SyncHandle>,
}

impl MutationGateway {
    pub fn new(catalog: Arc<Catalog>, remote: RemoteServices, sync: Option<SyncHandle>) -> Self {
        Self {
            catalog,
            remote,
            sync,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Create a product from a form. The id is assigned here, before any
    /// network round trip.
    pub async fn create_product(&self, draft: NewProduct) -> Result<Product> {
        let id = uuid::Uuid::new_v4().to_string();
        let product = draft.into_product(id, self.catalog.now())?;
        let stored = self.catalog.upsert_local(product).await?;
        tracing::info!(product_id = %stored.id, name = %stored.name, "Product created");
        self.nudge();
        Ok(stored)
    }

    /// Save a full product document.
    pub async fn save_product(&self, mut product: Product) -> Result<Product> {
        product.touch(self.catalog.now());
        let stored = self.catalog.upsert_local(product).await?;
        self.nudge();
        Ok(stored)
    }

    /// Read-modify-write of the fields set in `patch`.
    pub async fn update_product(&self, id: &str, patch: &ProductPatch) -> Result<Product> {
        let existing = self
            .catalog
            .find_by_id(id)
            .await?
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?;
        if patch.is_empty() {
            return Ok(existing);
        }
        let next = patch.apply(&existing, self.catalog.now())?;
        let stored = self.catalog.upsert_local(next).await?;
        self.nudge();
        Ok(stored)
    }

    /// Add `delta` to the stock of `id`. Negative deltas sell stock.
    pub async fn adjust_stock(&self, id: &str, delta: i64) -> Result<Product> {
        let existing = self
            .catalog
            .find_by_id(id)
            .await?
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?;
        let patch = ProductPatch {
            stock: Some(existing.stock.saturating_add(delta)),
            ..ProductPatch::default()
        };
        let next = patch.apply(&existing, self.catalog.now())?;
        let stored = self.catalog.upsert_local(next).await?;
        tracing::debug!(product_id = %id, delta, stock = stored.stock, "Stock adjusted");
        self.nudge();
        Ok(stored)
    }

    /// Delete a product here and, once synced, remotely along with its image.
    pub async fn delete_product(&self, id: &str) -> Result<bool> {
        let removed = self.catalog.remove_local(id).await?;
        tracing::info!(product_id = %id, removed, "Product deleted");
        self.nudge();
        Ok(removed)
    }

    /// Upload an image and attach it to the product.
    ///
    /// Online only: the upload itself is not queued. A replaced image is
    /// deleted once the updated product has been pushed.
    pub async fn upload_product_image(
        &self,
        product_id: &str,
        owner_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Product> {
        if self.catalog.find_by_id(product_id).await?.is_none() {
            return Err(ClientError::NotFound(product_id.to_string()));
        }

        let path = blob_path(PRODUCT_IMAGES, owner_id, filename, self.catalog.now());
        let url = self.remote.blobs.upload(&path, bytes, content_type).await?;
        tracing::debug!(product_id = %product_id, path = %path, "Product image uploaded");

        let patch = ProductPatch {
            image_url: Some(Some(url)),
            image_path: Some(Some(path)),
            ..ProductPatch::default()
        };
        self.update_product(product_id, &patch).await
    }

    /// Whether some local edit has not reached the remote store yet.
    pub async fn has_unsynced_changes(&self) -> bool {
        self.catalog.pending_count().await > 0
    }

    pub async fn pending_count(&self) -> usize {
        self.catalog.pending_count().await
    }

    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.sync.as_ref().map(SyncHandle::status)
    }

    fn nudge(&self) {
        if let Some(sync) = &self.sync {
            sync.sync_now();
        }
    }
}

impl std::fmt::Debug for MutationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationGateway")
            .field("remote", &self.remote)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedSettings;
    use crate::remote::{MemoryRemote, RemoteError};
    use catalog_engine::ManualClock;

    async fn gateway() -> (Arc<ManualClock>, Arc<MemoryRemote>, MutationGateway) {
        let clock = Arc::new(ManualClock::new(1_000));
        let catalog = Catalog::in_memory(clock.clone(), FeedSettings::default())
            .await
            .unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let gateway = MutationGateway::new(catalog, RemoteServices::memory(remote.clone()), None);
        (clock, remote, gateway)
    }

    #[tokio::test]
    async fn create_assigns_id_and_queues_push() {
        let (_clock, _remote, gateway) = gateway().await;
        let created = gateway
            .create_product(NewProduct::new("  Flat white ", 3.5))
            .await
            .unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(created.name, "Flat white");
        assert_eq!(created.created_at, 1_000);
        assert!(gateway.has_unsynced_changes().await);
    }

    #[tokio::test]
    async fn update_and_adjust_stock() {
        let (clock, _remote, gateway) = gateway().await;
        let created = gateway
            .create_product(NewProduct::new("Bagel", 2.0))
            .await
            .unwrap();

        clock.advance(10);
        let patch = ProductPatch {
            sale_price: Some(2.5),
            ..ProductPatch::default()
        };
        let updated = gateway.update_product(&created.id, &patch).await.unwrap();
        assert_eq!(updated.sale_price, 2.5);
        assert_eq!(updated.updated_at, 1_010);

        let sold = gateway.adjust_stock(&created.id, -3).await.unwrap();
        assert_eq!(sold.stock, -3);
        assert_eq!(gateway.pending_count().await, 1);

        assert!(matches!(
            gateway.update_product("missing", &patch).await,
            Err(ClientError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_edits_are_rejected_locally() {
        let (_clock, _remote, gateway) = gateway().await;
        assert!(matches!(
            gateway.create_product(NewProduct::new("", 1.0)).await,
            Err(ClientError::Validation(_))
        ));

        let created = gateway
            .create_product(NewProduct::new("Tea", 1.0))
            .await
            .unwrap();
        let patch = ProductPatch {
            sale_price: Some(-1.0),
            ..ProductPatch::default()
        };
        assert!(matches!(
            gateway.update_product(&created.id, &patch).await,
            Err(ClientError::Validation(_))
        ));
        let stored = gateway.catalog().find_by_id(&created.id).await.unwrap();
        assert_eq!(stored.unwrap().sale_price, 1.0);
    }

    #[tokio::test]
    async fn image_upload_records_url_and_path() {
        let (_clock, remote, gateway) = gateway().await;
        let created = gateway
            .create_product(NewProduct::new("Tea", 1.0))
            .await
            .unwrap();

        let updated = gateway
            .upload_product_image(&created.id, "owner-1", "tea.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();

        assert_eq!(updated.image_path.as_deref(), Some("products/owner-1/1000_tea.png"));
        assert_eq!(
            updated.image_url.as_deref(),
            Some("memory://blobs/products/owner-1/1000_tea.png")
        );
        assert_eq!(
            remote.blob("products/owner-1/1000_tea.png"),
            Some((vec![1, 2, 3], "image/png".to_string()))
        );

        remote.set_online(false);
        let err = gateway
            .upload_product_image(&created.id, "owner-1", "tea.png", vec![1], "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Remote(RemoteError::Offline)));
    }

    #[tokio::test]
    async fn replacing_an_image_queues_the_old_blob_for_deletion() {
        let (clock, remote, gateway) = gateway().await;
        let created = gateway
            .create_product(NewProduct::new("Tea", 1.0))
            .await
            .unwrap();
        gateway
            .upload_product_image(&created.id, "owner-1", "tea.png", vec![1], "image/png")
            .await
            .unwrap();

        clock.advance(1);
        let updated = gateway
            .upload_product_image(&created.id, "owner-1", "green.png", vec![2], "image/png")
            .await
            .unwrap();
        assert_eq!(updated.image_path.as_deref(), Some("products/owner-1/1001_green.png"));

        // Kept until the new path reaches the remote store.
        assert!(remote.blob("products/owner-1/1000_tea.png").is_some());
        let pending = gateway.catalog().pending_ops().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].stale_images, vec!["products/owner-1/1000_tea.png".to_string()]);
    }
}
