//! The catalog view model: the product list a screen renders from.
//!
//! A [`ProductsView`] subscribes to the change feed when it is created and
//! unsubscribes when it is dropped. It starts out loading with an empty list,
//! then always holds the latest complete snapshot. A store failure flips it
//! into an error state without losing the last good list.

use crate::catalog::Catalog;
use crate::error::ClientError;
use crate::feed::{FeedEvent, Subscription};
use catalog_engine::{CatalogSnapshot, Product, ProductQuery};
use std::sync::Arc;

/// Live product list for one screen.
#[derive(Debug)]
pub struct ProductsView {
    subscription: Subscription,
    snapshot: Option<CatalogSnapshot>,
    error: Option<Arc<ClientError>>,
}

/// View of every product.
pub fn use_products(catalog: &Catalog) -> ProductsView {
    use_products_where(catalog, ProductQuery::all())
}

/// View of the products matching `query`.
pub fn use_products_where(catalog: &Catalog, query: ProductQuery) -> ProductsView {
    ProductsView::new(catalog.subscribe(query))
}

impl ProductsView {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            snapshot: None,
            error: None,
        }
    }

    /// The current list, in storage order. Empty while loading.
    pub fn products(&self) -> &[Product] {
        self.snapshot.as_ref().map(|s| s.products()).unwrap_or(&[])
    }

    pub fn snapshot(&self) -> Option<&CatalogSnapshot> {
        self.snapshot.as_ref()
    }

    /// True until the first snapshot arrives.
    pub fn is_loading(&self) -> bool {
        self.snapshot.is_none()
    }

    /// The failure of the last read, cleared by the next good snapshot.
    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_deref()
    }

    /// The list together with the loading flag.
    pub fn current(&self) -> (&[Product], bool) {
        (self.products(), self.is_loading())
    }

    pub fn query(&self) -> &ProductQuery {
        self.subscription.query()
    }

    /// Wait for the next delivery and apply it.
    ///
    /// Returns `None` once the feed has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        let event = self.subscription.recv().await?;
        self.apply(event);
        Some(())
    }

    /// Apply every delivery that is already waiting. Returns whether any was.
    pub fn poll_latest(&mut self) -> bool {
        let mut updated = false;
        while let Some(event) = self.subscription.try_recv() {
            self.apply(event);
            updated = true;
        }
        updated
    }

    fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Snapshot(snapshot) => {
                self.snapshot = Some(snapshot);
                self.error = None;
            }
            FeedEvent::Error(err) => self.error = Some(err),
        }
    }

    /// Unsubscribe. Same as dropping the view.
    pub fn close(self) {}
}
