//! Immutable query results delivered to subscribers.

use crate::Product;
use std::sync::Arc;

/// The complete result set of one query at one store revision.
///
/// Cloning is cheap; every subscriber of a query shares the same product list.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    revision: u64,
    products: Arc<[Product]>,
}

impl CatalogSnapshot {
    pub fn new(revision: u64, products: Vec<Product>) -> Self {
        Self {
            revision,
            products: products.into(),
        }
    }

    pub fn empty(revision: u64) -> Self {
        Self::new(revision, Vec::new())
    }

    /// Store revision the snapshot was read at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Products in storage order.
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Product> {
        self.products.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.products.iter().map(|p| p.id.as_str()).collect()
    }

    /// Whether both snapshots list the same documents in the same order.
    pub fn same_contents(&self, other: &CatalogSnapshot) -> bool {
        Arc::ptr_eq(&self.products, &other.products) || self.products == other.products
    }
}

impl<'a> IntoIterator for &'a CatalogSnapshot {
    type Item = &'a Product;
    type IntoIter = std::slice::Iter<'a, Product>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
