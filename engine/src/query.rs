//! Live query definitions.

use crate::Product;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&Product) -> bool + Send + Sync>;

/// Which products a subscription follows.
///
/// Queries only select; they never reorder. Results keep storage order.
#[derive(Clone)]
pub struct ProductQuery {
    filter: Option<Predicate>,
    label: String,
}

impl ProductQuery {
    /// Every product in the collection.
    pub fn all() -> Self {
        Self {
            filter: None,
            label: "all".into(),
        }
    }

    /// Products for which `predicate` holds. `label` names the query in logs.
    pub fn filter<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Product) -> bool + Send + Sync + 'static,
    {
        Self {
            filter: Some(Arc::new(predicate)),
            label: label.into(),
        }
    }

    pub fn in_category(category_id: impl Into<String>) -> Self {
        let category_id = category_id.into();
        let label = format!("category={category_id}");
        Self::filter(label, move |p| p.category_id.as_deref() == Some(category_id.as_str()))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_all(&self) -> bool {
        self.filter.is_none()
    }

    pub fn matches(&self, product: &Product) -> bool {
        self.filter.as_ref().map_or(true, |f| f(product))
    }

    /// Select matching products, preserving their order.
    pub fn apply<'a>(&self, products: impl IntoIterator<Item = &'a Product>) -> Vec<Product> {
        products
            .into_iter()
            .filter(|p| self.matches(p))
            .cloned()
            .collect()
    }
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for ProductQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductQuery")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
