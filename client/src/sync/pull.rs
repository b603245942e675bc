//! Pull direction: page through the remote change history and reconcile it
//! into the record store.

use super::CycleMode;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::remote::{RemoteChange, RemoteStore};
use catalog_engine::{Product, ProductId, SyncCursor, PRODUCTS};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub(crate) struct PullOutcome {
    pub pulled: usize,
    pub applied: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub pruned: usize,
    pub cursor: SyncCursor,
}

/// Pull until the remote history is exhausted.
///
/// The cursor is saved after every page, so an interrupted pull resumes where
/// it stopped. A full resync starts from the origin and afterwards prunes
/// local products the remote store no longer has.
pub(crate) async fn pull_changes(
    catalog: &Catalog,
    remote: &dyn RemoteStore,
    page_size: usize,
    mode: CycleMode,
) -> Result<PullOutcome> {
    let mut cursor = match mode {
        CycleMode::Incremental => catalog.load_cursor().await?,
        CycleMode::FullResync => SyncCursor::origin(),
    };
    let mut seen: HashSet<ProductId> = HashSet::new();
    let mut outcome = PullOutcome::default();

    loop {
        let batch = remote
            .changes_since(PRODUCTS, &cursor, page_size.max(1))
            .await?;
        let Some(last) = batch.changes.last() else {
            break;
        };
        let next = last.cursor();
        outcome.pulled += batch.changes.len();

        let mut products = Vec::with_capacity(batch.changes.len());
        for change in &batch.changes {
            if mode == CycleMode::FullResync {
                seen.insert(change.id.clone());
            }
            match decode(catalog, change) {
                Some(product) => products.push(product),
                None => outcome.malformed += 1,
            }
        }

        let result = catalog.apply_remote(products).await?;
        outcome.applied += result.applied.len();
        outcome.skipped += result.skipped();

        if cursor.advance(next) {
            catalog.save_cursor(&cursor).await?;
        }
        tracing::debug!(
            pulled = batch.changes.len(),
            applied = result.applied.len(),
            cursor = %cursor,
            "Pulled page"
        );

        if !batch.has_more {
            break;
        }
    }

    if mode == CycleMode::FullResync {
        outcome.pruned = catalog.prune_absent(&seen).await?.len();
    }
    outcome.cursor = cursor;
    Ok(outcome)
}

fn decode(catalog: &Catalog, change: &RemoteChange) -> Option<Product> {
    match Product::from_document(&change.document, catalog.schema()) {
        Ok(product) if product.id == change.id => Some(product),
        Ok(product) => {
            tracing::warn!(
                change_id = %change.id,
                document_id = %product.id,
                "Skipping remote document filed under another id"
            );
            None
        }
        Err(err) => {
            tracing::warn!(product_id = %change.id, error = %err, "Skipping malformed remote document");
            None
        }
    }
}
