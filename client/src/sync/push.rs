//! Push direction: replay pending local writes against the remote store.

use crate::catalog::Catalog;
use crate::error::{ClientError, Result};
use crate::remote::{RemoteError, RemoteServices};
use catalog_engine::{Backoff, PendingOp, PendingWrite, Product, PRODUCTS};

#[derive(Debug, Default)]
pub(crate) struct PushOutcome {
    pub pushed: usize,
    /// Upserts dropped because the remote copy was at least as new
    pub superseded: usize,
    pub failed: usize,
    /// The last remote failure. Transient ones end the push early.
    pub error: Option<RemoteError>,
}

enum Pushed {
    Written,
    /// The remote store already holds this newer copy
    Superseded(Product),
}

/// Push every op that is due. Local storage faults abort with `Err`.
pub(crate) async fn push_pending(
    catalog: &Catalog,
    remote: &RemoteServices,
    backoff: &Backoff,
) -> Result<PushOutcome> {
    let mut outcome = PushOutcome::default();

    for op in catalog.due_pending(catalog.now()).await {
        match push_one(catalog, remote, &op).await {
            Ok(Pushed::Written) => {
                let cleared = catalog.acknowledge(&op).await?;
                tracing::debug!(
                    product_id = %op.product_id,
                    seq = op.seq,
                    kind = op.write.kind(),
                    cleared,
                    "Pushed pending write"
                );
                outcome.pushed += 1;
            }
            Ok(Pushed::Superseded(current)) => {
                tracing::info!(
                    product_id = %op.product_id,
                    remote_updated_at = current.updated_at,
                    "Remote copy is newer; dropping local write"
                );
                catalog.apply_remote(vec![current]).await?;
                outcome.superseded += 1;
            }
            Err(ClientError::Remote(err)) => {
                let deferred = catalog.defer(&op, &err.to_string(), backoff).await?;
                outcome.failed += 1;
                if let Some(deferred) = deferred {
                    tracing::warn!(
                        product_id = %op.product_id,
                        attempts = deferred.attempts,
                        retry_in_ms = backoff.delay_ms(deferred.attempts),
                        error = %err,
                        "Push failed"
                    );
                }
                let transient = err.is_transient();
                outcome.error = Some(err);
                if transient {
                    break;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Ok(outcome)
}

async fn push_one(catalog: &Catalog, remote: &RemoteServices, op: &PendingOp) -> Result<Pushed> {
    match &op.write {
        PendingWrite::Upsert { product } => match remote_copy(catalog, remote, op).await? {
            Some(current) if current == *product => {}
            Some(current) if current.updated_at >= product.updated_at => {
                return Ok(Pushed::Superseded(current));
            }
            _ => {
                let document = product.to_document()?;
                remote.store.set(PRODUCTS, &op.product_id, document).await?;
            }
        },
        PendingWrite::Delete { .. } => {
            remote.store.delete(PRODUCTS, &op.product_id).await?;
        }
    }
    release_images(remote, op).await;
    Ok(Pushed::Written)
}

/// The remote copy of the op's product, if it exists and can be read.
async fn remote_copy(
    catalog: &Catalog,
    remote: &RemoteServices,
    op: &PendingOp,
) -> Result<Option<Product>> {
    let Some(document) = remote.store.get(PRODUCTS, &op.product_id).await? else {
        return Ok(None);
    };
    match Product::from_document(&document, catalog.schema()) {
        Ok(product) if product.id == op.product_id => Ok(Some(product)),
        Ok(_) | Err(_) => {
            tracing::warn!(product_id = %op.product_id, "Overwriting unreadable remote document");
            Ok(None)
        }
    }
}

/// Best effort once the document write went through.
async fn release_images(remote: &RemoteServices, op: &PendingOp) {
    let deleted_image = match &op.write {
        PendingWrite::Delete { image_path } => image_path.as_deref(),
        PendingWrite::Upsert { .. } => None,
    };
    let paths = op
        .stale_images
        .iter()
        .map(String::as_str)
        .chain(deleted_image);
    for path in paths {
        if let Err(err) = remote.blobs.delete(path).await {
            tracing::warn!(product_id = %op.product_id, path = %path, error = %err, "Image delete failed");
        }
    }
}
