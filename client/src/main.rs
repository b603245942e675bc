//! catalog-sync: runs the local catalog and its reconciler headless.
//!
//! Logs every catalog snapshot and sync status change until Ctrl-C.

use catalog_client::{CatalogRuntime, Config, FeedEvent};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(db = %config.db_path, remote = ?config.remote_url, "Starting catalog sync");

    let runtime = CatalogRuntime::start(&config).await?;
    let mut products = runtime.catalog().subscribe(catalog_engine::ProductQuery::all());
    let mut status = runtime.sync().watch_status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = products.recv() => match event {
                Some(FeedEvent::Snapshot(snapshot)) => {
                    tracing::info!(products = snapshot.len(), revision = snapshot.revision(), "Catalog snapshot");
                }
                Some(FeedEvent::Error(err)) => tracing::error!(error = %err, "Catalog unreadable"),
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::info!(
                    online = current.online,
                    pending = current.pending,
                    failures = current.consecutive_failures,
                    cursor = %current.cursor,
                    "Sync status"
                );
            }
        }
    }

    runtime.shutdown().await;
    Ok(())
}
