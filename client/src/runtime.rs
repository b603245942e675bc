//! Process-wide wiring: one record store, one catalog, one reconciler.

use crate::catalog::Catalog;
use crate::config::{Config, FeedSettings, SyncSettings};
use crate::error::Result;
use crate::gateway::MutationGateway;
use crate::remote::{HttpRemote, RemoteServices};
use crate::store::{MemoryRecordStore, RecordStore, SqliteRecordStore, SyncJournal};
use crate::sync::{SyncHandle, SyncReconciler};
use crate::view_model::{use_products, use_products_where, ProductsView};
use catalog_engine::{Clock, NodeId, ProductQuery, SystemClock};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// The pieces a runtime is assembled from.
pub struct RuntimeParts {
    pub store: Arc<dyn RecordStore>,
    pub journal: Arc<dyn SyncJournal>,
    pub remote: RemoteServices,
    pub clock: Arc<dyn Clock>,
    pub sync: SyncSettings,
    pub feed: FeedSettings,
    pub node_id: NodeId,
}

/// A running catalog with its reconciler.
#[derive(Debug, Clone)]
pub struct CatalogRuntime {
    catalog: Arc<Catalog>,
    gateway: MutationGateway,
    sync: SyncHandle,
    node_id: NodeId,
}

static GLOBAL: OnceCell<CatalogRuntime> = OnceCell::const_new();

impl CatalogRuntime {
    /// Open the configured store and remote, then start syncing.
    pub async fn start(config: &Config) -> Result<Self> {
        let (store, journal): (Arc<dyn RecordStore>, Arc<dyn SyncJournal>) =
            if config.is_in_memory() {
                let store = Arc::new(MemoryRecordStore::new());
                (store.clone(), store)
            } else {
                let store = Arc::new(SqliteRecordStore::open(&config.db_path).await?);
                (store.clone(), store)
            };

        let remote = match &config.remote_url {
            Some(url) => RemoteServices::http(HttpRemote::new(
                url,
                config.auth_token.clone(),
                config.request_timeout,
            )?),
            None => {
                tracing::warn!("CATALOG_REMOTE_URL not set; running local-only");
                RemoteServices::unconfigured()
            }
        };

        Self::with(RuntimeParts {
            store,
            journal,
            remote,
            clock: Arc::new(SystemClock),
            sync: config.sync.clone(),
            feed: config.feed.clone(),
            node_id: config.node_id.clone(),
        })
        .await
    }

    /// Assemble a runtime from explicit parts.
    pub async fn with(parts: RuntimeParts) -> Result<Self> {
        let backend = parts.store.backend_name();
        let durable = parts.store.is_durable();
        let catalog = Catalog::open(parts.store, parts.journal, parts.clock, parts.feed).await?;

        let sync = SyncReconciler::new(Arc::clone(&catalog), parts.remote.clone(), parts.sync)?
            .spawn();
        let gateway = MutationGateway::new(Arc::clone(&catalog), parts.remote, Some(sync.clone()));

        tracing::info!(
            node_id = %parts.node_id,
            backend,
            durable,
            pending = catalog.pending_count().await,
            "Catalog runtime started"
        );

        Ok(Self {
            catalog,
            gateway,
            sync,
            node_id: parts.node_id,
        })
    }

    /// The process-wide runtime, started on first use.
    ///
    /// Later calls return the same instance and ignore `config`.
    pub async fn global(config: &Config) -> Result<&'static CatalogRuntime> {
        GLOBAL.get_or_try_init(|| Self::start(config)).await
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn gateway(&self) -> &MutationGateway {
        &self.gateway
    }

    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn products(&self) -> ProductsView {
        use_products(&self.catalog)
    }

    pub fn products_where(&self, query: ProductQuery) -> ProductsView {
        use_products_where(&self.catalog, query)
    }

    /// Stop syncing and close every subscription.
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
        self.catalog.feed().close();
        tracing::info!(node_id = %self.node_id, "Catalog runtime stopped");
    }
}
