//! # Catalog Client
//!
//! Local-first product catalog: reads are served from a local record store,
//! writes land there first and are pushed to the remote store in the
//! background, and remote changes are pulled back in.
//!
//! ## Pieces
//!
//! - [`store`]: the record store (`SqliteRecordStore`, `MemoryRecordStore`)
//!   and the sync journal kept beside it
//! - [`feed`]: live query subscriptions delivering full snapshots
//! - [`catalog`]: the [`Catalog`] service, the single write path into the store
//! - [`sync`]: the background [`SyncReconciler`]
//! - [`view_model`]: [`ProductsView`], what a screen renders from
//! - [`gateway`]: [`MutationGateway`], local-first product edits and online-only
//!   order, sale and scan calls
//! - [`remote`]: the remote document store, blob storage and procedures
//! - [`runtime`]: [`CatalogRuntime`], wiring all of the above once per process
//!
//! ## Example
//!
//! ```no_run
//! use catalog_client::{CatalogRuntime, Config};
//! use catalog_engine::NewProduct;
//!
//! # async fn run() -> catalog_client::Result<()> {
//! let runtime = CatalogRuntime::start(&Config::from_env()?).await?;
//! let mut products = runtime.products();
//!
//! runtime
//!     .gateway()
//!     .create_product(NewProduct::new("Espresso", 2.5))
//!     .await?;
//!
//! while products.changed().await.is_some() {
//!     println!("{} products", products.products().len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod remote;
pub mod runtime;
pub mod store;
pub mod sync;
pub mod view_model;

pub use catalog::Catalog;
pub use config::{Config, ConfigError, FeedSettings, SyncSettings};
pub use error::{ClientError, Result};
pub use feed::{ChangeFeed, FeedEvent, Subscription};
pub use gateway::{MutationGateway, ScreenScope};
pub use remote::{RemoteError, RemoteServices};
pub use runtime::{CatalogRuntime, RuntimeParts};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore, SyncJournal};
pub use sync::{CycleMode, CycleReport, SyncHandle, SyncReconciler, SyncStatus};
pub use view_model::{use_products, use_products_where, ProductsView};
