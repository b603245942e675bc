//! # Catalog Engine
//!
//! The deterministic core of the local-first product catalog.
//!
//! This crate holds everything about the catalog that can be decided without
//! touching a disk or a network: what a product document looks like, whether
//! it is valid, which of two versions of the same product wins, what is still
//! waiting to be pushed, and how far the remote change history has been pulled.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never opens files, sockets or timers
//! - **Deterministic**: the same inputs always produce the same decisions
//! - **Keyed replacement only**: products are written whole, by id; there is no
//!   insert that could create a second document for an id
//!
//! ## Core Concepts
//!
//! ### Products
//!
//! A [`Product`] is the unit of record. Its `id` is stable across devices and is
//! the upsert key; `updated_at` drives conflict resolution.
//!
//! ### Last-write-wins
//!
//! The [`Reconciler`] compares incoming remote documents against the locally
//! stored copy and the [`Outbox`] of unacknowledged local writes:
//! - a newer `updated_at` wins, ties go to the remote copy
//! - a pending local delete suppresses the incoming copy entirely
//! - a pending local upsert that is strictly newer keeps its place in the outbox
//!
//! ### Outbox
//!
//! The [`Outbox`] holds at most one [`PendingOp`] per product id. Newer writes
//! replace older ones, and acknowledgements are matched by sequence number so a
//! write made while an older push was in flight is never dropped.
//!
//! ### Sync cursor
//!
//! The [`SyncCursor`] is the watermark of the remote change history that has
//! already been applied locally. It only moves forward, except on a full resync.
//!
//! ## Quick Start
//!
//! ```rust
//! use catalog_engine::{Outbox, Product, Reconciler};
//! use std::collections::HashMap;
//!
//! let mut local = Product::new("p1", "Espresso", 100);
//! local.sale_price = 10.0;
//!
//! let mut stored = HashMap::new();
//! stored.insert(local.id.clone(), local.clone());
//!
//! let mut remote = local.clone();
//! remote.sale_price = 12.0;
//! remote.updated_at = 150;
//!
//! let outbox = Outbox::new();
//! let plan = Reconciler::new(&outbox).plan(vec![remote], &stored);
//!
//! assert_eq!(plan.apply.len(), 1);
//! assert_eq!(plan.apply[0].sale_price, 12.0);
//! ```

pub mod clock;
pub mod cursor;
pub mod error;
pub mod outbox;
pub mod product;
pub mod query;
pub mod reconcile;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use clock::{next_stamp, Clock, ManualClock, SystemClock};
pub use cursor::SyncCursor;
pub use error::Error;
pub use outbox::{Backoff, Outbox, PendingOp, PendingWrite};
pub use product::{NewProduct, Product, ProductPatch, Variant};
pub use query::ProductQuery;
pub use reconcile::{
    decide, Conflict, ConflictResolution, Decision, PullPlan, ReconcileResult, Reconciler,
    SkipReason,
};
pub use schema::{CollectionSchema, FieldDef, FieldType};
pub use snapshot::CatalogSnapshot;

/// Type aliases for clarity
pub type ProductId = String;
pub type CollectionName = String;
pub type NodeId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
pub type Sequence = u64;

/// Name of the one document collection the catalog mirrors.
pub const PRODUCTS: &str = "products";
