//! Database layer for the SQLite record store.

pub mod journal;
pub mod pool;
pub mod products;

pub use pool::{create_memory_pool, create_pool, run_migrations, Pool};
