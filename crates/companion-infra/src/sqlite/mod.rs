//! SQLite storage layer.
//!
//! One store implements every repository port of `companion-core`, backed
//! by SQLite with WAL mode and split read/write connection pools.

pub mod pool;
pub mod store;

pub use pool::{DatabasePool, database_url};
pub use store::SqliteCompanionStore;
