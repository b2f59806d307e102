//! Store backends
//!
//! The graph engines only ever talk to the [`Store`] trait. A PostgreSQL
//! implementation runs over a caller-owned sqlx transaction; the memory
//! implementation backs tests.

pub mod core;
pub mod memory;
pub mod postgres;

pub use core::{DatabaseValue, LinkTargets, OnConflict, Statement, Store, TimeRange};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
