//! Batched loading of nested children across many parents

pub mod batch_loader;
pub mod index;

pub use batch_loader::{BatchChildFetcher, LoadSummary, TimeWindow};
pub use index::{BatchChildIndexer, ChildIndex, ChildIndexEntry};
