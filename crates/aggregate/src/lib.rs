//! # elif-aggregate: nested-aggregate persistence for elif.rs
//!
//! Creates, reconciles, deletes and batch-loads whole entity graphs on top
//! of a relational store. Each nested field declares how it relates to its
//! parent:
//!
//! - **Owned**: lives and dies with the parent
//! - **Associated**: independently owned, references the parent by foreign key
//! - **AssociatedManyToMany**: independently owned, linked through a link table
//! - **Ignored**: left alone
//!
//! Declarations are registered once at startup into a [`RelationshipSchema`].
//! All work runs inside a transaction the caller owns, through the [`Store`]
//! trait.

use std::future::Future;
use std::pin::Pin;

pub mod backends;
pub mod cascade;
pub mod config;
pub mod entity;
pub mod error;
pub mod links;
pub mod loading;
pub mod persist;
pub mod reconcile;
pub mod repository;
pub mod schema;
pub mod walker;


// Re-export core traits and types
pub use backends::{DatabaseValue, LinkTargets, MemoryStore, OnConflict, PostgresStore, Statement, Store, TimeRange};
pub use cascade::{CascadeSummary, DeleteCascadeEngine};
pub use config::GraphConfig;
pub use entity::{
    child_row, collection_from_rows, from_row, identity, optional_from_rows, restore_from_rows, row_uuid, to_row,
    Entity, EntityId, EntityType, Related, RelatedMut, Row,
};
pub use error::{ModelError, ModelResult, OrmError, OrmResult, SchemaError};
pub use links::LinkMaintainer;
pub use loading::{BatchChildFetcher, BatchChildIndexer, ChildIndex, ChildIndexEntry, LoadSummary, TimeWindow};
pub use persist::{GraphWriter, WriteMode, WriteSummary};
pub use reconcile::{DiffSet, ReconcileSummary, UpdateReconciler};
pub use repository::{GraphRepository, LinkSnapshot};
pub use schema::{
    EntityDefinition, EntitySchema, FieldIdentity, FieldShape, LinkTable, RelationshipDeclaration,
    RelationshipKind, RelationshipSchema, SchemaBuilder,
};
pub use walker::{FieldVisit, FieldVisitMut, GraphWalker};

/// Boxed future used by the recursive graph engines
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
