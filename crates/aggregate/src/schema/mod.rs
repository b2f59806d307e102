//! Relationship schema - per-field relationship declarations for every entity type

pub mod declaration;
pub mod registry;

pub use declaration::{FieldIdentity, FieldShape, LinkTable, RelationshipDeclaration, RelationshipKind};
pub use registry::{
    global, install, EntityDefinition, EntitySchema, RelationshipSchema, SchemaBuilder,
};
