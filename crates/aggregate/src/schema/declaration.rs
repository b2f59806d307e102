//! Relationship declarations - how a nested field relates to its parent

use std::fmt;

/// How a nested entity relates to the entity holding it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipKind {
    /// Lifecycle bound to the parent; deleted with it
    Owned,
    /// Independently owned target referencing the parent through a foreign key
    Associated,
    /// Independently owned target linked through a join table
    AssociatedManyToMany,
    /// Nested value the graph engines leave alone
    Ignored,
}

impl RelationshipKind {
    /// Returns true if the target row lives and dies with the parent
    pub fn is_owned(self) -> bool {
        matches!(self, Self::Owned)
    }

    /// Returns true if this relationship is realized through a link table
    pub fn requires_link_table(self) -> bool {
        matches!(self, Self::AssociatedManyToMany)
    }

    /// Returns true if the target table carries a foreign key back to the parent
    pub fn requires_foreign_key(self) -> bool {
        matches!(self, Self::Owned | Self::Associated)
    }
}

/// Shape of the field holding the nested value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldShape {
    /// Embedded entity; absent when its identity is unset
    Single,
    /// Entity that may be missing altogether
    OptionalSingle,
    /// Homogeneous collection of entities
    Collection,
}

impl FieldShape {
    pub fn is_collection(self) -> bool {
        matches!(self, Self::Collection)
    }
}

/// Join table realizing a many-to-many field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    /// The link table name
    pub table: String,
    /// Column holding the owner's id
    pub owner_column: String,
    /// Column holding the target's id
    pub target_column: String,
}

/// Identifies *which* relationship field a value came through.
///
/// Two fields of the same parent type may target the same table, so
/// grouping by target table alone is not enough.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldIdentity {
    pub parent_table: String,
    pub field: String,
}

impl FieldIdentity {
    pub fn new(parent_table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            parent_table: parent_table.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for FieldIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.parent_table, self.field)
    }
}

/// Declaration attached to one nested field of an entity type
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDeclaration {
    /// Field name on the parent entity
    pub field: String,
    pub kind: RelationshipKind,
    pub shape: FieldShape,
    /// Registered type name of the nested entity
    pub target_type: String,
    /// Column on the target table referencing the parent (Owned / Associated)
    pub foreign_key: Option<String>,
    /// Link table name (AssociatedManyToMany)
    pub link_table: Option<String>,
    /// Explicit link columns; derived from the table names when absent
    pub link_columns: Option<(String, String)>,
    pub(crate) resolved: Option<ResolvedTarget>,
}

/// Parts of a declaration filled in when the schema is frozen
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedTarget {
    pub(crate) parent_table: String,
    pub(crate) target_table: String,
    pub(crate) link: Option<LinkTable>,
}

impl RelationshipDeclaration {
    /// Create a new declaration
    pub fn new(field: &str, kind: RelationshipKind, shape: FieldShape, target_type: &str) -> Self {
        Self {
            field: field.to_string(),
            kind,
            shape,
            target_type: target_type.to_string(),
            foreign_key: None,
            link_table: None,
            link_columns: None,
            resolved: None,
        }
    }

    /// Owned nested entity, cascade-deleted with its parent
    pub fn owned(field: &str, shape: FieldShape, target_type: &str) -> Self {
        Self::new(field, RelationshipKind::Owned, shape, target_type)
    }

    /// Independently owned entity pointing back at the parent
    pub fn associated(field: &str, shape: FieldShape, target_type: &str) -> Self {
        Self::new(field, RelationshipKind::Associated, shape, target_type)
    }

    /// Many-to-many collection through the named link table
    pub fn many_to_many(field: &str, target_type: &str, link_table: &str) -> Self {
        let mut declaration = Self::new(
            field,
            RelationshipKind::AssociatedManyToMany,
            FieldShape::Collection,
            target_type,
        );
        declaration.link_table = Some(link_table.to_string());
        declaration
    }

    /// Nested value the engines skip
    pub fn ignored(field: &str, shape: FieldShape, target_type: &str) -> Self {
        Self::new(field, RelationshipKind::Ignored, shape, target_type)
    }

    /// Set the foreign key column on the target table
    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    /// Override the derived link table columns
    pub fn link_columns(mut self, owner_column: &str, target_column: &str) -> Self {
        self.link_columns = Some((owner_column.to_string(), target_column.to_string()));
        self
    }

    /// Table of the parent entity type
    pub fn parent_table(&self) -> &str {
        self.resolved.as_ref().map(|r| r.parent_table.as_str()).unwrap_or("")
    }

    /// Table the nested entities are stored in
    pub fn target_table(&self) -> &str {
        self.resolved.as_ref().map(|r| r.target_table.as_str()).unwrap_or("")
    }

    /// Resolved link table for many-to-many fields
    pub fn link(&self) -> Option<&LinkTable> {
        self.resolved.as_ref().and_then(|r| r.link.as_ref())
    }

    /// Foreign key column, empty for declarations without one
    pub fn foreign_key_column(&self) -> &str {
        self.foreign_key.as_deref().unwrap_or("")
    }

    /// Which field of which parent table this declaration describes
    pub fn identity(&self) -> FieldIdentity {
        FieldIdentity::new(self.parent_table(), self.field.as_str())
    }
}

/// Default link column for a table: `owners` -> `owner_id`
pub(crate) fn default_link_column(table: &str) -> String {
    let singular = table.strip_suffix('s').filter(|s| !s.is_empty()).unwrap_or(table);
    format!("{}_id", singular)
}
