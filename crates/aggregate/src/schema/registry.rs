//! Relationship Registry - declarations built once at startup, then read-only
//!
//! A [`SchemaBuilder`] collects one [`EntityDefinition`] per entity type,
//! validates the whole set and freezes it into a [`RelationshipSchema`].
//! After that nothing mutates it, so concurrent readers need no locking.

use std::collections::{HashMap, HashSet};

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::entity::EntityType;
use crate::error::{ModelError, ModelResult, SchemaError};

use super::declaration::{
    default_link_column, FieldShape, LinkTable, RelationshipDeclaration, RelationshipKind,
    ResolvedTarget,
};

static GLOBAL_SCHEMA: OnceCell<RelationshipSchema> = OnceCell::new();

/// Registration input for one entity type
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    pub type_name: String,
    pub table: String,
    /// Every field holding an entity, optional entity or entity collection
    pub nested_fields: Vec<String>,
    pub declarations: Vec<RelationshipDeclaration>,
}

impl EntityDefinition {
    /// Create a definition by hand
    pub fn new(type_name: &str, table: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            table: table.to_string(),
            nested_fields: Vec::new(),
            declarations: Vec::new(),
        }
    }

    /// Create a definition from an entity type's static metadata
    pub fn of<T: EntityType>() -> Self {
        Self::new(T::type_name(), T::table_name()).nested(T::nested_fields())
    }

    /// List the nested entity fields that must be declared
    pub fn nested(mut self, fields: &[&str]) -> Self {
        self.nested_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Attach a relationship declaration
    pub fn declare(mut self, declaration: RelationshipDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }
}

/// Frozen relationship metadata of one entity type
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub type_name: String,
    pub table: String,
    declarations: Vec<RelationshipDeclaration>,
    by_field: HashMap<String, usize>,
}

impl EntitySchema {
    /// Declarations in registration order
    pub fn declarations(&self) -> &[RelationshipDeclaration] {
        &self.declarations
    }

    /// Declaration of a single field
    pub fn declaration(&self, field: &str) -> Option<&RelationshipDeclaration> {
        self.by_field.get(field).map(|&i| &self.declarations[i])
    }

    /// Declarations of a given kind
    pub fn of_kind(&self, kind: RelationshipKind) -> impl Iterator<Item = &RelationshipDeclaration> {
        self.declarations.iter().filter(move |d| d.kind == kind)
    }
}

/// Immutable relationship schema for all registered entity types
#[derive(Debug, Clone, Default)]
pub struct RelationshipSchema {
    entities: HashMap<String, EntitySchema>,
}

impl RelationshipSchema {
    /// Start building a schema
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Declaration for a field of an entity type, if any
    pub fn declaration_for(&self, entity_type: &str, field: &str) -> Option<&RelationshipDeclaration> {
        self.entities.get(entity_type)?.declaration(field)
    }

    /// Metadata of an entity type
    pub fn entity(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.entities.get(entity_type)
    }

    /// Metadata of an entity type, failing for unregistered types
    pub fn require(&self, entity_type: &str) -> ModelResult<&EntitySchema> {
        self.entities.get(entity_type).ok_or_else(|| {
            ModelError::Schema(format!("Entity type '{}' is not registered", entity_type))
        })
    }

    /// Storage table of an entity type
    pub fn table_of(&self, entity_type: &str) -> Option<&str> {
        self.entities.get(entity_type).map(|e| e.table.as_str())
    }

    /// Number of registered entity types
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Collects entity definitions and validates them into a schema
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    definitions: Vec<EntityDefinition>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type
    pub fn entity(mut self, definition: EntityDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Validate every definition and freeze the schema
    pub fn build(self) -> Result<RelationshipSchema, SchemaError> {
        let mut tables: HashMap<String, String> = HashMap::new();
        for definition in &self.definitions {
            if tables
                .insert(definition.type_name.clone(), definition.table.clone())
                .is_some()
            {
                return Err(SchemaError::DuplicateEntity(definition.type_name.clone()));
            }
        }

        let mut entities = HashMap::new();
        let mut total = 0;
        for definition in self.definitions {
            let schema = freeze_definition(definition, &tables)?;
            total += schema.declarations.len();
            entities.insert(schema.type_name.clone(), schema);
        }

        debug!(
            "Relationship schema built: {} entity types, {} declarations",
            entities.len(),
            total
        );
        Ok(RelationshipSchema { entities })
    }
}

fn freeze_definition(
    definition: EntityDefinition,
    tables: &HashMap<String, String>,
) -> Result<EntitySchema, SchemaError> {
    let EntityDefinition {
        type_name,
        table,
        nested_fields,
        declarations,
    } = definition;

    let nested: HashSet<&str> = nested_fields.iter().map(String::as_str).collect();
    let mut by_field = HashMap::new();
    let mut frozen = Vec::with_capacity(declarations.len());

    for mut declaration in declarations {
        let field = declaration.field.clone();
        let err_field = || (type_name.clone(), field.clone());

        if !nested.contains(field.as_str()) {
            let (entity, field) = err_field();
            return Err(SchemaError::UnknownField { entity, field });
        }
        if by_field.contains_key(&field) {
            let (entity, field) = err_field();
            return Err(SchemaError::DuplicateDeclaration { entity, field });
        }

        let target_table = tables.get(&declaration.target_type).cloned().ok_or_else(|| {
            let (entity, field) = err_field();
            SchemaError::UnknownTarget {
                entity,
                field,
                target: declaration.target_type.clone(),
            }
        })?;

        if declaration.kind.requires_foreign_key() && declaration.foreign_key.is_none() {
            let (entity, field) = err_field();
            return Err(SchemaError::MissingForeignKey { entity, field });
        }

        let link = if declaration.kind.requires_link_table() {
            if declaration.shape != FieldShape::Collection {
                let (entity, field) = err_field();
                return Err(SchemaError::InvalidShape {
                    entity,
                    field,
                    reason: "many-to-many fields must be collections".to_string(),
                });
            }
            let link_table = declaration
                .link_table
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    let (entity, field) = err_field();
                    SchemaError::MissingLinkTable { entity, field }
                })?;
            let (owner_column, target_column) = declaration.link_columns.clone().unwrap_or_else(|| {
                (default_link_column(&table), default_link_column(&target_table))
            });
            if owner_column == target_column {
                let (entity, field) = err_field();
                return Err(SchemaError::AmbiguousLinkColumns {
                    entity,
                    field,
                    table: link_table,
                    column: owner_column,
                });
            }
            Some(LinkTable {
                table: link_table,
                owner_column,
                target_column,
            })
        } else {
            None
        };

        declaration.resolved = Some(ResolvedTarget {
            parent_table: table.clone(),
            target_table,
            link,
        });
        by_field.insert(field, frozen.len());
        frozen.push(declaration);
    }

    // Closed world: every nested entity field must say how it relates
    if let Some(missing) = nested_fields.iter().find(|f| !by_field.contains_key(f.as_str())) {
        return Err(SchemaError::MissingDeclaration {
            entity: type_name,
            field: missing.clone(),
        });
    }

    Ok(EntitySchema {
        type_name,
        table,
        declarations: frozen,
        by_field,
    })
}

/// Freeze a schema as the process-wide registry. Only the first call succeeds.
pub fn install(schema: RelationshipSchema) -> Result<&'static RelationshipSchema, SchemaError> {
    GLOBAL_SCHEMA
        .set(schema)
        .map_err(|_| SchemaError::AlreadyInstalled)?;
    GLOBAL_SCHEMA.get().ok_or(SchemaError::AlreadyInstalled)
}

/// The process-wide registry, once installed
pub fn global() -> ModelResult<&'static RelationshipSchema> {
    GLOBAL_SCHEMA
        .get()
        .ok_or_else(|| ModelError::Schema("Relationship schema has not been installed".to_string()))
}
