//! Graph Walker - one level of declared relationship fields at a time
//!
//! The walker reads the declarations of an entity's type and hands each
//! declared field's present children to a visitor. It never recurses on its
//! own; visitors decide whether to descend (typically only into Owned
//! children, since Associated targets are independently owned).

use std::collections::HashMap;

use crate::entity::{Entity, Related, RelatedMut};
use crate::error::{ModelError, ModelResult};
use crate::schema::{FieldIdentity, FieldShape, RelationshipDeclaration, RelationshipKind, RelationshipSchema};

/// One declared field of one entity, with its present children
pub struct FieldVisit<'s, 'a> {
    pub declaration: &'s RelationshipDeclaration,
    pub children: Vec<&'a dyn Entity>,
}

impl<'s, 'a> FieldVisit<'s, 'a> {
    pub fn kind(&self) -> RelationshipKind {
        self.declaration.kind
    }

    pub fn shape(&self) -> FieldShape {
        self.declaration.shape
    }

    pub fn identity(&self) -> FieldIdentity {
        self.declaration.identity()
    }
}

/// Mutable counterpart of [`FieldVisit`], used by write paths
pub struct FieldVisitMut<'s, 'a> {
    pub declaration: &'s RelationshipDeclaration,
    pub children: Vec<&'a mut dyn Entity>,
}

/// Structural traversal over declared relationship fields
#[derive(Debug, Clone, Copy)]
pub struct GraphWalker<'s> {
    schema: &'s RelationshipSchema,
}

impl<'s> GraphWalker<'s> {
    pub fn new(schema: &'s RelationshipSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &'s RelationshipSchema {
        self.schema
    }

    /// Visit every non-ignored declared field of `entity`, in declaration order.
    ///
    /// A nested field returned by [`Entity::relations`] without a declaration
    /// is a schema error, reported before any field is visited.
    ///
    /// - `Single`: visited when the embedded entity has an identity
    /// - `OptionalSingle`: visited when present and its identity is set
    /// - `Collection`: every element, in original order
    ///
    /// The first visitor error stops the walk and is returned unchanged.
    pub fn walk<'a, F>(&self, entity: &'a dyn Entity, mut visit: F) -> ModelResult<()>
    where
        F: FnMut(FieldVisit<'s, 'a>) -> ModelResult<()>,
    {
        let entity_schema = self.schema.require(entity.entity_type())?;
        let mut relations: HashMap<&'static str, Related<'a>> = entity.relations().into_iter().collect();

        let mut declared = Vec::with_capacity(entity_schema.declarations().len());
        for declaration in entity_schema.declarations() {
            let related = relations.remove(declaration.field.as_str());
            if declaration.kind == RelationshipKind::Ignored {
                continue;
            }
            let related = related.ok_or_else(|| unexposed_field(entity.entity_type(), declaration))?;
            declared.push((declaration, related));
        }
        reject_undeclared(entity.entity_type(), relations.keys())?;

        for (declaration, related) in declared {
            let children = present(declaration, related)?;
            visit(FieldVisit { declaration, children })?;
        }
        Ok(())
    }

    /// Collect all field visits of `entity`
    pub fn visits<'a>(&self, entity: &'a dyn Entity) -> ModelResult<Vec<FieldVisit<'s, 'a>>> {
        let mut visits = Vec::new();
        self.walk(entity, |visit| {
            visits.push(visit);
            Ok(())
        })?;
        Ok(visits)
    }

    /// Mutable walk for write paths.
    ///
    /// Unlike [`walk`](Self::walk), a present optional child is returned even
    /// when its identity is still unset, since writers assign identities.
    /// A `Single` child without identity is still treated as absent.
    pub fn visits_mut<'a>(&self, entity: &'a mut dyn Entity) -> ModelResult<Vec<FieldVisitMut<'s, 'a>>> {
        let entity_type = entity.entity_type();
        let entity_schema = self.schema.require(entity_type)?;
        let mut relations: HashMap<&'static str, RelatedMut<'a>> =
            entity.relations_mut().into_iter().collect();

        let mut declared = Vec::with_capacity(entity_schema.declarations().len());
        for declaration in entity_schema.declarations() {
            let related = relations.remove(declaration.field.as_str());
            if declaration.kind == RelationshipKind::Ignored {
                continue;
            }
            let related = related.ok_or_else(|| unexposed_field(entity_type, declaration))?;
            declared.push((declaration, related));
        }
        reject_undeclared(entity_type, relations.keys())?;

        let mut visits = Vec::with_capacity(declared.len());
        for (declaration, related) in declared {
            let children = present_mut(declaration, related)?;
            visits.push(FieldVisitMut { declaration, children });
        }
        Ok(visits)
    }
}

fn present<'a>(declaration: &RelationshipDeclaration, related: Related<'a>) -> ModelResult<Vec<&'a dyn Entity>> {
    match (declaration.shape, related) {
        (FieldShape::Single, Related::Single(child)) => {
            Ok(child.id().map(|_| child).into_iter().collect())
        }
        (FieldShape::OptionalSingle, Related::Optional(child)) => {
            Ok(child.filter(|c| c.id().is_some()).into_iter().collect())
        }
        (FieldShape::Collection, Related::Collection(children)) => Ok(children),
        _ => Err(shape_mismatch(declaration)),
    }
}

fn present_mut<'a>(
    declaration: &RelationshipDeclaration,
    related: RelatedMut<'a>,
) -> ModelResult<Vec<&'a mut dyn Entity>> {
    match (declaration.shape, related) {
        (FieldShape::Single, RelatedMut::Single(child)) => {
            if child.id().is_some() {
                Ok(vec![child])
            } else {
                Ok(Vec::new())
            }
        }
        (FieldShape::OptionalSingle, RelatedMut::Optional(child)) => Ok(child.into_iter().collect()),
        (FieldShape::Collection, RelatedMut::Collection(children)) => Ok(children),
        _ => Err(shape_mismatch(declaration)),
    }
}

/// Every nested field an entity exposes must carry a declaration
fn reject_undeclared<'k>(entity_type: &str, leftover: impl Iterator<Item = &'k &'static str>) -> ModelResult<()> {
    let mut leftover: Vec<&str> = leftover.copied().collect();
    if leftover.is_empty() {
        return Ok(());
    }
    leftover.sort_unstable();
    Err(ModelError::Schema(format!(
        "{} exposes nested field(s) without a relationship declaration: {}",
        entity_type,
        leftover.join(", ")
    )))
}

fn unexposed_field(entity_type: &str, declaration: &RelationshipDeclaration) -> ModelError {
    ModelError::Schema(format!(
        "{} does not expose declared field '{}'",
        entity_type, declaration.field
    ))
}

fn shape_mismatch(declaration: &RelationshipDeclaration) -> ModelError {
    ModelError::Schema(format!(
        "Field '{}' is declared as {:?} but holds a different shape",
        declaration.identity(),
        declaration.shape
    ))
}
