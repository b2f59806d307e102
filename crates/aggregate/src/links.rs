//! Link Maintainer - association rows between independently owned entities
//!
//! Many-to-many link rows are always addressed through the link table of
//! the field's declaration. Two fields connecting the same pair of entity
//! types use two different link tables, so the table is never derived from
//! the type names.

use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use crate::backends::{LinkTargets, OnConflict, Statement, Store};
use crate::entity::{Entity, EntityId, Row};
use crate::error::{ModelError, ModelResult};
use crate::schema::{LinkTable, RelationshipDeclaration, RelationshipKind, RelationshipSchema};

/// Creates, removes and re-reads association rows
#[derive(Debug, Clone, Copy)]
pub struct LinkMaintainer<'s> {
    schema: &'s RelationshipSchema,
}

impl<'s> LinkMaintainer<'s> {
    pub fn new(schema: &'s RelationshipSchema) -> Self {
        Self { schema }
    }

    /// Delete every link row of `owner_id` for a many-to-many field
    pub async fn detach_all(
        &self,
        store: &mut dyn Store,
        declaration: &RelationshipDeclaration,
        owner_id: EntityId,
    ) -> ModelResult<u64> {
        let link = link_of(declaration)?;
        let removed = store
            .execute(&delete_links(link, owner_id, LinkTargets::All))
            .await?;
        trace!("Detached {} links of {} from {}", removed, owner_id, link.table);
        Ok(removed)
    }

    /// Delete the single link row for (`owner_id`, `target_id`)
    pub async fn detach_one(
        &self,
        store: &mut dyn Store,
        declaration: &RelationshipDeclaration,
        owner_id: EntityId,
        target_id: EntityId,
    ) -> ModelResult<u64> {
        let link = link_of(declaration)?;
        store
            .execute(&delete_links(link, owner_id, LinkTargets::One(target_id)))
            .await
    }

    /// Insert the link row for (`owner_id`, `target_id`) unless it already exists
    pub async fn attach(
        &self,
        store: &mut dyn Store,
        declaration: &RelationshipDeclaration,
        owner_id: EntityId,
        target_id: EntityId,
    ) -> ModelResult<u64> {
        let link = link_of(declaration)?;
        let mut row = Row::new();
        row.insert(link.owner_column.clone(), JsonValue::String(owner_id.to_string()));
        row.insert(link.target_column.clone(), JsonValue::String(target_id.to_string()));

        store
            .execute(&Statement::Insert {
                table: link.table.clone(),
                row,
                on_conflict: OnConflict::Ignore,
            })
            .await
    }

    /// Point the foreign key of an associated target at `parent_id`.
    ///
    /// Fails with `NotFound` when the target row does not exist.
    pub async fn attach_reference(
        &self,
        store: &mut dyn Store,
        declaration: &RelationshipDeclaration,
        parent_id: EntityId,
        target_id: EntityId,
    ) -> ModelResult<()> {
        let updated = store
            .execute(&Statement::UpdateReference {
                table: declaration.target_table().to_string(),
                column: declaration.foreign_key_column().to_string(),
                value: Some(parent_id),
                id: target_id,
                expected: None,
            })
            .await?;

        if updated == 0 {
            return Err(ModelError::NotFound(format!(
                "{} {} referenced by {}",
                declaration.target_table(),
                target_id,
                declaration.identity()
            )));
        }
        Ok(())
    }

    /// Clear the foreign key of an associated target, if it still points at `parent_id`
    pub async fn detach_reference(
        &self,
        store: &mut dyn Store,
        declaration: &RelationshipDeclaration,
        parent_id: EntityId,
        target_id: EntityId,
    ) -> ModelResult<u64> {
        store
            .execute(&Statement::UpdateReference {
                table: declaration.target_table().to_string(),
                column: declaration.foreign_key_column().to_string(),
                value: None,
                id: target_id,
                expected: Some(parent_id),
            })
            .await
    }

    /// Re-read a many-to-many field through its link table and overwrite it in memory
    pub async fn reload(
        &self,
        store: &mut dyn Store,
        owner: &mut dyn Entity,
        field: &str,
    ) -> ModelResult<usize> {
        let declaration = self
            .schema
            .declaration_for(owner.entity_type(), field)
            .ok_or_else(|| {
                ModelError::Schema(format!(
                    "{} has no relationship declaration for '{}'",
                    owner.entity_type(),
                    field
                ))
            })?;
        let link = link_of(declaration)?;
        let owner_id = owner.require_id("reload many-to-many links")?;

        let rows = store
            .fetch(&Statement::SelectThroughLink {
                target_table: declaration.target_table().to_string(),
                link_table: link.table.clone(),
                owner_column: link.owner_column.clone(),
                target_column: link.target_column.clone(),
                owner_id,
            })
            .await?;

        let count = rows.len();
        owner.attach(field, rows)?;
        debug!("Reloaded {} '{}' targets through {}", count, declaration.identity(), link.table);
        Ok(count)
    }

    /// Reload every many-to-many field of `owner`
    pub async fn reload_all(&self, store: &mut dyn Store, owner: &mut dyn Entity) -> ModelResult<()> {
        let fields: Vec<String> = self
            .schema
            .require(owner.entity_type())?
            .of_kind(RelationshipKind::AssociatedManyToMany)
            .map(|d| d.field.clone())
            .collect();

        for field in fields {
            self.reload(store, owner, &field).await?;
        }
        Ok(())
    }
}

fn link_of(declaration: &RelationshipDeclaration) -> ModelResult<&LinkTable> {
    declaration.link().ok_or_else(|| {
        ModelError::Schema(format!(
            "Field '{}' is not a many-to-many relationship",
            declaration.identity()
        ))
    })
}

fn delete_links(link: &LinkTable, owner_id: EntityId, targets: LinkTargets) -> Statement {
    Statement::DeleteLinks {
        table: link.table.clone(),
        owner_column: link.owner_column.clone(),
        owner_id,
        target_column: link.target_column.clone(),
        targets,
    }
}
