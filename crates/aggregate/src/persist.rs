//! Graph Writer - the row-level save path for whole entity graphs
//!
//! Rows are written parent first. Every owned row gets the parent's id
//! stamped into its foreign key column, and many-to-many link rows are
//! inserted with `ON CONFLICT DO NOTHING`, so a pair is never linked twice.

use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::backends::{OnConflict, Statement, Store};
use crate::entity::{Entity, EntityId, Row};
use crate::error::{ModelError, ModelResult};
use crate::links::LinkMaintainer;
use crate::schema::{RelationshipKind, RelationshipSchema};
use crate::walker::GraphWalker;
use crate::BoxFuture;

/// How rows are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fresh graph: rows must not exist yet, associated targets are repointed
    Insert,
    /// Save after reconciliation: rows are overwritten by id, associated
    /// targets were already handled by the reconciler
    Upsert,
}

impl WriteMode {
    fn on_conflict(self) -> OnConflict {
        match self {
            WriteMode::Insert => OnConflict::Fail,
            WriteMode::Upsert => OnConflict::UpdateAll,
        }
    }
}

/// Counters for one save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows: u64,
    pub links: u64,
    pub references: u64,
}

/// Persists an entity graph row by row
#[derive(Debug, Clone, Copy)]
pub struct GraphWriter<'s> {
    schema: &'s RelationshipSchema,
    walker: GraphWalker<'s>,
    links: LinkMaintainer<'s>,
}

impl<'s> GraphWriter<'s> {
    pub fn new(schema: &'s RelationshipSchema) -> Self {
        Self {
            schema,
            walker: GraphWalker::new(schema),
            links: LinkMaintainer::new(schema),
        }
    }

    /// Insert a new graph, assigning identities to rows that have none
    pub async fn insert(&self, store: &mut dyn Store, root: &mut dyn Entity) -> ModelResult<WriteSummary> {
        self.write(store, root, WriteMode::Insert).await
    }

    /// Overwrite an existing graph's owned rows and add missing links
    pub async fn upsert(&self, store: &mut dyn Store, root: &mut dyn Entity) -> ModelResult<WriteSummary> {
        self.write(store, root, WriteMode::Upsert).await
    }

    async fn write(&self, store: &mut dyn Store, root: &mut dyn Entity, mode: WriteMode) -> ModelResult<WriteSummary> {
        let table = self
            .schema
            .table_of(root.entity_type())
            .ok_or_else(|| {
                ModelError::Schema(format!("Entity type '{}' is not registered", root.entity_type()))
            })?
            .to_string();

        let mut summary = WriteSummary::default();
        let id = ensure_id(root);
        let row = row_with(root, id, None)?;
        summary.rows += store
            .execute(&Statement::Insert {
                table,
                row,
                on_conflict: mode.on_conflict(),
            })
            .await?;

        self.write_children(store, root, mode, &mut summary).await?;
        debug!(
            "Saved {} {} ({:?}): {} rows, {} links, {} references",
            root.entity_type(),
            id,
            mode,
            summary.rows,
            summary.links,
            summary.references
        );
        Ok(summary)
    }

    fn write_children<'a>(
        &'a self,
        store: &'a mut dyn Store,
        entity: &'a mut dyn Entity,
        mode: WriteMode,
        summary: &'a mut WriteSummary,
    ) -> BoxFuture<'a, ModelResult<()>> {
        Box::pin(async move {
            let parent_id = entity.require_id("save nested relationships")?;
            let visits = self.walker.visits_mut(entity)?;

            for visit in visits {
                let declaration = visit.declaration;
                match declaration.kind {
                    RelationshipKind::Owned => {
                        for child in visit.children {
                            let id = ensure_id(child);
                            let row = row_with(child, id, Some((declaration.foreign_key_column(), parent_id)))?;
                            summary.rows += store
                                .execute(&Statement::Insert {
                                    table: declaration.target_table().to_string(),
                                    row,
                                    on_conflict: mode.on_conflict(),
                                })
                                .await?;
                            self.write_children(store, child, mode, summary).await?;
                        }
                    }
                    RelationshipKind::Associated => {
                        for child in visit.children {
                            let target_id = child.require_id("associate with its parent")?;
                            // references were already moved by the reconciler
                            if mode == WriteMode::Upsert {
                                continue;
                            }
                            self.links
                                .attach_reference(store, declaration, parent_id, target_id)
                                .await?;
                            summary.references += 1;
                        }
                    }
                    RelationshipKind::AssociatedManyToMany => {
                        for child in visit.children {
                            let target_id = child.require_id("link to its owner")?;
                            summary.links += self.links.attach(store, declaration, parent_id, target_id).await?;
                        }
                    }
                    RelationshipKind::Ignored => {}
                }
            }
            Ok(())
        })
    }
}

fn ensure_id(entity: &mut dyn Entity) -> EntityId {
    match entity.id() {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4();
            entity.set_id(id);
            id
        }
    }
}

fn row_with(entity: &dyn Entity, id: EntityId, foreign_key: Option<(&str, EntityId)>) -> ModelResult<Row> {
    let mut row = entity.columns()?;
    row.insert("id".to_string(), JsonValue::String(id.to_string()));
    if let Some((column, parent_id)) = foreign_key {
        row.insert(column.to_string(), JsonValue::String(parent_id.to_string()));
    }
    Ok(row)
}
