//! Graph Repository - create, reconcile, delete and load whole entity graphs
//!
//! Every operation runs against the caller's [`Store`], which wraps a
//! transaction the caller opened. Nothing here begins, commits or rolls
//! back; on any error the caller is expected to roll back.

use tracing::debug;

use crate::backends::{Statement, Store};
use crate::cascade::{CascadeSummary, DeleteCascadeEngine};
use crate::config::GraphConfig;
use crate::entity::{Entity, Related};
use crate::error::{ModelError, ModelResult};
use crate::links::LinkMaintainer;
use crate::loading::{BatchChildFetcher, LoadSummary, TimeWindow};
use crate::persist::GraphWriter;
use crate::reconcile::UpdateReconciler;
use crate::schema::{self, RelationshipKind, RelationshipSchema};

/// Many-to-many field values as submitted by the caller.
///
/// Reloading a saved root re-reads its many-to-many fields from the link
/// tables. Restoring the snapshot afterwards puts the submitted values back
/// through [`Entity::restore_field`].
#[derive(Debug, Clone)]
pub struct LinkSnapshot<E> {
    payload: E,
    fields: Vec<String>,
}

impl<E: Entity + Clone> LinkSnapshot<E> {
    /// Capture every many-to-many field of `payload`
    pub fn capture(schema: &RelationshipSchema, payload: &E) -> ModelResult<Self> {
        let entity_schema = schema.require(payload.entity_type())?;
        let mut fields = Vec::new();

        for declaration in entity_schema.of_kind(RelationshipKind::AssociatedManyToMany) {
            if !matches!(payload.relation(&declaration.field), Some(Related::Collection(_))) {
                return Err(ModelError::Schema(format!(
                    "{} does not expose many-to-many field '{}' as a collection",
                    payload.entity_type(),
                    declaration.field
                )));
            }
            fields.push(declaration.field.clone());
        }
        Ok(Self {
            payload: payload.clone(),
            fields,
        })
    }

    /// Overwrite the captured fields of `saved` with the submitted values
    pub fn restore(&self, saved: &mut E) -> ModelResult<()> {
        for field in &self.fields {
            saved.restore_field(field, &self.payload)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Entry points for whole-graph persistence
#[derive(Debug, Clone)]
pub struct GraphRepository<'s> {
    schema: &'s RelationshipSchema,
    config: GraphConfig,
}

impl GraphRepository<'static> {
    /// Repository over the process-wide schema
    pub fn global(config: GraphConfig) -> ModelResult<Self> {
        Self::new(schema::global()?, config)
    }
}

impl<'s> GraphRepository<'s> {
    pub fn new(schema: &'s RelationshipSchema, config: GraphConfig) -> ModelResult<Self> {
        config.validate()?;
        Ok(Self { schema, config })
    }

    pub fn schema(&self) -> &'s RelationshipSchema {
        self.schema
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn cascade(&self) -> DeleteCascadeEngine<'s> {
        DeleteCascadeEngine::new(self.schema).with_max_batch_size(self.config.max_batch_size)
    }

    pub fn reconciler(&self) -> UpdateReconciler<'s> {
        UpdateReconciler::new(self.schema).with_cascade(self.cascade())
    }

    pub fn links(&self) -> LinkMaintainer<'s> {
        LinkMaintainer::new(self.schema)
    }

    pub fn writer(&self) -> GraphWriter<'s> {
        GraphWriter::new(self.schema)
    }

    pub fn fetcher(&self) -> BatchChildFetcher<'s> {
        BatchChildFetcher::new(self.schema, self.config.clone())
    }

    /// Insert a new entity graph and return it with identities assigned
    pub async fn create<E: Entity>(&self, store: &mut dyn Store, mut entity: E) -> ModelResult<E> {
        self.writer().insert(store, &mut entity).await?;
        Ok(entity)
    }

    /// Converge the stored graph `old` to `new`, save it and return the merged entity
    pub async fn reconcile<E: Entity + Clone>(&self, store: &mut dyn Store, old: &E, mut new: E) -> ModelResult<E> {
        let summary = self.reconciler().reconcile(store, old, &new).await?;
        let snapshot = LinkSnapshot::capture(self.schema, &new)?;

        self.writer().upsert(store, &mut new).await?;

        if self.config.reload_links_after_save {
            self.links().reload_all(store, &mut new).await?;
            snapshot.restore(&mut new)?;
        }

        debug!(
            "Reconcile of {} {:?} done: {} removed, {} added, {} kept",
            new.entity_type(),
            new.id(),
            summary.removed,
            summary.added,
            summary.kept
        );
        Ok(new)
    }

    /// Delete an entity, its owned subtree and its many-to-many links
    pub async fn delete_cascade(&self, store: &mut dyn Store, entity: &dyn Entity) -> ModelResult<CascadeSummary> {
        let id = entity.require_id("delete")?;
        let table = self
            .schema
            .table_of(entity.entity_type())
            .ok_or_else(|| {
                ModelError::Schema(format!("Entity type '{}' is not registered", entity.entity_type()))
            })?
            .to_string();

        let mut summary = self.cascade().delete_cascade(store, entity).await?;
        summary.rows_deleted += store
            .execute(&Statement::DeleteByIds { table, ids: vec![id] })
            .await?;
        Ok(summary)
    }

    /// Batch-load nested children of `entities` in place
    pub async fn load_children<E: Entity>(
        &self,
        store: &mut dyn Store,
        entities: &mut [E],
        window: Option<TimeWindow>,
    ) -> ModelResult<LoadSummary> {
        let roots: Vec<&mut dyn Entity> = entities.iter_mut().map(|e| e as &mut dyn Entity).collect();
        self.fetcher().load_children(store, roots, window).await
    }

    /// Re-read every many-to-many field of `entity` through its link tables
    pub async fn reload_links(&self, store: &mut dyn Store, entity: &mut dyn Entity) -> ModelResult<()> {
        self.links().reload_all(store, entity).await
    }
}
