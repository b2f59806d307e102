//! Update Reconciler
//!
//! Compares the stored version of an entity graph with the submitted one and
//! issues the deletes, detaches and reference updates needed to converge.
//! New rows and new many-to-many links are left to the save that follows
//! (see [`GraphWriter::upsert`](crate::persist::GraphWriter::upsert)).

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::backends::{Statement, Store};
use crate::cascade::{CascadeSummary, DeleteCascadeEngine};
use crate::entity::{Entity, EntityId};
use crate::error::{ModelError, ModelResult};
use crate::links::LinkMaintainer;
use crate::schema::{RelationshipDeclaration, RelationshipKind, RelationshipSchema};
use crate::walker::{FieldVisit, GraphWalker};
use crate::BoxFuture;

/// Removed/added/kept partition of two identity lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSet {
    /// In old, not in new (old order)
    pub removed: Vec<EntityId>,
    /// In new, not in old (new order)
    pub added: Vec<EntityId>,
    /// In both (old order)
    pub kept: Vec<EntityId>,
}

impl DiffSet {
    pub fn compute(old: &[EntityId], new: &[EntityId]) -> Self {
        let old_set: HashSet<EntityId> = old.iter().copied().collect();
        let new_set: HashSet<EntityId> = new.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut diff = DiffSet::default();

        for id in old {
            if !seen.insert(*id) {
                continue;
            }
            if new_set.contains(id) {
                diff.kept.push(*id);
            } else {
                diff.removed.push(*id);
            }
        }
        for id in new {
            if !old_set.contains(id) && seen.insert(*id) {
                diff.added.push(*id);
            }
        }
        diff
    }

    /// True when nothing was added or removed
    pub fn is_unchanged(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Counters for one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub removed: usize,
    pub added: usize,
    pub kept: usize,
    pub cascade: CascadeSummary,
}

/// Diff-based reconciliation of declared relationship fields
#[derive(Debug, Clone, Copy)]
pub struct UpdateReconciler<'s> {
    walker: GraphWalker<'s>,
    cascade: DeleteCascadeEngine<'s>,
    links: LinkMaintainer<'s>,
}

impl<'s> UpdateReconciler<'s> {
    pub fn new(schema: &'s RelationshipSchema) -> Self {
        Self {
            walker: GraphWalker::new(schema),
            cascade: DeleteCascadeEngine::new(schema),
            links: LinkMaintainer::new(schema),
        }
    }

    pub fn with_cascade(mut self, cascade: DeleteCascadeEngine<'s>) -> Self {
        self.cascade = cascade;
        self
    }

    /// Converge the stored relationships of `old` to those of `new`
    pub async fn reconcile(
        &self,
        store: &mut dyn Store,
        old: &dyn Entity,
        new: &dyn Entity,
    ) -> ModelResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        self.reconcile_pair(store, old, new, &mut summary).await?;
        debug!(
            "Reconciled {} {:?}: {} removed, {} added, {} kept",
            new.entity_type(),
            new.id(),
            summary.removed,
            summary.added,
            summary.kept
        );
        Ok(summary)
    }

    fn reconcile_pair<'a>(
        &'a self,
        store: &'a mut dyn Store,
        old: &'a dyn Entity,
        new: &'a dyn Entity,
        summary: &'a mut ReconcileSummary,
    ) -> BoxFuture<'a, ModelResult<()>> {
        Box::pin(async move {
            if old.entity_type() != new.entity_type() {
                return Err(ModelError::Schema(format!(
                    "Cannot reconcile {} against {}",
                    old.entity_type(),
                    new.entity_type()
                )));
            }
            let parent_id = new.require_id("reconcile relationships")?;
            if old.id() != Some(parent_id) {
                return Err(ModelError::Identity(format!(
                    "{} {} cannot be reconciled against a different stored identity",
                    new.entity_type(),
                    parent_id
                )));
            }

            let old_visits = self.walker.visits(old)?;
            let new_visits = self.walker.visits(new)?;

            for (old_visit, new_visit) in old_visits.iter().zip(new_visits.iter()) {
                self.reconcile_field(store, parent_id, old_visit, new_visit, summary)
                    .await?;
            }
            Ok(())
        })
    }

    async fn reconcile_field(
        &self,
        store: &mut dyn Store,
        parent_id: EntityId,
        old_visit: &FieldVisit<'_, '_>,
        new_visit: &FieldVisit<'_, '_>,
        summary: &mut ReconcileSummary,
    ) -> ModelResult<()> {
        let declaration = new_visit.declaration;

        let mut old_by_id: HashMap<EntityId, &dyn Entity> = HashMap::new();
        let mut old_ids = Vec::with_capacity(old_visit.children.len());
        for child in &old_visit.children {
            let id = child.id().ok_or_else(|| {
                ModelError::Identity(format!(
                    "Stored element of '{}' has no identity",
                    declaration.identity()
                ))
            })?;
            old_ids.push(id);
            old_by_id.insert(id, *child);
        }

        // New elements without identity are brand-new rows for the save to create
        let mut new_by_id: HashMap<EntityId, &dyn Entity> = HashMap::new();
        let mut new_ids = Vec::with_capacity(new_visit.children.len());
        for child in &new_visit.children {
            if let Some(id) = child.id() {
                new_ids.push(id);
                new_by_id.insert(id, *child);
            }
        }

        let diff = DiffSet::compute(&old_ids, &new_ids);
        summary.removed += diff.removed.len();
        summary.added += diff.added.len();
        summary.kept += diff.kept.len();

        match declaration.kind {
            RelationshipKind::Owned => {
                let removed: Vec<(&RelationshipDeclaration, &dyn Entity)> = diff
                    .removed
                    .iter()
                    .filter_map(|id| old_by_id.get(id).map(|child| (declaration, *child)))
                    .collect();
                if !removed.is_empty() {
                    let cascade = self.cascade.delete_subtrees(store, &removed).await?;
                    summary.cascade.links_detached += cascade.links_detached;
                    summary.cascade.rows_deleted += cascade.rows_deleted;
                    summary.cascade.groups += cascade.groups;
                }

                for id in &diff.kept {
                    if let (Some(old_child), Some(new_child)) = (old_by_id.get(id), new_by_id.get(id)) {
                        self.reconcile_pair(store, *old_child, *new_child, summary).await?;
                    }
                }
            }
            RelationshipKind::Associated => {
                for id in &diff.removed {
                    self.links.detach_reference(store, declaration, parent_id, *id).await?;
                }
                for id in &diff.added {
                    self.require_target(store, declaration, *id).await?;
                    self.links.attach_reference(store, declaration, parent_id, *id).await?;
                }
            }
            RelationshipKind::AssociatedManyToMany => {
                if new_ids.is_empty() && !diff.removed.is_empty() {
                    self.links.detach_all(store, declaration, parent_id).await?;
                } else {
                    for id in &diff.removed {
                        self.links.detach_one(store, declaration, parent_id, *id).await?;
                    }
                }
            }
            RelationshipKind::Ignored => {}
        }
        Ok(())
    }

    /// Reload an associated target before pointing it at the parent
    async fn require_target(
        &self,
        store: &mut dyn Store,
        declaration: &RelationshipDeclaration,
        id: EntityId,
    ) -> ModelResult<()> {
        let rows = store
            .fetch(&Statement::SelectById {
                table: declaration.target_table().to_string(),
                id,
            })
            .await?;
        if rows.is_empty() {
            return Err(ModelError::NotFound(format!(
                "{} {} added to {}",
                declaration.target_table(),
                id,
                declaration.identity()
            )));
        }
        Ok(())
    }
}
