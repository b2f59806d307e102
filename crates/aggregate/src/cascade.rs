//! Delete Cascade Engine
//!
//! Deleting an entity removes its owned subtree and its many-to-many link
//! rows. Associated targets are left alone, including their foreign keys.
//!
//! The walk runs to completion before anything is deleted. Owned rows are
//! collected per (target table, field) group and each group is removed
//! with one batched statement, deepest groups first.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::backends::{Statement, Store};
use crate::entity::{Entity, EntityId};
use crate::error::ModelResult;
use crate::links::LinkMaintainer;
use crate::schema::{FieldIdentity, RelationshipDeclaration, RelationshipKind, RelationshipSchema};
use crate::walker::GraphWalker;
use crate::BoxFuture;

/// What a cascade removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    pub links_detached: u64,
    pub rows_deleted: u64,
    /// Number of batched delete groups issued
    pub groups: usize,
}

#[derive(Debug)]
struct DeleteGroup {
    depth: usize,
    ids: Vec<EntityId>,
    seen: HashSet<EntityId>,
}

/// Owned identities collected during the walk, keyed by (target table, field)
#[derive(Debug, Default)]
struct DeleteGroups {
    groups: BTreeMap<(String, FieldIdentity), DeleteGroup>,
}

impl DeleteGroups {
    fn record(&mut self, declaration: &RelationshipDeclaration, id: EntityId, depth: usize) {
        let key = (declaration.target_table().to_string(), declaration.identity());
        let group = self.groups.entry(key).or_insert(DeleteGroup {
            depth,
            ids: Vec::new(),
            seen: HashSet::new(),
        });
        group.depth = group.depth.max(depth);
        if group.seen.insert(id) {
            group.ids.push(id);
        }
    }

    /// Groups ordered deepest first, ties broken by key
    fn into_ordered(self) -> Vec<(String, FieldIdentity, Vec<EntityId>)> {
        let mut groups: Vec<_> = self.groups.into_iter().collect();
        groups.sort_by(|(a_key, a), (b_key, b)| b.depth.cmp(&a.depth).then_with(|| a_key.cmp(b_key)));
        groups
            .into_iter()
            .map(|((table, identity), group)| (table, identity, group.ids))
            .collect()
    }
}

/// Deletes owned subtrees and detaches many-to-many links
#[derive(Debug, Clone, Copy)]
pub struct DeleteCascadeEngine<'s> {
    walker: GraphWalker<'s>,
    links: LinkMaintainer<'s>,
    max_batch_size: usize,
}

impl<'s> DeleteCascadeEngine<'s> {
    pub fn new(schema: &'s RelationshipSchema) -> Self {
        Self {
            walker: GraphWalker::new(schema),
            links: LinkMaintainer::new(schema),
            max_batch_size: 1000,
        }
    }

    /// Split a group into several statements above this many ids
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Delete everything `root` owns and detach its many-to-many links.
    ///
    /// The row of `root` itself is left for the caller.
    pub async fn delete_cascade(&self, store: &mut dyn Store, root: &dyn Entity) -> ModelResult<CascadeSummary> {
        root.require_id("cascade delete")?;

        let mut summary = CascadeSummary::default();
        let mut groups = DeleteGroups::default();
        self.collect(store, root, 0, &mut groups, &mut summary).await?;
        self.flush(store, groups, &mut summary).await?;

        debug!(
            "Cascade delete of {} {:?}: {} links detached, {} rows in {} groups",
            root.entity_type(),
            root.id(),
            summary.links_detached,
            summary.rows_deleted,
            summary.groups
        );
        Ok(summary)
    }

    /// Delete owned children together with their subtrees.
    ///
    /// Each item names the declaration it was reached through. Items
    /// without an identity are not stored rows and are skipped.
    pub async fn delete_subtrees(
        &self,
        store: &mut dyn Store,
        items: &[(&RelationshipDeclaration, &dyn Entity)],
    ) -> ModelResult<CascadeSummary> {
        let mut summary = CascadeSummary::default();
        let mut groups = DeleteGroups::default();

        for (declaration, child) in items {
            let Some(id) = child.id() else { continue };
            groups.record(declaration, id, 0);
            self.collect(store, *child, 0, &mut groups, &mut summary).await?;
        }
        self.flush(store, groups, &mut summary).await?;
        Ok(summary)
    }

    fn collect<'a>(
        &'a self,
        store: &'a mut dyn Store,
        entity: &'a dyn Entity,
        depth: usize,
        groups: &'a mut DeleteGroups,
        summary: &'a mut CascadeSummary,
    ) -> BoxFuture<'a, ModelResult<()>> {
        Box::pin(async move {
            let visits = self.walker.visits(entity)?;

            // Links go before descending into the subtree
            if let Some(owner_id) = entity.id() {
                for visit in visits.iter().filter(|v| v.kind() == RelationshipKind::AssociatedManyToMany) {
                    summary.links_detached += self.links.detach_all(store, visit.declaration, owner_id).await?;
                }
            }

            for visit in visits.iter().filter(|v| v.kind() == RelationshipKind::Owned) {
                for child in &visit.children {
                    let Some(id) = child.id() else { continue };
                    groups.record(visit.declaration, id, depth + 1);
                    self.collect(store, *child, depth + 1, groups, summary).await?;
                }
            }
            Ok(())
        })
    }

    async fn flush(
        &self,
        store: &mut dyn Store,
        groups: DeleteGroups,
        summary: &mut CascadeSummary,
    ) -> ModelResult<()> {
        for (table, identity, ids) in groups.into_ordered() {
            for chunk in ids.chunks(self.max_batch_size) {
                let deleted = store
                    .execute(&Statement::DeleteByIds {
                        table: table.clone(),
                        ids: chunk.to_vec(),
                    })
                    .await?;
                debug!("Deleted {} rows of {} reached through {}", deleted, table, identity);
                summary.rows_deleted += deleted;
            }
            summary.groups += 1;
        }
        Ok(())
    }
}
