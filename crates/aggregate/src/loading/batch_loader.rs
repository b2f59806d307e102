//! Batch Child Fetcher
//!
//! Loads nested children for many parents at once: one fetch per
//! (target table, field) per depth instead of one per parent.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::backends::{Statement, Store, TimeRange};
use crate::config::GraphConfig;
use crate::entity::{row_uuid, Entity, EntityId, Row};
use crate::error::{ModelError, ModelResult};
use crate::schema::{FieldIdentity, RelationshipKind, RelationshipSchema};
use crate::walker::GraphWalker;
use crate::BoxFuture;

use super::index::{BatchChildIndexer, ChildIndex};

/// Creation-time window for partitioned tables (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> ModelResult<Self> {
        if start > end {
            return Err(ModelError::Configuration(format!(
                "Time window starts at {} after it ends at {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Counters for one batch load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub fetches: usize,
    pub rows: usize,
    /// Deepest level that was loaded
    pub depth: usize,
}

/// Rows of one field, grouped by parent id
type Scatter = HashMap<FieldIdentity, HashMap<EntityId, Vec<Row>>>;

/// Batched loader of owned (and, at the top level, associated) children
#[derive(Debug, Clone)]
pub struct BatchChildFetcher<'s> {
    walker: GraphWalker<'s>,
    indexer: BatchChildIndexer<'s>,
    config: GraphConfig,
}

impl<'s> BatchChildFetcher<'s> {
    pub fn new(schema: &'s RelationshipSchema, config: GraphConfig) -> Self {
        Self {
            walker: GraphWalker::new(schema),
            indexer: BatchChildIndexer::new(schema),
            config,
        }
    }

    /// Load the children of every root and attach them in place.
    ///
    /// The first level loads Owned and Associated fields; deeper levels
    /// continue with Owned fields only, up to `max_depth` levels.
    pub async fn load_children(
        &self,
        store: &mut dyn Store,
        roots: Vec<&mut dyn Entity>,
        window: Option<TimeWindow>,
    ) -> ModelResult<LoadSummary> {
        let mut summary = LoadSummary::default();
        if roots.is_empty() {
            return Ok(summary);
        }
        let root_count = roots.len();
        self.load_level(store, roots, window, 1, &mut summary).await?;
        debug!(
            "Batch-loaded children of {} roots: {} fetches, {} rows, depth {}",
            root_count, summary.fetches, summary.rows, summary.depth
        );
        Ok(summary)
    }

    fn load_level<'a, 'p: 'a>(
        &'a self,
        store: &'a mut dyn Store,
        mut parents: Vec<&'p mut dyn Entity>,
        window: Option<TimeWindow>,
        depth: usize,
        summary: &'a mut LoadSummary,
    ) -> BoxFuture<'a, ModelResult<()>> {
        Box::pin(async move {
            let kinds: &[RelationshipKind] = if depth == 1 {
                &[RelationshipKind::Owned, RelationshipKind::Associated]
            } else {
                &[RelationshipKind::Owned]
            };

            let index = {
                let views: Vec<&dyn Entity> = parents.iter().map(|p| &**p).collect();
                self.indexer.index(&views, kinds)?
            };
            if index.is_empty() {
                return Ok(());
            }

            let scatter = self.fetch(store, &index, window, summary).await?;
            summary.depth = summary.depth.max(depth);

            let schema = self.walker.schema();
            for parent in parents.iter_mut() {
                attach_rows(schema, &mut **parent, kinds, &scatter)?;
            }

            let mut children: Vec<&'p mut dyn Entity> = Vec::new();
            for parent in parents {
                for visit in self.walker.visits_mut(parent)? {
                    if visit.declaration.kind == RelationshipKind::Owned {
                        children.extend(visit.children.into_iter().filter(|c| c.id().is_some()));
                    }
                }
            }
            if children.is_empty() {
                return Ok(());
            }
            if depth >= self.config.max_depth {
                warn!(
                    "Batch loading stopped at depth {} with {} children not descended into",
                    depth,
                    children.len()
                );
                return Ok(());
            }

            self.load_level(store, children, window, depth + 1, summary).await
        })
    }

    /// One fetch per index entry, chunked by `max_batch_size`
    async fn fetch(
        &self,
        store: &mut dyn Store,
        index: &ChildIndex<'_>,
        window: Option<TimeWindow>,
        summary: &mut LoadSummary,
    ) -> ModelResult<Scatter> {
        let range = window.map(|w| TimeRange {
            column: self.config.partition_column.clone(),
            start: w.start,
            end: w.end,
        });

        let mut scatter = Scatter::new();
        for entry in index.entries() {
            let declaration = entry.declaration;
            let column = declaration.foreign_key_column();
            let by_parent = scatter.entry(declaration.identity()).or_default();

            for chunk in entry.parent_ids.chunks(self.config.max_batch_size) {
                let rows = store
                    .fetch(&Statement::SelectByParents {
                        table: declaration.target_table().to_string(),
                        parent_column: column.to_string(),
                        parent_ids: chunk.to_vec(),
                        window: range.clone(),
                    })
                    .await?;
                summary.fetches += 1;
                summary.rows += rows.len();

                for row in rows {
                    if let Some(parent_id) = row_uuid(&row, column) {
                        by_parent.entry(parent_id).or_default().push(row);
                    }
                }
            }
        }
        Ok(scatter)
    }
}

/// Attach fetched rows to every indexed field of `parent`, empty when none matched
fn attach_rows(
    schema: &RelationshipSchema,
    parent: &mut dyn Entity,
    kinds: &[RelationshipKind],
    scatter: &Scatter,
) -> ModelResult<()> {
    let Some(parent_id) = parent.id() else {
        return Ok(());
    };
    let entity_schema = schema.require(parent.entity_type())?;
    for declaration in entity_schema.declarations().iter().filter(|d| kinds.contains(&d.kind)) {
        let rows = scatter
            .get(&declaration.identity())
            .and_then(|by_parent| by_parent.get(&parent_id))
            .cloned()
            .unwrap_or_default();
        parent.attach(&declaration.field, rows)?;
    }
    Ok(())
}
