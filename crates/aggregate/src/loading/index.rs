//! Child Index - which parent ids need rows from which table, per field

use std::collections::{BTreeMap, HashSet};

use crate::entity::{Entity, EntityId};
use crate::error::ModelResult;
use crate::schema::{FieldIdentity, RelationshipDeclaration, RelationshipKind, RelationshipSchema};

/// Parents waiting for the rows of one relationship field
#[derive(Debug, Clone)]
pub struct ChildIndexEntry<'s> {
    /// Declaration the rows will be attached through
    pub declaration: &'s RelationshipDeclaration,
    /// Parent ids, deduplicated, in first-seen order
    pub parent_ids: Vec<EntityId>,
    seen: HashSet<EntityId>,
}

/// `target table -> field identity -> parents`
#[derive(Debug, Clone, Default)]
pub struct ChildIndex<'s> {
    tables: BTreeMap<String, BTreeMap<FieldIdentity, ChildIndexEntry<'s>>>,
}

impl<'s> ChildIndex<'s> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parent_id` needs the rows of `declaration`
    pub fn add(&mut self, declaration: &'s RelationshipDeclaration, parent_id: EntityId) {
        let entry = self
            .tables
            .entry(declaration.target_table().to_string())
            .or_default()
            .entry(declaration.identity())
            .or_insert_with(|| ChildIndexEntry {
                declaration,
                parent_ids: Vec::new(),
                seen: HashSet::new(),
            });
        if entry.seen.insert(parent_id) {
            entry.parent_ids.push(parent_id);
        }
    }

    /// Entries of one target table
    pub fn table(&self, table: &str) -> Option<&BTreeMap<FieldIdentity, ChildIndexEntry<'s>>> {
        self.tables.get(table)
    }

    /// All entries, ordered by table then field identity
    pub fn entries(&self) -> impl Iterator<Item = &ChildIndexEntry<'s>> {
        self.tables.values().flat_map(|fields| fields.values())
    }

    /// Number of (table, field) entries, one fetch each
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Builds a [`ChildIndex`] for a batch of parents.
///
/// The index comes from each parent type's declarations, not from current
/// field values: the fields being loaded are still empty.
#[derive(Debug, Clone, Copy)]
pub struct BatchChildIndexer<'s> {
    schema: &'s RelationshipSchema,
}

impl<'s> BatchChildIndexer<'s> {
    pub fn new(schema: &'s RelationshipSchema) -> Self {
        Self { schema }
    }

    /// Index every declared field of `kinds` on every parent
    pub fn index(&self, parents: &[&dyn Entity], kinds: &[RelationshipKind]) -> ModelResult<ChildIndex<'s>> {
        let mut index = ChildIndex::new();
        for parent in parents {
            let entity_schema = self.schema.require(parent.entity_type())?;
            let parent_id = parent.require_id("batch-load children")?;
            for declaration in entity_schema.declarations() {
                if kinds.contains(&declaration.kind) {
                    index.add(declaration, parent_id);
                }
            }
        }
        Ok(index)
    }
}
