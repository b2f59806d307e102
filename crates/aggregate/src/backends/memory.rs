//! In-memory Store
//!
//! Interprets [`Statement`]s over plain row vectors and records every
//! statement it receives. Rows carrying an `id` column behave like entity
//! tables (unique by id); rows without one behave like link tables
//! (unique by their whole content).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use tracing::trace;

use crate::backends::core::{LinkTargets, OnConflict, Statement, Store};
use crate::entity::{row_uuid, EntityId, Row};
use crate::error::{ModelError, OrmResult};

/// Statement-logging in-memory store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: BTreeMap<String, Vec<Row>>,
    log: Vec<Statement>,
    failing: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row without logging a statement
    pub fn seed(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Make every statement touching `table` fail with a store error
    pub fn fail_on_table(&mut self, table: &str) {
        self.failing.insert(table.to_string());
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Row of an entity table by id
    pub fn row(&self, table: &str, id: EntityId) -> Option<&Row> {
        self.rows(table).iter().find(|row| row_uuid(row, "id") == Some(id))
    }

    pub fn contains(&self, table: &str, id: EntityId) -> bool {
        self.row(table, id).is_some()
    }

    /// Every statement received, in order
    pub fn statements(&self) -> &[Statement] {
        &self.log
    }

    /// Write statements only
    pub fn writes(&self) -> Vec<&Statement> {
        self.log.iter().filter(|s| s.is_write()).collect()
    }

    /// Number of statements of `kind` against `table`
    pub fn count(&self, kind: &str, table: &str) -> usize {
        self.log
            .iter()
            .filter(|s| s.kind() == kind && s.table() == table)
            .count()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn table_mut(&mut self, table: &str) -> &mut Vec<Row> {
        self.tables.entry(table.to_string()).or_default()
    }

    fn apply(&mut self, statement: &Statement) -> OrmResult<u64> {
        match statement {
            Statement::Insert {
                table,
                row,
                on_conflict,
            } => {
                let rows = self.table_mut(table);
                let existing = match row_uuid(row, "id") {
                    Some(id) => rows.iter().position(|r| row_uuid(r, "id") == Some(id)),
                    None => rows.iter().position(|r| r == row),
                };
                match (existing, on_conflict) {
                    (None, _) => {
                        rows.push(row.clone());
                        Ok(1)
                    }
                    (Some(_), OnConflict::Ignore) => Ok(0),
                    (Some(index), OnConflict::UpdateAll) => {
                        rows[index] = row.clone();
                        Ok(1)
                    }
                    (Some(_), OnConflict::Fail) => Err(ModelError::Database(format!(
                        "duplicate key value violates unique constraint on '{}'",
                        table
                    ))),
                }
            }
            Statement::UpdateReference {
                table,
                column,
                value,
                id,
                expected,
            } => {
                let Some(row) = self
                    .table_mut(table)
                    .iter_mut()
                    .find(|r| row_uuid(r, "id") == Some(*id))
                else {
                    return Ok(0);
                };
                if let Some(expected) = expected {
                    if row_uuid(row, column) != Some(*expected) {
                        return Ok(0);
                    }
                }
                let value = value
                    .map(|v| JsonValue::String(v.to_string()))
                    .unwrap_or(JsonValue::Null);
                row.insert(column.clone(), value);
                Ok(1)
            }
            Statement::DeleteByIds { table, ids } => {
                let rows = self.table_mut(table);
                let before = rows.len();
                rows.retain(|r| !row_uuid(r, "id").is_some_and(|id| ids.contains(&id)));
                Ok((before - rows.len()) as u64)
            }
            Statement::DeleteLinks {
                table,
                owner_column,
                owner_id,
                target_column,
                targets,
            } => {
                let rows = self.table_mut(table);
                let before = rows.len();
                rows.retain(|r| {
                    if row_uuid(r, owner_column) != Some(*owner_id) {
                        return true;
                    }
                    let target = row_uuid(r, target_column);
                    let matched = match targets {
                        LinkTargets::All => true,
                        LinkTargets::One(id) => target == Some(*id),
                        LinkTargets::Many(ids) => target.is_some_and(|t| ids.contains(&t)),
                    };
                    !matched
                });
                Ok((before - rows.len()) as u64)
            }
            _ => Ok(0),
        }
    }

    fn query(&self, statement: &Statement) -> Vec<Row> {
        match statement {
            Statement::SelectById { table, id } => self.row(table, *id).cloned().into_iter().collect(),
            Statement::SelectByParents {
                table,
                parent_column,
                parent_ids,
                window,
            } => self
                .rows(table)
                .iter()
                .filter(|r| row_uuid(r, parent_column).is_some_and(|p| parent_ids.contains(&p)))
                .filter(|r| match window {
                    Some(range) => row_timestamp(r, &range.column)
                        .is_some_and(|at| at >= range.start && at <= range.end),
                    None => true,
                })
                .cloned()
                .collect(),
            Statement::SelectThroughLink {
                target_table,
                link_table,
                owner_column,
                target_column,
                owner_id,
            } => self
                .rows(link_table)
                .iter()
                .filter(|link| row_uuid(link, owner_column) == Some(*owner_id))
                .filter_map(|link| row_uuid(link, target_column))
                .filter_map(|target| self.row(target_table, target).cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn check_failure(&self, statement: &Statement) -> OrmResult<()> {
        let touched = match statement {
            Statement::SelectThroughLink {
                target_table,
                link_table,
                ..
            } => self.failing.contains(target_table) || self.failing.contains(link_table),
            other => self.failing.contains(other.table()),
        };
        if touched {
            return Err(ModelError::Database(format!(
                "injected failure on '{}'",
                statement.table()
            )));
        }
        Ok(())
    }
}

fn row_timestamp(row: &Row, column: &str) -> Option<DateTime<Utc>> {
    match row.get(column)? {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        trace!("{} on {}", statement.kind(), statement.table());
        self.log.push(statement.clone());
        self.check_failure(statement)?;
        self.apply(statement)
    }

    async fn fetch(&mut self, statement: &Statement) -> OrmResult<Vec<Row>> {
        trace!("{} on {}", statement.kind(), statement.table());
        self.log.push(statement.clone());
        self.check_failure(statement)?;
        Ok(self.query(statement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::core::TimeRange;
    use serde_json::json;
    use uuid::Uuid;

    fn entity_row(id: Uuid, owner: Uuid) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(id.to_string()));
        row.insert("owner_id".to_string(), json!(owner.to_string()));
        row
    }

    fn link_row(owner: Uuid, club: Uuid) -> Row {
        let mut row = Row::new();
        row.insert("owner_id".to_string(), json!(owner.to_string()));
        row.insert("club_id".to_string(), json!(club.to_string()));
        row
    }

    #[tokio::test]
    async fn test_insert_conflict_modes() {
        let mut store = MemoryStore::new();
        let (id, owner) = (Uuid::new_v4(), Uuid::new_v4());
        let insert = |on_conflict| Statement::Insert {
            table: "dogs".to_string(),
            row: entity_row(id, owner),
            on_conflict,
        };

        assert_eq!(store.execute(&insert(OnConflict::Fail)).await.unwrap(), 1);
        assert!(store.execute(&insert(OnConflict::Fail)).await.unwrap_err().is_store_error());
        assert_eq!(store.execute(&insert(OnConflict::Ignore)).await.unwrap(), 0);
        assert_eq!(store.execute(&insert(OnConflict::UpdateAll)).await.unwrap(), 1);
        assert_eq!(store.rows("dogs").len(), 1);
        assert_eq!(store.statements().len(), 4);
    }

    #[tokio::test]
    async fn test_link_rows_are_unique_by_content() {
        let mut store = MemoryStore::new();
        let (owner, club) = (Uuid::new_v4(), Uuid::new_v4());
        let insert = Statement::Insert {
            table: "owner_clubs".to_string(),
            row: link_row(owner, club),
            on_conflict: OnConflict::Ignore,
        };

        store.execute(&insert).await.unwrap();
        store.execute(&insert).await.unwrap();
        assert_eq!(store.rows("owner_clubs").len(), 1);

        let removed = store
            .execute(&Statement::DeleteLinks {
                table: "owner_clubs".to_string(),
                owner_column: "owner_id".to_string(),
                owner_id: owner,
                target_column: "club_id".to_string(),
                targets: LinkTargets::Many(vec![club]),
            })
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.rows("owner_clubs").is_empty());
    }

    #[tokio::test]
    async fn test_guarded_reference_update() {
        let mut store = MemoryStore::new();
        let (walker, owner) = (Uuid::new_v4(), Uuid::new_v4());
        store.seed("walkers", entity_row(walker, owner));

        let clear = |expected| Statement::UpdateReference {
            table: "walkers".to_string(),
            column: "owner_id".to_string(),
            value: None,
            id: walker,
            expected: Some(expected),
        };

        assert_eq!(store.execute(&clear(Uuid::new_v4())).await.unwrap(), 0);
        assert_eq!(store.execute(&clear(owner)).await.unwrap(), 1);
        assert_eq!(store.row("walkers", walker).unwrap()["owner_id"], JsonValue::Null);
    }

    #[tokio::test]
    async fn test_select_by_parents_honors_window() {
        let mut store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let mut recent = entity_row(Uuid::new_v4(), owner);
        recent.insert("created_at".to_string(), json!(now.to_rfc3339()));
        let mut old = entity_row(Uuid::new_v4(), owner);
        old.insert(
            "created_at".to_string(),
            json!((now - chrono::Duration::days(30)).to_rfc3339()),
        );
        store.seed("dogs", recent.clone());
        store.seed("dogs", old);

        let rows = store
            .fetch(&Statement::SelectByParents {
                table: "dogs".to_string(),
                parent_column: "owner_id".to_string(),
                parent_ids: vec![owner],
                window: Some(TimeRange {
                    column: "created_at".to_string(),
                    start: now - chrono::Duration::days(1),
                    end: now + chrono::Duration::days(1),
                }),
            })
            .await
            .unwrap();
        assert_eq!(rows, vec![recent]);
    }

    #[tokio::test]
    async fn test_injected_failure_is_logged_and_surfaced() {
        let mut store = MemoryStore::new();
        store.fail_on_table("dogs");

        let err = store
            .execute(&Statement::DeleteByIds {
                table: "dogs".to_string(),
                ids: vec![Uuid::new_v4()],
            })
            .await
            .unwrap_err();
        assert_eq!(err, ModelError::Database("injected failure on 'dogs'".to_string()));
        assert_eq!(store.count("delete", "dogs"), 1);
    }
}
