//! Core Store Traits
//!
//! Every statement the graph engines issue is one of the [`Statement`]
//! variants below. A [`Store`] executes them against the caller's open
//! transaction; begin/commit/rollback stay with the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::entity::{EntityId, Row};
use crate::error::OrmResult;

/// Store collaborator bound to one caller-owned transaction
#[async_trait]
pub trait Store: Send {
    /// Execute a write statement and return the affected row count
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64>;

    /// Execute a query and return its rows
    async fn fetch(&mut self, statement: &Statement) -> OrmResult<Vec<Row>>;
}

/// Conflict handling for inserts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Let the store reject duplicates
    Fail,
    /// Overwrite every column of the row with the same id
    UpdateAll,
    /// Keep the existing row untouched
    Ignore,
}

/// Which link rows of an owner a link delete removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTargets {
    All,
    One(EntityId),
    Many(Vec<EntityId>),
}

/// Inclusive range filter on a timestamp column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub column: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parameterized DML issued by the graph engines
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Insert one row
    Insert {
        table: String,
        row: Row,
        on_conflict: OnConflict,
    },
    /// Point (or clear) a foreign key column of one row.
    /// With `expected`, only rows currently pointing there are touched.
    UpdateReference {
        table: String,
        column: String,
        value: Option<EntityId>,
        id: EntityId,
        expected: Option<EntityId>,
    },
    /// Batched delete by primary key
    DeleteByIds { table: String, ids: Vec<EntityId> },
    /// Delete link rows of one owner
    DeleteLinks {
        table: String,
        owner_column: String,
        owner_id: EntityId,
        target_column: String,
        targets: LinkTargets,
    },
    /// Fetch one row by primary key
    SelectById { table: String, id: EntityId },
    /// Fetch all rows whose parent foreign key is one of `parent_ids`
    SelectByParents {
        table: String,
        parent_column: String,
        parent_ids: Vec<EntityId>,
        window: Option<TimeRange>,
    },
    /// Fetch the targets linked to one owner through a link table
    SelectThroughLink {
        target_table: String,
        link_table: String,
        owner_column: String,
        target_column: String,
        owner_id: EntityId,
    },
}

impl Statement {
    /// Table the statement writes to or reads from
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::UpdateReference { table, .. }
            | Statement::DeleteByIds { table, .. }
            | Statement::DeleteLinks { table, .. }
            | Statement::SelectById { table, .. }
            | Statement::SelectByParents { table, .. } => table,
            Statement::SelectThroughLink { target_table, .. } => target_table,
        }
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Insert { .. } => "insert",
            Statement::UpdateReference { .. } => "update_reference",
            Statement::DeleteByIds { .. } => "delete",
            Statement::DeleteLinks { .. } => "delete_links",
            Statement::SelectById { .. } => "select_by_id",
            Statement::SelectByParents { .. } => "select_by_parents",
            Statement::SelectThroughLink { .. } => "select_through_link",
        }
    }

    /// True for writes
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::Insert { .. }
                | Statement::UpdateReference { .. }
                | Statement::DeleteByIds { .. }
                | Statement::DeleteLinks { .. }
        )
    }

    /// True when the statement cannot match anything (an empty `IN` list)
    pub fn is_empty_batch(&self) -> bool {
        match self {
            Statement::DeleteByIds { ids, .. } => ids.is_empty(),
            Statement::SelectByParents { parent_ids, .. } => parent_ids.is_empty(),
            Statement::DeleteLinks {
                targets: LinkTargets::Many(ids),
                ..
            } => ids.is_empty(),
            _ => false,
        }
    }

    /// Render as PostgreSQL with `$n` placeholders
    pub fn to_sql(&self) -> (String, Vec<DatabaseValue>) {
        let mut params = Vec::new();
        let sql = match self {
            Statement::Insert {
                table,
                row,
                on_conflict,
            } => {
                let columns: Vec<&String> = row.keys().collect();
                let placeholders: Vec<String> = row
                    .values()
                    .map(|value| push_param(&mut params, DatabaseValue::from_json(value.clone())))
                    .collect();
                let mut sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(table),
                    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
                    placeholders.join(", ")
                );
                match on_conflict {
                    OnConflict::Fail => {}
                    OnConflict::Ignore => sql.push_str(" ON CONFLICT DO NOTHING"),
                    OnConflict::UpdateAll => {
                        let updates: Vec<String> = columns
                            .iter()
                            .filter(|c| c.as_str() != "id")
                            .map(|c| format!("{} = EXCLUDED.{}", quote(c), quote(c)))
                            .collect();
                        if updates.is_empty() {
                            sql.push_str(" ON CONFLICT (\"id\") DO NOTHING");
                        } else {
                            sql.push_str(&format!(" ON CONFLICT (\"id\") DO UPDATE SET {}", updates.join(", ")));
                        }
                    }
                }
                sql
            }
            Statement::UpdateReference {
                table,
                column,
                value,
                id,
                expected,
            } => {
                let value = push_param(&mut params, DatabaseValue::from(*value));
                let id = push_param(&mut params, DatabaseValue::Uuid(*id));
                let mut sql = format!(
                    "UPDATE {} SET {} = {} WHERE \"id\" = {}",
                    quote(table),
                    quote(column),
                    value,
                    id
                );
                if let Some(expected) = expected {
                    let expected = push_param(&mut params, DatabaseValue::Uuid(*expected));
                    sql.push_str(&format!(" AND {} = {}", quote(column), expected));
                }
                sql
            }
            Statement::DeleteByIds { table, ids } => {
                let list = push_id_list(&mut params, ids);
                format!(
                    "DELETE FROM {} WHERE {}.\"id\" IN ({})",
                    quote(table),
                    quote(table),
                    list
                )
            }
            Statement::DeleteLinks {
                table,
                owner_column,
                owner_id,
                target_column,
                targets,
            } => {
                let owner = push_param(&mut params, DatabaseValue::Uuid(*owner_id));
                let mut sql = format!(
                    "DELETE FROM {} WHERE {} = {}",
                    quote(table),
                    quote(owner_column),
                    owner
                );
                match targets {
                    LinkTargets::All => {}
                    LinkTargets::One(target) => {
                        let target = push_param(&mut params, DatabaseValue::Uuid(*target));
                        sql.push_str(&format!(" AND {} = {}", quote(target_column), target));
                    }
                    LinkTargets::Many(target_ids) => {
                        let list = push_id_list(&mut params, target_ids);
                        sql.push_str(&format!(" AND {} IN ({})", quote(target_column), list));
                    }
                }
                sql
            }
            Statement::SelectById { table, id } => {
                let id = push_param(&mut params, DatabaseValue::Uuid(*id));
                format!("SELECT * FROM {} WHERE \"id\" = {}", quote(table), id)
            }
            Statement::SelectByParents {
                table,
                parent_column,
                parent_ids,
                window,
            } => {
                let list = push_id_list(&mut params, parent_ids);
                let mut sql = format!(
                    "SELECT * FROM {} WHERE {} IN ({})",
                    quote(table),
                    quote(parent_column),
                    list
                );
                if let Some(range) = window {
                    let start = push_param(&mut params, DatabaseValue::DateTime(range.start));
                    let end = push_param(&mut params, DatabaseValue::DateTime(range.end));
                    sql.push_str(&format!(
                        " AND {} BETWEEN {} AND {}",
                        quote(&range.column),
                        start,
                        end
                    ));
                }
                sql
            }
            Statement::SelectThroughLink {
                target_table,
                link_table,
                owner_column,
                target_column,
                owner_id,
            } => {
                let owner = push_param(&mut params, DatabaseValue::Uuid(*owner_id));
                format!(
                    "SELECT {target}.* FROM {target} JOIN {link} ON {link}.{target_col} = {target}.\"id\" WHERE {link}.{owner_col} = {owner}",
                    target = quote(target_table),
                    link = quote(link_table),
                    target_col = quote(target_column),
                    owner_col = quote(owner_column),
                    owner = owner
                )
            }
        };
        (sql, params)
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn push_param(params: &mut Vec<DatabaseValue>, value: DatabaseValue) -> String {
    // Untyped NULL literal; a bound text NULL would not coerce to uuid columns
    if value.is_null() {
        return "NULL".to_string();
    }
    params.push(value);
    format!("${}", params.len())
}

fn push_id_list(params: &mut Vec<DatabaseValue>, ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| push_param(params, DatabaseValue::Uuid(*id)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float32(f) => serde_json::Number::from_f64(*f as f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter().map(|&x| JsonValue::Number(serde_json::Number::from(x))).collect(),
            ),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Time(t) => JsonValue::String(t.to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Create DatabaseValue from JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        DatabaseValue::Int32(i as i32)
                    } else {
                        DatabaseValue::Int64(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => {
                if let Ok(uuid) = uuid::Uuid::parse_str(&s) {
                    DatabaseValue::Uuid(uuid)
                } else if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&s) {
                    DatabaseValue::DateTime(dt.with_timezone(&chrono::Utc))
                } else {
                    DatabaseValue::String(s)
                }
            }
            other => DatabaseValue::Json(other),
        }
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}
