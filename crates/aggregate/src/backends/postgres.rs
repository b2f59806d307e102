//! PostgreSQL Store
//!
//! Runs graph statements inside a transaction the caller opened with sqlx.
//! The store never commits or rolls back; dropping it hands the
//! transaction back untouched.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::Postgres;
use tracing::trace;

use crate::backends::core::{DatabaseValue, Statement, Store};
use crate::entity::Row;
use crate::error::{ModelError, OrmResult};

/// Store over a caller-owned PostgreSQL transaction
pub struct PostgresStore<'t, 'c> {
    tx: &'t mut sqlx::Transaction<'c, Postgres>,
}

impl<'t, 'c> PostgresStore<'t, 'c> {
    pub fn new(tx: &'t mut sqlx::Transaction<'c, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl<'t, 'c> Store for PostgresStore<'t, 'c> {
    async fn execute(&mut self, statement: &Statement) -> OrmResult<u64> {
        if statement.is_empty_batch() {
            return Ok(0);
        }
        let (sql, params) = statement.to_sql();
        trace!("{} on {}: {}", statement.kind(), statement.table(), sql);

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = bind_database_value(query, param);
        }

        let result = query
            .execute(&mut **self.tx)
            .await
            .map_err(|e| ModelError::Database(format!("Statement execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch(&mut self, statement: &Statement) -> OrmResult<Vec<Row>> {
        if statement.is_empty_batch() {
            return Ok(Vec::new());
        }
        let (sql, params) = statement.to_sql();
        trace!("{} on {}: {}", statement.kind(), statement.table(), sql);

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = bind_database_value(query, param);
        }

        let rows = query
            .fetch_all(&mut **self.tx)
            .await
            .map_err(|e| ModelError::Database(format!("Query fetch failed: {}", e)))?;

        rows.iter().map(pg_row_to_row).collect()
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

fn pg_row_to_row(row: &sqlx::postgres::PgRow) -> OrmResult<Row> {
    use sqlx::{Column, Row as _};

    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = postgres_value_to_database_value(row, index)?;
        map.insert(column.name().to_string(), value.to_json());
    }
    Ok(map)
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &sqlx::postgres::PgRow, index: usize) -> OrmResult<DatabaseValue> {
    use sqlx::{Column, Row as _, TypeInfo, ValueRef};

    let column = &row.columns()[index];
    let type_name = column.type_info().name();

    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let decode_err = |kind: &str, e: sqlx::Error| {
        ModelError::Serialization(format!("Failed to get {} value from '{}': {}", kind, column.name(), e))
    };

    match type_name {
        "BOOL" => row.try_get(index).map(DatabaseValue::Bool).map_err(|e| decode_err("bool", e)),
        "INT2" => row
            .try_get::<i16, _>(index)
            .map(|v| DatabaseValue::Int32(v as i32))
            .map_err(|e| decode_err("int16", e)),
        "INT4" => row.try_get(index).map(DatabaseValue::Int32).map_err(|e| decode_err("int32", e)),
        "INT8" => row.try_get(index).map(DatabaseValue::Int64).map_err(|e| decode_err("int64", e)),
        "FLOAT4" => row.try_get(index).map(DatabaseValue::Float32).map_err(|e| decode_err("float32", e)),
        "FLOAT8" => row.try_get(index).map(DatabaseValue::Float64).map_err(|e| decode_err("float64", e)),
        "BYTEA" => row.try_get(index).map(DatabaseValue::Bytes).map_err(|e| decode_err("bytes", e)),
        "UUID" => row.try_get(index).map(DatabaseValue::Uuid).map_err(|e| decode_err("UUID", e)),
        "TIMESTAMPTZ" => row
            .try_get(index)
            .map(DatabaseValue::DateTime)
            .map_err(|e| decode_err("datetime", e)),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| DatabaseValue::DateTime(v.and_utc()))
            .map_err(|e| decode_err("datetime", e)),
        "DATE" => row.try_get(index).map(DatabaseValue::Date).map_err(|e| decode_err("date", e)),
        "TIME" => row.try_get(index).map(DatabaseValue::Time).map_err(|e| decode_err("time", e)),
        "JSON" | "JSONB" => row
            .try_get::<JsonValue, _>(index)
            .map(DatabaseValue::Json)
            .map_err(|e| decode_err("JSON", e)),
        _ => row
            .try_get::<String, _>(index)
            .map(DatabaseValue::String)
            .map_err(|e| decode_err(type_name, e)),
    }
}
