//! Entity contract - what the graph engines need to know about a record
//!
//! Entities expose their plain columns as a [`Row`] and their nested entity
//! fields through [`Related`] / [`RelatedMut`] views. Which fields are nested
//! and how they relate to the parent is declared once in the relationship
//! schema, never inferred from the values.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};

/// Opaque, comparable entity identity
pub type EntityId = Uuid;

/// A stored row keyed by column name
pub type Row = serde_json::Map<String, JsonValue>;

/// Read-only view of one nested field
pub enum Related<'a> {
    /// Embedded entity that is always present in memory
    Single(&'a dyn Entity),
    /// Entity that may be absent
    Optional(Option<&'a dyn Entity>),
    /// Homogeneous collection, in its original order
    Collection(Vec<&'a dyn Entity>),
}

impl<'a> Related<'a> {
    pub fn optional<T: Entity>(value: Option<&'a T>) -> Self {
        Related::Optional(value.map(|v| v as &dyn Entity))
    }

    pub fn collection<T: Entity>(values: &'a [T]) -> Self {
        Related::Collection(values.iter().map(|v| v as &dyn Entity).collect())
    }
}

/// Mutable view of one nested field
pub enum RelatedMut<'a> {
    Single(&'a mut dyn Entity),
    Optional(Option<&'a mut dyn Entity>),
    Collection(Vec<&'a mut dyn Entity>),
}

impl<'a> RelatedMut<'a> {
    pub fn optional<T: Entity>(value: Option<&'a mut T>) -> Self {
        RelatedMut::Optional(value.map(|v| v as &mut dyn Entity))
    }

    pub fn collection<T: Entity>(values: &'a mut [T]) -> Self {
        RelatedMut::Collection(values.iter_mut().map(|v| v as &mut dyn Entity).collect())
    }
}

/// Object-safe contract implemented by every persisted record type
pub trait Entity: Send + Sync + Debug {
    /// Registered entity type name, used for schema lookups
    fn entity_type(&self) -> &'static str;

    /// Identity of this record, `None` while unset
    fn id(&self) -> Option<EntityId>;

    /// Assign the identity of this record
    fn set_id(&mut self, id: EntityId);

    /// Plain column values, without any nested entity fields
    fn columns(&self) -> ModelResult<Row>;

    /// All nested entity fields, by field name
    fn relations(&self) -> Vec<(&'static str, Related<'_>)>;

    /// All nested entity fields, mutably and at once
    fn relations_mut(&mut self) -> Vec<(&'static str, RelatedMut<'_>)>;

    /// Replace the value of a nested field with freshly fetched rows
    fn attach(&mut self, field: &str, rows: Vec<Row>) -> ModelResult<()>;

    /// Look up a single nested field
    fn relation(&self, field: &str) -> Option<Related<'_>> {
        self.relations()
            .into_iter()
            .find(|(name, _)| *name == field)
            .map(|(_, related)| related)
    }

    /// Overwrite nested `field` with its value in `source`, the same entity as
    /// the caller submitted it.
    ///
    /// The default copies the source's children as rows through
    /// [`columns`](Entity::columns) and [`attach`](Entity::attach), so fields
    /// nested below those children are lost. Types whose many-to-many targets
    /// carry nested fields of their own override this with a typed clone.
    fn restore_field(&mut self, field: &str, source: &Self) -> ModelResult<()>
    where
        Self: Sized,
    {
        restore_from_rows(self, field, source)
    }

    /// Identity, or an identity error naming what needed it
    fn require_id(&self, purpose: &str) -> ModelResult<EntityId> {
        self.id().ok_or_else(|| {
            ModelError::Identity(format!(
                "{} has no identity but one is required to {}",
                self.entity_type(),
                purpose
            ))
        })
    }
}

/// Static metadata about an entity type, used at schema registration
pub trait EntityType: Entity + Sized {
    /// Entity type name; must match [`Entity::entity_type`]
    fn type_name() -> &'static str;

    /// Storage table this type maps to
    fn table_name() -> &'static str;

    /// Names of every field whose value is an entity, optional entity or
    /// collection of entities. Must list every name [`Entity::relations`]
    /// returns; leaf types return `&[]`.
    fn nested_fields() -> &'static [&'static str];
}

/// Columns of a nested child with its identity always present
pub fn child_row(child: &dyn Entity) -> ModelResult<Row> {
    let mut row = child.columns()?;
    if let Some(id) = child.id() {
        row.insert("id".to_string(), JsonValue::String(id.to_string()));
    }
    Ok(row)
}

/// Copy nested `field` from `source` into `target` as rows
pub fn restore_from_rows(target: &mut dyn Entity, field: &str, source: &dyn Entity) -> ModelResult<()> {
    let children = match source.relation(field) {
        Some(Related::Single(child)) => vec![child],
        Some(Related::Optional(child)) => child.into_iter().collect(),
        Some(Related::Collection(children)) => children,
        None => {
            return Err(ModelError::Schema(format!(
                "{} has no nested field '{}'",
                source.entity_type(),
                field
            )))
        }
    };
    let rows = children.into_iter().map(child_row).collect::<ModelResult<Vec<Row>>>()?;
    target.attach(field, rows)
}

/// Treat the nil UUID as an unset identity
pub fn identity(id: Uuid) -> Option<EntityId> {
    if id.is_nil() {
        None
    } else {
        Some(id)
    }
}

/// Serialize a value into a row; the value must serialize to a JSON object
pub fn to_row<T: Serialize>(value: &T) -> ModelResult<Row> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(ModelError::Serialization(format!(
            "Expected an object when building a row, got {}",
            other
        ))),
    }
}

/// Deserialize one row into an entity value
pub fn from_row<T: DeserializeOwned>(row: Row) -> ModelResult<T> {
    serde_json::from_value(JsonValue::Object(row)).map_err(|e| {
        ModelError::Serialization(format!("Failed to convert row: {}", e))
    })
}

/// Deserialize rows for a collection-shaped field
pub fn collection_from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> ModelResult<Vec<T>> {
    rows.into_iter().map(from_row).collect()
}

/// Deserialize rows for an optional field; more than one row is an error
pub fn optional_from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> ModelResult<Option<T>> {
    let mut rows = rows.into_iter();
    let first = rows.next();
    if rows.next().is_some() {
        return Err(ModelError::Serialization(
            "Expected at most one row for a single-valued relationship".to_string(),
        ));
    }
    first.map(from_row).transpose()
}

/// Read a UUID stored in a row column
pub fn row_uuid(row: &Row, column: &str) -> Option<EntityId> {
    match row.get(column)? {
        JsonValue::String(s) => Uuid::parse_str(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Leaf {
        id: Uuid,
        name: String,
    }

    #[test]
    fn test_identity_treats_nil_as_unset() {
        assert_eq!(identity(Uuid::nil()), None);
        let id = Uuid::new_v4();
        assert_eq!(identity(id), Some(id));
    }

    #[test]
    fn test_row_round_trip_ignores_extra_columns() {
        let id = Uuid::new_v4();
        let mut row = to_row(&Leaf { id, name: "rex".to_string() }).unwrap();
        row.insert("owner_id".to_string(), json!(Uuid::new_v4().to_string()));

        let leaf: Leaf = from_row(row).unwrap();
        assert_eq!(leaf.name, "rex");
        assert_eq!(leaf.id, id);
    }

    #[test]
    fn test_optional_from_rows_rejects_many() {
        let row = to_row(&Leaf { id: Uuid::new_v4(), name: "a".to_string() }).unwrap();
        let none: Option<Leaf> = optional_from_rows(Vec::new()).unwrap();
        assert!(none.is_none());

        let err = optional_from_rows::<Leaf>(vec![row.clone(), row]).unwrap_err();
        assert!(matches!(err, ModelError::Serialization(_)));
    }

    #[test]
    fn test_row_uuid() {
        let id = Uuid::new_v4();
        let mut row = Row::new();
        row.insert("owner_id".to_string(), json!(id.to_string()));
        row.insert("name".to_string(), json!(3));

        assert_eq!(row_uuid(&row, "owner_id"), Some(id));
        assert_eq!(row_uuid(&row, "name"), None);
        assert_eq!(row_uuid(&row, "missing"), None);
    }
}
