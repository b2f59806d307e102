use elif_aggregate::{
    collection_from_rows, optional_from_rows, row_uuid, to_row, Entity, EntityDefinition, EntityId, EntityType,
    GraphConfig, GraphRepository, MemoryStore, ModelError, ModelResult, Related, RelatedMut, RelationshipDeclaration,
    RelationshipSchema, Row, SchemaBuilder, SchemaError, FieldShape,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Line {
    id: Option<Uuid>,
    sku: String,
    quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Shipment {
    id: Option<Uuid>,
    carrier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Label {
    id: Option<Uuid>,
    name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Order {
    id: Option<Uuid>,
    number: String,
    #[serde(default, skip_serializing)]
    shipment: Option<Shipment>,
    #[serde(default, skip_serializing)]
    lines: Vec<Line>,
    #[serde(default, skip_serializing)]
    labels: Vec<Label>,
}

macro_rules! leaf {
    ($ty:ident, $table:literal) => {
        impl Entity for $ty {
            fn entity_type(&self) -> &'static str {
                stringify!($ty)
            }

            fn id(&self) -> Option<EntityId> {
                self.id
            }

            fn set_id(&mut self, id: EntityId) {
                self.id = Some(id);
            }

            fn columns(&self) -> ModelResult<Row> {
                to_row(self)
            }

            fn relations(&self) -> Vec<(&'static str, Related<'_>)> {
                Vec::new()
            }

            fn relations_mut(&mut self) -> Vec<(&'static str, RelatedMut<'_>)> {
                Vec::new()
            }

            fn attach(&mut self, field: &str, _rows: Vec<Row>) -> ModelResult<()> {
                Err(ModelError::Schema(format!("no field {}", field)))
            }
        }

        impl EntityType for $ty {
            fn type_name() -> &'static str {
                stringify!($ty)
            }

            fn table_name() -> &'static str {
                $table
            }

            fn nested_fields() -> &'static [&'static str] {
                &[]
            }
        }
    };
}

leaf!(Line, "order_lines");
leaf!(Shipment, "shipments");
leaf!(Label, "labels");

impl Entity for Order {
    fn entity_type(&self) -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn columns(&self) -> ModelResult<Row> {
        to_row(self)
    }

    fn relations(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("shipment", Related::optional(self.shipment.as_ref())),
            ("lines", Related::collection(&self.lines)),
            ("labels", Related::collection(&self.labels)),
        ]
    }

    fn relations_mut(&mut self) -> Vec<(&'static str, RelatedMut<'_>)> {
        vec![
            ("shipment", RelatedMut::optional(self.shipment.as_mut())),
            ("lines", RelatedMut::collection(&mut self.lines)),
            ("labels", RelatedMut::collection(&mut self.labels)),
        ]
    }

    fn attach(&mut self, field: &str, rows: Vec<Row>) -> ModelResult<()> {
        match field {
            "shipment" => self.shipment = optional_from_rows(rows)?,
            "lines" => self.lines = collection_from_rows(rows)?,
            "labels" => self.labels = collection_from_rows(rows)?,
            other => return Err(ModelError::Schema(format!("no field {}", other))),
        }
        Ok(())
    }
}

impl EntityType for Order {
    fn type_name() -> &'static str {
        "Order"
    }

    fn table_name() -> &'static str {
        "orders"
    }

    fn nested_fields() -> &'static [&'static str] {
        &["shipment", "lines", "labels"]
    }
}

fn order_definition() -> EntityDefinition {
    EntityDefinition::of::<Order>()
        .declare(
            RelationshipDeclaration::owned("shipment", FieldShape::OptionalSingle, "Shipment")
                .foreign_key("order_id"),
        )
        .declare(RelationshipDeclaration::owned("lines", FieldShape::Collection, "Line").foreign_key("order_id"))
        .declare(
            RelationshipDeclaration::many_to_many("labels", "Label", "order_labels")
                .link_columns("order_id", "label_id"),
        )
}

fn schema() -> RelationshipSchema {
    SchemaBuilder::new()
        .entity(order_definition())
        .entity(EntityDefinition::of::<Line>())
        .entity(EntityDefinition::of::<Shipment>())
        .entity(EntityDefinition::of::<Label>())
        .build()
        .expect("order schema")
}

fn line(sku: &str, quantity: i64) -> Line {
    Line {
        id: None,
        sku: sku.to_string(),
        quantity,
    }
}

fn label(name: &str) -> Label {
    Label {
        id: Some(Uuid::new_v4()),
        name: name.to_string(),
    }
}

fn linked_labels(store: &MemoryStore, order: Uuid) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = store
        .rows("order_labels")
        .iter()
        .filter(|row| row_uuid(row, "order_id") == Some(order))
        .filter_map(|row| row_uuid(row, "label_id"))
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn order_graph_lifecycle() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let schema = schema();
    let repository = GraphRepository::new(&schema, GraphConfig::default()).unwrap();
    let mut store = MemoryStore::new();
    let (urgent, fragile, gift) = (label("urgent"), label("fragile"), label("gift"));
    for l in [&urgent, &fragile, &gift] {
        store.seed("labels", to_row(l).unwrap());
    }

    // create
    let order = Order {
        id: None,
        number: "A-100".to_string(),
        shipment: Some(Shipment {
            id: None,
            carrier: "post".to_string(),
        }),
        lines: vec![line("apple", 3), line("pear", 1), line("plum", 6)],
        labels: vec![urgent.clone(), fragile.clone()],
    };
    let created = repository.create(&mut store, order).await.unwrap();
    let order_id = created.id.unwrap();
    assert!(created.lines.iter().all(|l| l.id.is_some()));
    assert_eq!(store.rows("order_lines").len(), 3);
    assert_eq!(linked_labels(&store, order_id).len(), 2);

    // load
    let mut loaded = vec![Order {
        id: created.id,
        number: created.number.clone(),
        ..Default::default()
    }];
    repository.load_children(&mut store, &mut loaded, None).await.unwrap();
    repository.reload_links(&mut store, &mut loaded[0]).await.unwrap();
    let loaded = loaded.remove(0);
    assert_eq!(loaded.lines, created.lines);
    assert_eq!(loaded.shipment, created.shipment);
    assert_eq!(loaded.labels.len(), 2);

    // reconcile
    let mut edited = loaded.clone();
    let dropped = edited.lines.remove(0);
    edited.lines[0].quantity = 2;
    edited.lines.push(line("fig", 12));
    edited.labels = vec![fragile.clone(), gift.clone()];
    edited.shipment = None;

    let saved = repository.reconcile(&mut store, &loaded, edited).await.unwrap();

    assert!(!store.contains("order_lines", dropped.id.unwrap()));
    assert!(store.rows("shipments").is_empty());
    let pear = store.row("order_lines", saved.lines[0].id.unwrap()).unwrap();
    assert_eq!(pear["quantity"], 2);
    let fig = saved.lines[2].id.expect("fig identity");
    assert_eq!(row_uuid(store.row("order_lines", fig).unwrap(), "order_id"), Some(order_id));

    let mut expected = vec![fragile.id.unwrap(), gift.id.unwrap()];
    expected.sort();
    assert_eq!(linked_labels(&store, order_id), expected);
    assert_eq!(saved.labels, vec![fragile.clone(), gift.clone()]);

    // delete
    let summary = repository.delete_cascade(&mut store, &saved).await.unwrap();
    assert_eq!(summary.rows_deleted, 4);
    assert_eq!(summary.links_detached, 2);
    assert!(store.rows("orders").is_empty());
    assert!(store.rows("order_lines").is_empty());
    assert!(store.rows("order_labels").is_empty());
    assert_eq!(store.rows("labels").len(), 3);
}

#[test]
fn undeclared_nested_field_is_rejected() {
    let incomplete = EntityDefinition::of::<Order>().declare(
        RelationshipDeclaration::owned("lines", FieldShape::Collection, "Line").foreign_key("order_id"),
    );
    let result = SchemaBuilder::new()
        .entity(incomplete)
        .entity(EntityDefinition::of::<Line>())
        .build();

    assert!(matches!(result, Err(SchemaError::MissingDeclaration { .. })));
}

#[test]
fn owned_field_without_foreign_key_is_rejected() {
    let definition = EntityDefinition::of::<Order>()
        .declare(RelationshipDeclaration::owned("shipment", FieldShape::OptionalSingle, "Shipment"))
        .declare(RelationshipDeclaration::owned("lines", FieldShape::Collection, "Line").foreign_key("order_id"))
        .declare(RelationshipDeclaration::many_to_many("labels", "Label", "order_labels"));
    let result = SchemaBuilder::new()
        .entity(definition)
        .entity(EntityDefinition::of::<Line>())
        .entity(EntityDefinition::of::<Shipment>())
        .entity(EntityDefinition::of::<Label>())
        .build();

    assert!(matches!(result, Err(SchemaError::MissingForeignKey { .. })));
}
