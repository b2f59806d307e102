use uuid::Uuid;

use super::fixtures::*;
use crate::backends::{LinkTargets, MemoryStore, Statement};
use crate::config::GraphConfig;
use crate::entity::{row_uuid, to_row};
use crate::error::ModelError;
use crate::reconcile::UpdateReconciler;
use crate::repository::GraphRepository;

/// Owner with three plain dogs and three clubs, stored
async fn stored_owner_with_three(store: &mut MemoryStore, schema: &crate::schema::RelationshipSchema) -> Owner {
    let owner = Owner {
        id: Some(Uuid::new_v4()),
        name: "bob".to_string(),
        dogs: vec![Dog::stored("a"), Dog::stored("b"), Dog::stored("c")],
        clubs: vec![Club::named("a"), Club::named("b"), Club::named("c")],
        ..Default::default()
    };
    seed_targets(store, &owner);
    let repository = GraphRepository::new(schema, GraphConfig::default()).unwrap();
    let owner = repository.create(store, owner).await.unwrap();
    store.clear_log();
    owner
}

#[tokio::test]
async fn test_owned_collection_diff_issues_one_delete_for_removed() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner_with_three(&mut store, &schema).await;
    let (a, b, c) = (old.dogs[0].id.unwrap(), old.dogs[1].id.unwrap(), old.dogs[2].id.unwrap());

    let mut new = old.clone();
    let d = Dog::stored("d");
    new.dogs = vec![old.dogs[1].clone(), old.dogs[2].clone(), d.clone()];

    let summary = UpdateReconciler::new(&schema)
        .reconcile(&mut store, &old, &new)
        .await
        .unwrap();
    assert_eq!((summary.removed, summary.added, summary.kept), (1, 1, 5));

    let deletes: Vec<&Statement> = store.statements().iter().filter(|s| s.kind() == "delete").collect();
    assert_eq!(
        deletes,
        vec![&Statement::DeleteByIds {
            table: "dogs".to_string(),
            ids: vec![a],
        }]
    );
    assert!(!store.contains("dogs", a));
    assert!(store.contains("dogs", b));
    assert!(store.contains("dogs", c));

    // added owned rows are left to the save
    assert!(!store.contains("dogs", d.id.unwrap()));
    assert_eq!(store.count("insert", "dogs"), 0);
}

#[tokio::test]
async fn test_many_to_many_diff_detaches_only_removed_pair() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner_with_three(&mut store, &schema).await;
    let (a, b, c) = (old.clubs[0].id.unwrap(), old.clubs[1].id.unwrap(), old.clubs[2].id.unwrap());

    let d = Club::named("d");
    store.seed("clubs", to_row(&d).unwrap());
    let mut new = old.clone();
    new.clubs = vec![old.clubs[1].clone(), old.clubs[2].clone(), d.clone()];

    UpdateReconciler::new(&schema)
        .reconcile(&mut store, &old, &new)
        .await
        .unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    match writes[0] {
        Statement::DeleteLinks { table, targets, .. } => {
            assert_eq!(table, "owner_clubs");
            assert_eq!(targets, &LinkTargets::One(a));
        }
        other => panic!("unexpected statement {:?}", other),
    }

    let linked: Vec<Uuid> = store
        .rows("owner_clubs")
        .iter()
        .filter_map(|row| row_uuid(row, "club_id"))
        .collect();
    assert_eq!(linked, vec![b, c]);
}

#[tokio::test]
async fn test_reconciling_a_graph_with_itself_issues_no_statements() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let owner = stored_owner(&mut store, &schema).await;

    let summary = UpdateReconciler::new(&schema)
        .reconcile(&mut store, &owner, &owner.clone())
        .await
        .unwrap();

    assert!(store.statements().is_empty());
    assert_eq!(summary.removed, 0);
    assert_eq!(summary.added, 0);
    assert!(summary.kept > 0);
}

#[tokio::test]
async fn test_kept_owned_children_are_reconciled_recursively() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;
    let ball = old.dogs[0].toys[0].id.unwrap();
    let rope = old.dogs[0].toys[1].id.unwrap();

    let mut new = old.clone();
    new.dogs[0].toys.remove(0);

    UpdateReconciler::new(&schema)
        .reconcile(&mut store, &old, &new)
        .await
        .unwrap();

    assert_eq!(
        store.writes(),
        vec![&Statement::DeleteByIds {
            table: "toys".to_string(),
            ids: vec![ball],
        }]
    );
    assert!(store.contains("toys", rope));
}

#[tokio::test]
async fn test_associated_changes_only_move_references() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;
    let owner_id = old.id.unwrap();
    let sam = old.walkers[0].id.unwrap();

    let kim = Walker::named("kim");
    store.seed("walkers", to_row(&kim).unwrap());
    let mut new = old.clone();
    new.walkers = vec![kim.clone()];

    UpdateReconciler::new(&schema)
        .reconcile(&mut store, &old, &new)
        .await
        .unwrap();

    let sam_row = store.row("walkers", sam).unwrap();
    assert_eq!(row_uuid(sam_row, "owner_id"), None);
    assert_eq!(sam_row["name"], "sam");

    let kim_row = store.row("walkers", kim.id.unwrap()).unwrap();
    assert_eq!(row_uuid(kim_row, "owner_id"), Some(owner_id));

    assert_eq!(store.count("select_by_id", "walkers"), 1);
    assert_eq!(store.count("update_reference", "walkers"), 2);
    assert_eq!(store.count("delete", "walkers"), 0);
}

#[tokio::test]
async fn test_missing_associated_target_is_not_found() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;

    let mut new = old.clone();
    new.walkers.push(Walker::named("ghost"));

    let result = UpdateReconciler::new(&schema).reconcile(&mut store, &old, &new).await;
    assert!(matches!(result, Err(ModelError::NotFound(_))));
    assert_eq!(store.count("update_reference", "walkers"), 0);
}

#[tokio::test]
async fn test_emptied_many_to_many_field_detaches_all_at_once() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner_with_three(&mut store, &schema).await;

    let mut new = old.clone();
    new.clubs.clear();

    UpdateReconciler::new(&schema)
        .reconcile(&mut store, &old, &new)
        .await
        .unwrap();

    assert_eq!(store.count("delete_links", "owner_clubs"), 1);
    assert!(store.rows("owner_clubs").is_empty());
}

#[tokio::test]
async fn test_replaced_or_removed_owned_single_is_cascaded() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;
    let old_address = old.address.id.unwrap();
    let bolt = old.favorite_dog.as_ref().unwrap();
    let frisbee = bolt.toys[0].id.unwrap();

    let mut new = old.clone();
    new.address = Address::at("2 Side St");
    new.favorite_dog = None;

    UpdateReconciler::new(&schema)
        .reconcile(&mut store, &old, &new)
        .await
        .unwrap();

    assert!(!store.contains("addresses", old_address));
    assert!(!store.contains("dogs", bolt.id.unwrap()));
    assert!(!store.contains("toys", frisbee));
    assert_eq!(store.count("delete", "dogs"), 1);
}

#[tokio::test]
async fn test_new_elements_without_identity_are_not_diffed() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;

    let mut new = old.clone();
    new.dogs.push(Dog::named("puppy"));

    let summary = UpdateReconciler::new(&schema)
        .reconcile(&mut store, &old, &new)
        .await
        .unwrap();
    assert_eq!(summary.added, 0);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_stored_element_without_identity_is_an_error() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;

    let mut corrupted = old.clone();
    corrupted.dogs.push(Dog::named("no id"));

    let result = UpdateReconciler::new(&schema)
        .reconcile(&mut store, &corrupted, &old)
        .await;
    assert!(matches!(result, Err(ModelError::Identity(_))));
}

#[tokio::test]
async fn test_roots_must_share_identity() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = sample_owner();
    let new = sample_owner();

    let result = UpdateReconciler::new(&schema).reconcile(&mut store, &old, &new).await;
    assert!(matches!(result, Err(ModelError::Identity(_))));
}

#[tokio::test]
async fn test_repository_reconcile_saves_and_restores_links() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;
    let repository = GraphRepository::new(&schema, GraphConfig::default()).unwrap();

    let chess = Club::named("chess");
    store.seed("clubs", to_row(&chess).unwrap());
    let mut new = old.clone();
    new.name = "alice cooper".to_string();
    new.dogs.push(Dog::named("puppy"));
    new.clubs.push(chess.clone());

    let saved = repository.reconcile(&mut store, &old, new.clone()).await.unwrap();

    let puppy = saved.dogs.last().unwrap();
    let puppy_id = puppy.id.expect("identity assigned on save");
    let puppy_row = store.row("dogs", puppy_id).unwrap();
    assert_eq!(row_uuid(puppy_row, "owner_id"), old.id);

    assert_eq!(store.row("owners", old.id.unwrap()).unwrap()["name"], "alice cooper");
    assert_eq!(store.rows("owner_clubs").len(), 2);
    assert_eq!(saved.clubs, new.clubs);
    assert_eq!(store.count("select_through_link", "clubs"), 2);
}

#[tokio::test]
async fn test_repository_reconcile_without_link_reload() {
    let schema = schema();
    let mut store = MemoryStore::new();
    let old = stored_owner(&mut store, &schema).await;
    let config = GraphConfig::default().with_reload_links_after_save(false);
    let repository = GraphRepository::new(&schema, config).unwrap();

    let saved = repository.reconcile(&mut store, &old, old.clone()).await.unwrap();

    assert_eq!(saved, old);
    assert_eq!(store.count("select_through_link", "clubs"), 0);
    // re-saving an unchanged graph never duplicates link rows
    assert_eq!(store.rows("owner_clubs").len(), 1);
    assert_eq!(store.rows("dog_tags").len(), 1);
}
