use lorebook_storage::QueryStore;
use lorebook_sync::{
    EntityAction, FileTreeStore, LocalStore, MemoryFileBackend, StoreReader, StoreWriter,
    SyncError, SyncProgress, diff_states, extract_actions, perform_actions, reconcile,
};
use lorebook_types::{
    EntityId, EntityIndex, EntityLink, EntityLinkPair, EntityLinkReference, FileIndex, ItemStatus,
    StoreIndex, StoreState,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn item(id: &str) -> EntityId {
    EntityId::new("item", id)
}

fn entities(list: Vec<EntityIndex>) -> StoreState {
    StoreState {
        entities: list,
        ..Default::default()
    }
}

fn local() -> LocalStore {
    LocalStore::new(QueryStore::open_in_memory().unwrap())
}

fn no_progress() -> impl FnMut(SyncProgress) + Send {
    |_| {}
}

// ── Diff table ──────────────────────────────────────────────────

#[test]
fn source_only_keys_follow_source_status() {
    let source = entities(vec![
        EntityIndex::active(item("a"), 1),
        EntityIndex::deleted(item("b"), 2),
    ]);
    let actions = diff_states(&source, &StoreState::default());

    assert_eq!(actions.put_entities, vec![EntityAction { id: item("a"), version: 1 }]);
    assert_eq!(actions.delete_entities, vec![EntityAction { id: item("b"), version: 2 }]);
}

#[test]
fn newer_source_version_wins() {
    let source = entities(vec![EntityIndex::active(item("e"), 5)]);

    let older = entities(vec![EntityIndex::active(item("e"), 3)]);
    let actions = diff_states(&source, &older);
    assert_eq!(actions.put_entities, vec![EntityAction { id: item("e"), version: 5 }]);

    let newer = entities(vec![EntityIndex::active(item("e"), 6)]);
    assert!(diff_states(&source, &newer).is_empty());
}

#[test]
fn equal_versions_are_noop() {
    let source = entities(vec![EntityIndex::active(item("e"), 4)]);
    let dest = entities(vec![EntityIndex::deleted(item("e"), 4)]);
    assert!(diff_states(&source, &dest).is_empty());
}

#[test]
fn newer_source_tombstone_deletes() {
    let source = entities(vec![EntityIndex::deleted(item("e"), 7)]);
    let dest = entities(vec![EntityIndex::active(item("e"), 2)]);
    let actions = diff_states(&source, &dest);
    assert_eq!(actions.delete_entities, vec![EntityAction { id: item("e"), version: 7 }]);
    assert!(actions.put_entities.is_empty());
}

#[test]
fn destination_only_keys() {
    let dest = entities(vec![
        EntityIndex::active(item("live"), 3),
        EntityIndex::deleted(item("dead"), 4),
    ]);
    let actions = diff_states(&StoreState::default(), &dest);
    assert_eq!(actions.delete_entities, vec![EntityAction { id: item("live"), version: 3 }]);
    assert_eq!(actions.len(), 1);
}

#[test]
fn files_and_links_diff_independently() {
    let pair = EntityLinkPair::new(
        EntityLinkReference::new("character", "c1", "appearsIn"),
        EntityLinkReference::new("artwork", "a1", "features"),
    );
    let source = StoreState {
        entities: vec![],
        files: vec![FileIndex::active("cover.png", 2)],
        links: vec![EntityLink::active(pair.clone(), 9)],
    };
    let dest = StoreState {
        entities: vec![EntityIndex::active(item("x"), 1)],
        files: vec![FileIndex::active("old.png", 1)],
        links: vec![],
    };
    let actions = diff_states(&source, &dest);

    assert_eq!(actions.put_files.len(), 1);
    assert_eq!(actions.put_files[0].name, "cover.png");
    assert_eq!(actions.delete_files[0].name, "old.png");
    assert_eq!(actions.put_links[0].pair, pair);
    assert_eq!(actions.put_links[0].version, 9);
    assert_eq!(actions.delete_entities[0].id, item("x"));
    assert_eq!(actions.len(), 4);
}

#[test]
fn actions_are_sorted_by_key() {
    let source = entities(vec![
        EntityIndex::active(item("c"), 1),
        EntityIndex::active(item("a"), 1),
        EntityIndex::active(item("b"), 1),
    ]);
    let ids: Vec<_> = diff_states(&source, &StoreState::default())
        .put_entities
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec![item("a"), item("b"), item("c")]);
}

// ── Idempotence ─────────────────────────────────────────────────

fn apply_to_state(actions: &lorebook_sync::SyncActions, state: &StoreState) -> StoreState {
    let mut index = StoreIndex::from(state.clone());
    for a in &actions.put_entities {
        index.upsert_entity(EntityIndex::active(a.id.clone(), a.version));
    }
    for a in &actions.delete_entities {
        index.upsert_entity(EntityIndex::deleted(a.id.clone(), a.version));
    }
    for a in &actions.put_files {
        index.upsert_file(FileIndex::active(a.name.clone(), a.version));
    }
    for a in &actions.delete_files {
        index.upsert_file(FileIndex::deleted(a.name.clone(), a.version));
    }
    index.to_state()
}

fn arb_state() -> impl Strategy<Value = StoreState> {
    (
        prop::collection::btree_map(0u8..8, (any::<bool>(), 0i64..10), 0..8),
        prop::collection::btree_map(0u8..8, (any::<bool>(), 0i64..10), 0..8),
    )
        .prop_map(|(entity_map, file_map)| StoreState {
            entities: entity_map
                .into_iter()
                .map(|(k, (active, v))| {
                    let id = item(&format!("e{k}"));
                    if active {
                        EntityIndex::active(id, v)
                    } else {
                        EntityIndex::deleted(id, v)
                    }
                })
                .collect(),
            files: file_map
                .into_iter()
                .map(|(k, (active, v))| {
                    let name = format!("f{k}.bin");
                    if active {
                        FileIndex::active(name, v)
                    } else {
                        FileIndex::deleted(name, v)
                    }
                })
                .collect(),
            links: vec![],
        })
}

proptest! {
    #[test]
    fn rediff_after_apply_is_empty(source in arb_state(), dest in arb_state()) {
        let actions = diff_states(&source, &dest);
        let applied = apply_to_state(&actions, &dest);
        prop_assert!(diff_states(&source, &applied).is_empty());
        prop_assert_eq!(apply_to_state(&actions, &applied), applied);
    }
}

// ── Apply ───────────────────────────────────────────────────────

#[tokio::test]
async fn push_local_into_file_tree_and_back() {
    let source = local();
    let pair = EntityLinkPair::new(
        EntityLinkReference::new("item", "item1", "related"),
        EntityLinkReference::new("item", "item3", "related"),
    );
    source.put_entity(&item("item1"), 1, json!({"tags": ["a"]})).await.unwrap();
    source.put_entity(&item("item3"), 2, json!({"name": "three"})).await.unwrap();
    source.put_file("map.png", 3, vec![1, 2, 3]).await.unwrap();
    source.put_link(&pair, 4, json!({})).await.unwrap();

    let backend = MemoryFileBackend::new();
    let remote = FileTreeStore::new(&backend);
    let applied = reconcile(&source, &remote, &mut no_progress()).await.unwrap();
    assert_eq!(applied.len(), 4);
    assert_eq!(backend.commit_count(), 1);
    assert!(extract_actions(&source, &remote).await.unwrap().is_empty());

    let fresh = local();
    reconcile(&FileTreeStore::new(&backend), &fresh, &mut no_progress())
        .await
        .unwrap();
    assert_eq!(
        fresh.entity_content(&item("item1")).await.unwrap(),
        Some(json!({"tags": ["a"]}))
    );
    assert_eq!(fresh.read_file("map.png").await.unwrap(), Some(vec![1, 2, 3]));
    assert_eq!(fresh.links_of(&item("item3")).await.unwrap().len(), 1);
    assert_eq!(
        fresh.query_store().query_by_tag("tags", "a").unwrap(),
        vec![item("item1")]
    );
}

#[tokio::test]
async fn deletes_propagate_as_tombstones() {
    let source = local();
    let dest = local();
    dest.put_entity(&item("item2"), 1, json!({})).await.unwrap();
    source.put_entity(&item("item2"), 1, json!({})).await.unwrap();
    source.delete_entity(&item("item2"), 2).await.unwrap();

    let actions = reconcile(&source, &dest, &mut no_progress()).await.unwrap();
    assert_eq!(actions.delete_entities.len(), 1);

    let index = dest.entity_index(&item("item2")).await.unwrap().unwrap();
    assert_eq!(index.status, ItemStatus::Deleted);
    assert_eq!(index.version, 2);
}

#[tokio::test]
async fn applying_twice_is_safe() {
    let source = local();
    let dest = local();
    source.put_entity(&item("a"), 1, json!({"n": 1})).await.unwrap();
    dest.put_entity(&item("b"), 1, json!({})).await.unwrap();

    let actions = extract_actions(&source, &dest).await.unwrap();
    perform_actions(&source, &dest, &actions, &mut no_progress()).await.unwrap();
    perform_actions(&source, &dest, &actions, &mut no_progress()).await.unwrap();

    assert!(extract_actions(&source, &dest).await.unwrap().is_empty());
    assert_eq!(
        dest.read_store_state().await.unwrap(),
        StoreState {
            entities: vec![
                EntityIndex::active(item("a"), 1),
                EntityIndex::deleted(item("b"), 1),
            ],
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn progress_reports_every_step() {
    let source = local();
    source.put_entity(&item("a"), 1, json!({})).await.unwrap();
    source.put_entity(&item("b"), 1, json!({})).await.unwrap();
    source.put_file("f", 1, vec![0]).await.unwrap();

    let mut seen = Vec::new();
    let mut record = |p: SyncProgress| seen.push(p);
    reconcile(&source, &local(), &mut record).await.unwrap();

    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].message, "put file f");
    assert_eq!(seen[2].completed, 3);
    assert!(seen.iter().all(|p| p.total == 3));
}

#[tokio::test]
async fn missing_source_content_aborts_the_batch() {
    let source = local();
    let dest = local();
    let mut actions = lorebook_sync::SyncActions::default();
    actions.put_entities.push(EntityAction { id: item("ghost"), version: 1 });
    actions.delete_entities.push(EntityAction { id: item("other"), version: 1 });

    let err = perform_actions(&source, &dest, &actions, &mut no_progress())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
    assert!(dest.entity_index(&item("other")).await.unwrap().is_none());
}
