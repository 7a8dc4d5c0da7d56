use lorebook_sync::store::{INDEX_FILE, entity_path, file_path, link_path};
use lorebook_sync::{FileTreeStore, MemoryFileBackend, StoreReader, StoreWriter, SyncError};
use lorebook_types::{
    EntityId, EntityIndex, EntityLinkPair, EntityLinkReference, ItemStatus, StoreState,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn pair() -> EntityLinkPair {
    EntityLinkPair::new(
        EntityLinkReference::new("character", "c1", "appearsIn"),
        EntityLinkReference::new("artwork", "a1", "features"),
    )
}

// ── Layout ──────────────────────────────────────────────────────

#[test]
fn paths_are_percent_encoded() {
    assert_eq!(
        entity_path(&EntityId::new("item", "item1")),
        "entities/item/item1.json"
    );
    assert_eq!(
        entity_path(&EntityId::new("item", "a/b c")),
        "entities/item/a%2Fb%20c.json"
    );
    assert_eq!(file_path("cover art.png"), "files/cover%20art.png");
    assert!(link_path(&pair()).starts_with("links/"));
    assert!(!link_path(&pair())["links/".len()..].contains('/'));
}

// ── Reads ───────────────────────────────────────────────────────

#[tokio::test]
async fn empty_remote_has_empty_state() {
    let store = FileTreeStore::new(&MemoryFileBackend::new());
    assert!(store.read_store_state().await.unwrap().is_empty());
}

#[tokio::test]
async fn reads_index_and_content() {
    let backend = MemoryFileBackend::new();
    let id = EntityId::new("item", "item1");
    let state = StoreState {
        entities: vec![EntityIndex::active(id.clone(), 1)],
        ..Default::default()
    };
    backend
        .insert(INDEX_FILE, serde_json::to_vec(&state).unwrap())
        .await;
    backend
        .insert(&entity_path(&id), br#"{"tags":["a"]}"#.to_vec())
        .await;

    let store = FileTreeStore::new(&backend);
    assert_eq!(store.read_store_state().await.unwrap(), state);
    assert_eq!(store.entity_index(&id).await.unwrap().unwrap().version, 1);
    assert_eq!(
        store.entity_content(&id).await.unwrap(),
        Some(json!({"tags": ["a"]}))
    );
}

#[tokio::test]
async fn tombstoned_entity_has_no_content() {
    let backend = MemoryFileBackend::new();
    let id = EntityId::new("item", "item2");
    let state = StoreState {
        entities: vec![EntityIndex::deleted(id.clone(), 2)],
        ..Default::default()
    };
    backend
        .insert(INDEX_FILE, serde_json::to_vec(&state).unwrap())
        .await;

    let store = FileTreeStore::new(&backend);
    assert!(store.entity_content(&id).await.unwrap().is_none());
}

// ── Writes ──────────────────────────────────────────────────────

#[tokio::test]
async fn writes_land_with_index_on_commit() {
    let backend = MemoryFileBackend::new();
    let store = FileTreeStore::new(&backend);
    let id = EntityId::new("item", "item1");

    store.put_entity(&id, 3, json!({"name": "one"})).await.unwrap();
    store.put_file("a.png", 4, vec![9, 9]).await.unwrap();
    store.put_link(&pair(), 5, json!({"role": "cameo"})).await.unwrap();
    assert!(store.has_pending_writes().await);
    assert!(backend.get(INDEX_FILE).await.is_none());

    store.commit().await.unwrap();
    assert!(!store.has_pending_writes().await);
    assert_eq!(backend.commit_count(), 1);

    let index: StoreState = serde_json::from_slice(&backend.get(INDEX_FILE).await.unwrap()).unwrap();
    assert_eq!(index.entities, vec![EntityIndex::active(id.clone(), 3)]);
    assert_eq!(index.files[0].version, 4);
    assert_eq!(index.links[0].version, 5);
    assert_eq!(backend.get("files/a.png").await, Some(vec![9, 9]));

    let fresh = FileTreeStore::new(&backend);
    assert_eq!(fresh.entity_content(&id).await.unwrap(), Some(json!({"name": "one"})));
    assert_eq!(
        fresh.link_payload(&pair()).await.unwrap(),
        Some(json!({"role": "cameo"}))
    );
    let links = fresh.links_of(&EntityId::new("artwork", "a1")).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].self_ref.entity_type, "artwork");
}

#[tokio::test]
async fn staged_content_is_readable_before_commit() {
    let store = FileTreeStore::new(&MemoryFileBackend::new());
    let id = EntityId::new("item", "item1");
    store.put_entity(&id, 1, json!({"n": 1})).await.unwrap();
    assert_eq!(store.entity_content(&id).await.unwrap(), Some(json!({"n": 1})));
}

#[tokio::test]
async fn delete_removes_content_and_keeps_tombstone() {
    let backend = MemoryFileBackend::new();
    let store = FileTreeStore::new(&backend);
    let id = EntityId::new("item", "item1");
    store.put_entity(&id, 1, json!({})).await.unwrap();
    store.commit().await.unwrap();

    store.delete_entity(&id, 2).await.unwrap();
    store.commit().await.unwrap();

    assert!(backend.get(&entity_path(&id)).await.is_none());
    let index = store.entity_index(&id).await.unwrap().unwrap();
    assert_eq!(index.status, ItemStatus::Deleted);
    assert_eq!(index.version, 2);
}

#[tokio::test]
async fn delete_of_unknown_entity_only_touches_index() {
    let backend = MemoryFileBackend::new();
    let store = FileTreeStore::new(&backend);
    store
        .delete_entity(&EntityId::new("item", "ghost"), 7)
        .await
        .unwrap();
    store.commit().await.unwrap();

    assert_eq!(backend.names().await, vec![INDEX_FILE.to_string()]);
}

#[tokio::test]
async fn commit_without_changes_is_noop() {
    let backend = MemoryFileBackend::new();
    let store = FileTreeStore::new(&backend);
    store.commit().await.unwrap();
    assert_eq!(backend.commit_count(), 0);
}

#[tokio::test]
async fn readonly_store_rejects_writes() {
    let store = FileTreeStore::readonly(&MemoryFileBackend::new());
    let err = store
        .put_entity(&EntityId::new("item", "x"), 1, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidState(_)));
}

#[tokio::test]
async fn refresh_picks_up_remote_changes() {
    let backend = MemoryFileBackend::new();
    let store = FileTreeStore::new(&backend);
    assert!(store.entity_index(&EntityId::new("item", "a")).await.unwrap().is_none());

    let other = FileTreeStore::new(&backend);
    other.put_entity(&EntityId::new("item", "a"), 1, json!({})).await.unwrap();
    other.commit().await.unwrap();

    store.refresh().await;
    assert!(store.entity_index(&EntityId::new("item", "a")).await.unwrap().is_some());
}

// ── Version guard ───────────────────────────────────────────────

#[tokio::test]
async fn older_entity_write_is_rejected() {
    let backend = MemoryFileBackend::new();
    let store = FileTreeStore::new(&backend);
    let id = EntityId::new("item", "item1");
    store.put_entity(&id, 5, json!({"v": 5})).await.unwrap();
    store.commit().await.unwrap();

    let err = store.put_entity(&id, 3, json!({"v": 3})).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::StaleVersion { stored: 5, attempted: 3, .. }
    ));
    let err = store.delete_entity(&id, 4).await.unwrap_err();
    assert!(matches!(err, SyncError::StaleVersion { .. }));
    assert!(!store.has_pending_writes().await);

    let fresh = FileTreeStore::new(&backend);
    let index = fresh.entity_index(&id).await.unwrap().unwrap();
    assert_eq!(index, EntityIndex::active(id.clone(), 5));
    assert_eq!(fresh.entity_content(&id).await.unwrap(), Some(json!({"v": 5})));
}

#[tokio::test]
async fn older_file_and_link_writes_are_rejected() {
    let store = FileTreeStore::new(&MemoryFileBackend::new());
    store.put_file("a.png", 6, vec![1]).await.unwrap();
    store.put_link(&pair(), 6, json!({})).await.unwrap();

    assert!(matches!(
        store.put_file("a.png", 2, vec![2]).await.unwrap_err(),
        SyncError::StaleVersion { .. }
    ));
    assert!(matches!(
        store.delete_file("a.png", 5).await.unwrap_err(),
        SyncError::StaleVersion { .. }
    ));
    assert!(matches!(
        store.put_link(&pair(), 1, json!({})).await.unwrap_err(),
        SyncError::StaleVersion { .. }
    ));
    assert!(matches!(
        store.delete_link(&pair(), 5).await.unwrap_err(),
        SyncError::StaleVersion { .. }
    ));

    assert_eq!(store.read_file("a.png").await.unwrap(), Some(vec![1]));
    assert_eq!(store.link_payload(&pair()).await.unwrap(), Some(json!({})));
}

#[tokio::test]
async fn equal_version_write_is_accepted() {
    let store = FileTreeStore::new(&MemoryFileBackend::new());
    let id = EntityId::new("item", "item1");
    store.put_entity(&id, 4, json!({"n": 1})).await.unwrap();
    store.put_entity(&id, 4, json!({"n": 2})).await.unwrap();
    store.delete_link(&pair(), 4).await.unwrap();
    store.delete_link(&pair(), 4).await.unwrap();

    assert_eq!(store.entity_content(&id).await.unwrap(), Some(json!({"n": 2})));
}
