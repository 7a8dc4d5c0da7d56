use lorebook_storage::{
    FullTextTerm, QueryStore, StorageError, TagPosting, derive_tag_postings, search_terms,
    search_terms_for_content, wal_path,
};
use lorebook_types::{EntityId, ItemStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

fn put(store: &QueryStore, id: &EntityId, version: i64, content: serde_json::Value) {
    let tags = derive_tag_postings(&content);
    let terms = search_terms_for_content(&content);
    store.put_entity(id, version, &content, &tags, &terms).unwrap();
}

// ── Entities ─────────────────────────────────────────────────────

#[test]
fn put_and_get_entity() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "c1");
    put(&store, &id, 1, json!({"name": "Aria", "tags": ["hero"]}));

    let content = store.get_entity(&id).unwrap();
    assert_eq!(content["name"], "Aria");

    let index = store.get_entity_index(&id).unwrap().unwrap();
    assert_eq!(index.status, ItemStatus::Active);
    assert_eq!(index.version, 1);
}

#[test]
fn missing_entity_is_none_and_not_found() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "ghost");

    assert!(store.get_entity_index(&id).unwrap().is_none());
    assert!(store.get_entity_content(&id).unwrap().is_none());
    assert!(matches!(store.get_entity(&id), Err(StorageError::NotFound(_))));
}

#[test]
fn delete_leaves_tombstone() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "c1");
    put(&store, &id, 1, json!({"name": "Aria"}));
    store.delete_entity(&id, 2).unwrap();

    assert!(store.get_entity_content(&id).unwrap().is_none());
    let index = store.get_entity_index(&id).unwrap().unwrap();
    assert_eq!(index.status, ItemStatus::Deleted);
    assert_eq!(index.version, 2);
}

#[test]
fn delete_of_unknown_entity_records_tombstone() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("artwork", "a9");
    store.delete_entity(&id, 7).unwrap();

    let index = store.get_entity_index(&id).unwrap().unwrap();
    assert_eq!(index.status, ItemStatus::Deleted);
    assert_eq!(index.version, 7);
}

#[test]
fn older_version_is_rejected() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "c1");
    put(&store, &id, 5, json!({"name": "new"}));

    let err = store
        .put_entity(&id, 3, &json!({"name": "old"}), &[], &[])
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::StaleVersion { stored: 5, attempted: 3, .. }
    ));
    assert!(store.delete_entity(&id, 4).is_err());
    assert_eq!(store.get_entity(&id).unwrap()["name"], "new");
}

#[test]
fn same_version_rewrite_is_accepted() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "c1");
    put(&store, &id, 5, json!({"name": "a"}));
    put(&store, &id, 5, json!({"name": "a"}));
    assert_eq!(store.count_entities("character").unwrap(), 1);
}

#[test]
fn list_and_count_skip_tombstones() {
    let store = QueryStore::open_in_memory().unwrap();
    put(&store, &EntityId::new("character", "b"), 1, json!({}));
    put(&store, &EntityId::new("character", "a"), 1, json!({}));
    put(&store, &EntityId::new("artwork", "x"), 1, json!({}));
    store.delete_entity(&EntityId::new("character", "b"), 2).unwrap();

    assert_eq!(
        store.list_entities("character").unwrap(),
        vec![EntityId::new("character", "a")]
    );
    assert_eq!(store.count_entities("character").unwrap(), 1);
    assert_eq!(store.count_entities("artwork").unwrap(), 1);
}

// ── Postings ─────────────────────────────────────────────────────

#[test]
fn query_by_tag_finds_entity() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "c1");
    put(&store, &id, 1, json!({"tags": ["villain", "mage"]}));

    assert_eq!(store.query_by_tag("tags", "villain").unwrap(), vec![id.clone()]);
    assert_eq!(store.query_by_tag("tags", "mage").unwrap(), vec![id]);
    assert!(store.query_by_tag("tags", "hero").unwrap().is_empty());
}

#[test]
fn reput_removes_stale_postings() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "c1");
    put(&store, &id, 1, json!({"name": "dragon", "tags": ["a"]}));
    put(&store, &id, 2, json!({"name": "knight", "tags": ["b"]}));

    assert!(store.query_by_tag("tags", "a").unwrap().is_empty());
    assert_eq!(store.query_by_tag("tags", "b").unwrap(), vec![id.clone()]);

    assert!(store.query_by_full_text(&search_terms("dragon")).unwrap().is_empty());
    let hits = store.query_by_full_text(&search_terms("knight")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
}

#[test]
fn delete_removes_postings() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("character", "c1");
    put(&store, &id, 1, json!({"name": "dragon", "tags": ["a"]}));
    store.delete_entity(&id, 2).unwrap();

    assert!(store.query_by_tag("tags", "a").unwrap().is_empty());
    assert!(store.query_by_full_text(&search_terms("dragon")).unwrap().is_empty());
}

#[test]
fn explicit_postings_are_stored_as_given() {
    let store = QueryStore::open_in_memory().unwrap();
    let id = EntityId::new("artwork", "a1");
    let tags = vec![
        TagPosting::new("genre", "fantasy"),
        TagPosting::new("genre", "fantasy"),
    ];
    let terms = vec![FullTextTerm {
        n_gram: 3,
        token: "elf".into(),
    }];
    store.put_entity(&id, 1, &json!({}), &tags, &terms).unwrap();

    assert_eq!(store.query_by_tag("genre", "fantasy").unwrap(), vec![id.clone()]);
    let hits = store.query_by_full_text(&terms).unwrap();
    assert_eq!(hits[0].score, 1);
}

#[test]
fn full_text_score_grows_with_overlap() {
    let store = QueryStore::open_in_memory().unwrap();
    let close = EntityId::new("character", "close");
    let far = EntityId::new("character", "far");
    put(&store, &close, 1, json!({"name": "silver dragon"}));
    put(&store, &far, 1, json!({"name": "silver"}));

    let hits = store.query_by_full_text(&search_terms("silver dragon")).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, close);
    assert_eq!(hits[1].id, far);
    assert!(hits[0].score > hits[1].score);
}

#[test]
fn full_text_ties_break_by_id() {
    let store = QueryStore::open_in_memory().unwrap();
    put(&store, &EntityId::new("character", "b"), 1, json!({"name": "owl"}));
    put(&store, &EntityId::new("character", "a"), 1, json!({"name": "owl"}));

    let hits = store.query_by_full_text(&search_terms("owl")).unwrap();
    let ids: Vec<_> = hits.iter().map(|m| m.id.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

// ── Snapshot ─────────────────────────────────────────────────────

#[test]
fn read_store_state_includes_tombstones() {
    let store = QueryStore::open_in_memory().unwrap();
    put(&store, &EntityId::new("item", "item1"), 1, json!({}));
    store.delete_entity(&EntityId::new("item", "item2"), 2).unwrap();
    store.write_file("cover.png", 3, b"png").unwrap();

    let state = store.read_store_state().unwrap();
    assert_eq!(state.entities.len(), 2);
    assert_eq!(
        state.entity(&EntityId::new("item", "item2")).unwrap().status,
        ItemStatus::Deleted
    );
    assert_eq!(state.file("cover.png").unwrap().version, 3);
    assert!(state.links.is_empty());
}

#[test]
fn reopen_from_disk_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lorebook.duckdb");
    let id = EntityId::new("character", "c1");

    {
        let store = QueryStore::open(&path).unwrap();
        put(&store, &id, 1, json!({"name": "Aria", "tags": ["hero"]}));
    }

    let store = QueryStore::open(&path).unwrap();
    assert_eq!(store.get_entity(&id).unwrap()["name"], "Aria");
    assert_eq!(store.query_by_tag("tags", "hero").unwrap(), vec![id]);
}

#[test]
fn wal_sits_next_to_the_database() {
    let path = std::path::Path::new("/data/lorebook.duckdb");
    assert_eq!(wal_path(path), std::path::Path::new("/data/lorebook.duckdb.wal"));
}

#[test]
fn unreadable_wal_does_not_block_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lorebook.duckdb");
    let id = EntityId::new("character", "c1");

    {
        let store = QueryStore::open(&path).unwrap();
        put(&store, &id, 1, json!({"name": "Aria"}));
    }
    std::fs::write(wal_path(&path), b"not a duckdb log").unwrap();

    let store = QueryStore::open(&path).unwrap();
    assert_eq!(store.get_entity(&id).unwrap()["name"], "Aria");
}
