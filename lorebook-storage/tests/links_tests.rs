use lorebook_storage::{QueryStore, StorageError};
use lorebook_types::{EntityId, EntityLinkPair, EntityLinkReference, ItemStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

fn casting() -> EntityLinkPair {
    EntityLinkPair::new(
        EntityLinkReference::new("character", "c1", "voicedBy"),
        EntityLinkReference::new("actor", "v1", "voices"),
    )
}

#[test]
fn put_and_read_link() {
    let store = QueryStore::open_in_memory().unwrap();
    let pair = casting();
    store.put_link(&pair, 1, &json!({"role": "lead"})).unwrap();

    let link = store.get_link(&pair).unwrap().unwrap();
    assert_eq!(link.status, ItemStatus::Active);
    assert_eq!(link.version, 1);
    assert_eq!(store.get_link_payload(&pair).unwrap(), Some(json!({"role": "lead"})));
}

#[test]
fn links_of_orients_from_each_endpoint() {
    let store = QueryStore::open_in_memory().unwrap();
    let pair = casting();
    store.put_link(&pair, 1, &json!(null)).unwrap();

    let from_character = store.links_of(&EntityId::new("character", "c1")).unwrap();
    assert_eq!(from_character.len(), 1);
    assert_eq!(from_character[0].self_ref.id, "c1");
    assert_eq!(from_character[0].opposite.id, "v1");

    let from_actor = store.links_of(&EntityId::new("actor", "v1")).unwrap();
    assert_eq!(from_actor[0].self_ref.id, "v1");
    assert_eq!(from_actor[0].pair(), pair);
}

#[test]
fn deleted_link_is_hidden_but_indexed() {
    let store = QueryStore::open_in_memory().unwrap();
    let pair = casting();
    store.put_link(&pair, 1, &json!({})).unwrap();
    store.delete_link(&pair, 2).unwrap();

    assert!(store.links_of(&EntityId::new("character", "c1")).unwrap().is_empty());
    assert!(store.get_link_payload(&pair).unwrap().is_none());

    let state = store.read_store_state().unwrap();
    assert_eq!(state.links.len(), 1);
    assert_eq!(state.links[0].status, ItemStatus::Deleted);
    assert_eq!(state.links[0].version, 2);
}

#[test]
fn stale_link_write_is_rejected() {
    let store = QueryStore::open_in_memory().unwrap();
    let pair = casting();
    store.put_link(&pair, 5, &json!({})).unwrap();
    assert!(matches!(
        store.delete_link(&pair, 4),
        Err(StorageError::StaleVersion { .. })
    ));
}

#[test]
fn either_endpoint_order_addresses_same_link() {
    let store = QueryStore::open_in_memory().unwrap();
    let a = EntityLinkReference::new("character", "c1", "voicedBy");
    let b = EntityLinkReference::new("actor", "v1", "voices");
    store.put_link(&EntityLinkPair::new(a.clone(), b.clone()), 1, &json!(1)).unwrap();
    store.put_link(&EntityLinkPair::new(b, a), 2, &json!(2)).unwrap();

    let state = store.read_store_state().unwrap();
    assert_eq!(state.links.len(), 1);
    assert_eq!(state.links[0].version, 2);
}
