use lorebook_types::{
    DataWrapper, EntityId, EntityIndex, EntityLink, EntityLinkPair, EntityLinkReference,
    EntityLinkResult, FileIndex, ItemStatus, NO_VERSION, StoreIndex, StoreState, VersionClock,
};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── ItemStatus ───────────────────────────────────────────────────

#[test]
fn status_storage_names() {
    assert_eq!(ItemStatus::Active.as_str(), "active");
    assert_eq!(ItemStatus::parse("deleted"), Some(ItemStatus::Deleted));
    assert_eq!(ItemStatus::parse("gone"), None);
}

#[test]
fn entity_index_serde_shape() {
    let index = EntityIndex::active(EntityId::new("item", "item1"), 3);
    let value = serde_json::to_value(&index).unwrap();
    assert_eq!(
        value,
        json!({"type": "item", "id": "item1", "status": "active", "version": 3})
    );
    let back: EntityIndex = serde_json::from_value(value).unwrap();
    assert_eq!(back, index);
}

// ── StoreState ───────────────────────────────────────────────────

#[test]
fn store_index_upserts_replace_existing_entries() {
    let mut index = StoreIndex::default();
    assert!(index.is_empty());

    let id = EntityId::new("item", "1");
    index.upsert_entity(EntityIndex::active(id.clone(), 1));
    index.upsert_entity(EntityIndex::deleted(id.clone(), 2));
    index.upsert_file(FileIndex::active("cover.png", 4));

    let state = index.to_state();
    assert_eq!(state.entities.len(), 1);
    assert_eq!(state.entity(&id).unwrap().status, ItemStatus::Deleted);
    assert_eq!(index.file("cover.png").unwrap().version, 4);
}

#[test]
fn store_index_snapshot_is_sorted_by_key() {
    let mut index = StoreIndex::default();
    for name in ["c", "a", "b"] {
        index.upsert_entity(EntityIndex::active(EntityId::new("item", name), 1));
    }
    let ids: Vec<String> = index
        .to_state()
        .entities
        .into_iter()
        .map(|e| e.id.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn store_state_roundtrips_through_index() {
    let pair = EntityLinkPair::new(
        EntityLinkReference::new("character", "c1", "artworks"),
        EntityLinkReference::new("artwork", "a1", "characters"),
    );
    let mut index = StoreIndex::default();
    index.upsert_link(EntityLink::active(pair.clone(), 7));

    let json = serde_json::to_string(&index.to_state()).unwrap();
    let back: StoreState = serde_json::from_str(&json).unwrap();
    assert_eq!(back.link(&pair).unwrap().version, 7);
    assert_eq!(StoreIndex::from(back), index);
}

#[test]
fn store_state_tolerates_missing_sections() {
    let state: StoreState = serde_json::from_str("{}").unwrap();
    assert!(state.is_empty());
}

// ── EntityLinkResult ─────────────────────────────────────────────

#[test]
fn link_result_reorients_pair() {
    let c = EntityLinkReference::new("character", "c1", "artworks");
    let a = EntityLinkReference::new("artwork", "a1", "characters");
    let pair = EntityLinkPair::new(c.clone(), a.clone());

    let from_character =
        EntityLinkResult::from_pair(&pair, &EntityId::new("character", "c1"), json!({}), 1)
            .unwrap();
    assert_eq!(from_character.self_ref, c);
    assert_eq!(from_character.opposite, a);
    assert_eq!(from_character.pair(), pair);
}

// ── DataWrapper ──────────────────────────────────────────────────

#[test]
fn wrapper_accessors() {
    let id = EntityId::new("item", "1");
    let active: DataWrapper<serde_json::Value, EntityId> = DataWrapper::Active {
        id: id.clone(),
        data: json!({"name": "x"}),
        version: 2,
    };
    assert!(active.is_active());
    assert_eq!(active.version(), Some(2));
    assert_eq!(active.data().unwrap()["name"], "x");

    let missing: DataWrapper<serde_json::Value, EntityId> = DataWrapper::missing(id.clone());
    assert!(missing.is_deleted());
    assert_eq!(missing.version(), Some(NO_VERSION));

    let pending: DataWrapper<serde_json::Value, EntityId> = DataWrapper::Pending { id: id.clone() };
    assert!(pending.is_pending());
    assert_eq!(pending.version(), None);
    assert_eq!(pending.id(), &id);
}

#[test]
fn wrapper_map_keeps_non_active_states() {
    let failure: DataWrapper<u32, String> = DataWrapper::Failure {
        id: "k".into(),
        message: "boom".into(),
    };
    assert!(failure.map(|v| v + 1).is_failure());

    let active: DataWrapper<u32, String> = DataWrapper::Active {
        id: "k".into(),
        data: 1,
        version: 1,
    };
    assert_eq!(active.map(|v| v + 1).data(), Some(&2));
}

// ── VersionClock ─────────────────────────────────────────────────

#[test]
fn clock_is_strictly_monotonic() {
    let clock = VersionClock::new();
    let mut prev = clock.tick();
    for _ in 0..1000 {
        let next = clock.tick();
        assert!(next > prev);
        prev = next;
    }
}

#[test]
fn clock_observe_moves_past_remote_versions() {
    let clock = VersionClock::new();
    let far_future = clock.tick() + 1_000_000;
    clock.observe(far_future);
    assert!(clock.tick() > far_future);
}

#[test]
fn clock_starting_after_floor() {
    let clock = VersionClock::starting_after(i64::MAX - 10);
    assert!(clock.tick() > i64::MAX - 10);
}
