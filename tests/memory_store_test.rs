//! Conditional semantics of the in-memory flag store.

use chrono::{DateTime, TimeZone, Utc};
use flagctx::model::{EntityId, FlagPatch, FlagRecord, Patch, Summary};
use flagctx::store::{FlagFilter, FlagStore, MemoryStore, UpdateResult};

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 8, minute, 0).unwrap()
}

fn store_with(entity: &EntityId) -> MemoryStore {
    let store = MemoryStore::new();
    assert!(store.create_entity(entity));
    store
}

#[tokio::test]
async fn insert_requires_entity_and_absent_key() {
    let entity = EntityId::new("e1");
    let store = store_with(&entity);

    assert_eq!(
        store
            .insert_flag(&EntityId::new("missing"), FlagRecord::queued("a", "1"))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .insert_flag(&entity, FlagRecord::queued("a", "1"))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .insert_flag(&entity, FlagRecord::started("a", "1", at(0)))
            .await
            .unwrap(),
        0
    );
    assert_eq!(store.find_flags(&entity, "a").await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_entity_is_idempotent() {
    let entity = EntityId::new("e1");
    let store = store_with(&entity);
    store
        .insert_flag(&entity, FlagRecord::queued("a", "1"))
        .await
        .unwrap();

    assert!(!store.create_entity(&entity));
    assert_eq!(store.list_flags(&entity).await.unwrap().len(), 1);
}

#[tokio::test]
async fn not_queued_filter_skips_queued_records() {
    let entity = EntityId::new("e1");
    let store = store_with(&entity);
    store
        .insert_flag(&entity, FlagRecord::queued("a", "1"))
        .await
        .unwrap();

    let patch = FlagPatch {
        queued: Some(true),
        ..FlagPatch::default()
    };
    let result = store
        .update_flag(&entity, "a", FlagFilter::NotQueued, patch)
        .await
        .unwrap();
    assert_eq!(result, UpdateResult::default());
}

#[tokio::test]
async fn update_distinguishes_matched_from_modified() {
    let entity = EntityId::new("e1");
    let store = store_with(&entity);
    store
        .insert_flag(&entity, FlagRecord::started("a", "1", at(0)))
        .await
        .unwrap();

    let patch = FlagPatch {
        ended: Patch::Set(at(5)),
        queued: Some(false),
        summary: Some(Summary::Ended),
        ..FlagPatch::default()
    };
    let first = store
        .update_flag(&entity, "a", FlagFilter::Present, patch.clone())
        .await
        .unwrap();
    assert_eq!(first, UpdateResult { matched: 1, modified: 1 });

    let again = store
        .update_flag(&entity, "a", FlagFilter::Present, patch)
        .await
        .unwrap();
    assert_eq!(again, UpdateResult { matched: 1, modified: 0 });

    let flag = &store.find_flags(&entity, "a").await.unwrap()[0];
    assert_eq!(flag.ended, Some(at(5)));
    assert_eq!(flag.started, Some(at(0)));
}

#[tokio::test]
async fn update_targets_the_record_dedup_keeps() {
    let entity = EntityId::new("e1");
    let store = store_with(&entity);
    for record in [
        FlagRecord::queued("a", "1"),
        FlagRecord::started("a", "1", at(1)),
        FlagRecord::started("a", "1", at(2)),
    ] {
        store.push_flag(&entity, record).unwrap();
    }

    let patch = FlagPatch {
        errored: Patch::Set(at(3)),
        ..FlagPatch::default()
    };
    store
        .update_flag(&entity, "a", FlagFilter::Present, patch)
        .await
        .unwrap();

    let flags = store.find_flags(&entity, "a").await.unwrap();
    assert_eq!(flags[0].errored, None);
    assert_eq!(flags[1].errored, None);
    assert_eq!(flags[2].errored, Some(at(3)));
}

#[tokio::test]
async fn update_breaks_ties_in_store_order() {
    let entity = EntityId::new("e1");
    let store = store_with(&entity);
    store
        .push_flag(&entity, FlagRecord::new("a", "first"))
        .unwrap();
    store
        .push_flag(&entity, FlagRecord::new("a", "second"))
        .unwrap();

    let patch = FlagPatch {
        queued: Some(true),
        ..FlagPatch::default()
    };
    store
        .update_flag(&entity, "a", FlagFilter::Present, patch)
        .await
        .unwrap();

    let flags = store.find_flags(&entity, "a").await.unwrap();
    assert!(flags[0].queued);
    assert!(!flags[1].queued);
}

#[tokio::test]
async fn remove_matches_exact_started_values_and_key() {
    let entity = EntityId::new("e1");
    let store = store_with(&entity);
    for record in [
        FlagRecord::started("a", "1", at(1)),
        FlagRecord::queued("a", "1"),
        FlagRecord::started("a", "1", at(2)),
        FlagRecord::started("b", "1", at(1)),
        FlagRecord::queued("b", "1"),
    ] {
        store.push_flag(&entity, record).unwrap();
    }

    let removed = store
        .remove_flags(&entity, "a", &[Some(at(1)), None])
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let a = store.find_flags(&entity, "a").await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].started, Some(at(2)));
    assert_eq!(store.find_flags(&entity, "b").await.unwrap().len(), 2);
}

#[tokio::test]
async fn push_to_unknown_entity_fails() {
    let store = MemoryStore::new();
    let err = store
        .push_flag(&EntityId::new("nope"), FlagRecord::queued("a", "1"))
        .unwrap_err();
    assert!(err.to_string().contains("nope"));
}
