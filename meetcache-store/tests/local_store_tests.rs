use meetcache_store::{DuckDbStore, IndexValue, LocalStore, MemoryStore, StorageError, Table};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::ops::Bound;

fn note(id: &str, date: &str) -> Value {
    json!({ "id": id, "date": date, "body": format!("note {id}"), "version": 1 })
}

// ── Basic CRUD ───────────────────────────────────────────────────

async fn put_and_get(store: &dyn LocalStore) {
    let key = store.put(Table::Notes, note("n1", "2026-01-01")).await.unwrap();
    assert_eq!(key, "n1");

    let got = store.get(Table::Notes, "n1").await.unwrap().unwrap();
    assert_eq!(got["body"], "note n1");
}

async fn get_missing_returns_none(store: &dyn LocalStore) {
    assert!(store.get(Table::Notes, "nope").await.unwrap().is_none());
}

async fn put_overwrites_by_key(store: &dyn LocalStore) {
    store.put(Table::Notes, note("n1", "2026-01-01")).await.unwrap();
    store
        .put(Table::Notes, json!({ "id": "n1", "date": "2026-02-01", "body": "v2" }))
        .await
        .unwrap();

    let got = store.get(Table::Notes, "n1").await.unwrap().unwrap();
    assert_eq!(got["body"], "v2");
    assert_eq!(store.count(Table::Notes).await.unwrap(), 1);
}

async fn tables_are_independent_namespaces(store: &dyn LocalStore) {
    store.put(Table::Notes, note("same", "2026-01-01")).await.unwrap();
    store
        .put(Table::Contacts, json!({ "id": "same", "email": "a@example.com" }))
        .await
        .unwrap();

    assert_eq!(store.count(Table::Notes).await.unwrap(), 1);
    assert_eq!(store.count(Table::Contacts).await.unwrap(), 1);
    store.delete(Table::Notes, "same").await.unwrap();
    assert!(store.get(Table::Contacts, "same").await.unwrap().is_some());
}

async fn delete_and_delete_missing(store: &dyn LocalStore) {
    store.put(Table::Notes, note("n1", "2026-01-01")).await.unwrap();
    store.delete(Table::Notes, "n1").await.unwrap();
    assert!(store.get(Table::Notes, "n1").await.unwrap().is_none());
    store.delete(Table::Notes, "n1").await.unwrap();
}

async fn get_all_and_count(store: &dyn LocalStore) {
    assert_eq!(store.count(Table::Notes).await.unwrap(), 0);
    assert!(store.get_all(Table::Notes).await.unwrap().is_empty());

    for i in 0..5 {
        store
            .put(Table::Notes, note(&format!("n{i}"), "2026-01-01"))
            .await
            .unwrap();
    }
    assert_eq!(store.count(Table::Notes).await.unwrap(), 5);
    assert_eq!(store.get_all(Table::Notes).await.unwrap().len(), 5);
}

async fn string_key_table_uses_key_field(store: &dyn LocalStore) {
    let key = store
        .put(
            Table::PrepCache,
            json!({ "key": "prep:m1", "expires_at": "2026-01-01T00:00:00.000Z" }),
        )
        .await
        .unwrap();
    assert_eq!(key, "prep:m1");
}

async fn missing_primary_key_is_rejected(store: &dyn LocalStore) {
    let err = store
        .put(Table::Notes, json!({ "date": "2026-01-01" }))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::MissingKey { table: "notes", key_path: "id" }));
}

async fn non_object_record_is_rejected(store: &dyn LocalStore) {
    let err = store.put(Table::Notes, json!("just a string")).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidRecord(_)));
}

// ── Auto-increment ───────────────────────────────────────────────

async fn auto_increment_assigns_monotonic_ids(store: &dyn LocalStore) {
    let k1 = store.put(Table::SyncQueue, json!({ "status": "pending" })).await.unwrap();
    let k2 = store.put(Table::SyncQueue, json!({ "status": "pending" })).await.unwrap();
    assert_eq!(k1, "1");
    assert_eq!(k2, "2");

    let stored = store.get(Table::SyncQueue, "2").await.unwrap().unwrap();
    assert_eq!(stored["id"], 2);
}

async fn auto_increment_never_reuses_deleted_ids(store: &dyn LocalStore) {
    store.put(Table::SyncQueue, json!({ "status": "pending" })).await.unwrap();
    let k2 = store.put(Table::SyncQueue, json!({ "status": "pending" })).await.unwrap();
    store.delete(Table::SyncQueue, &k2).await.unwrap();

    let k3 = store.put(Table::SyncQueue, json!({ "status": "pending" })).await.unwrap();
    assert_eq!(k3, "3");
}

async fn auto_increment_keeps_explicit_ids(store: &dyn LocalStore) {
    let k = store
        .put(Table::SyncQueue, json!({ "id": 10, "status": "synced" }))
        .await
        .unwrap();
    assert_eq!(k, "10");

    let next = store.put(Table::SyncQueue, json!({ "status": "pending" })).await.unwrap();
    assert_eq!(next, "11");
}

// ── Index range scans ────────────────────────────────────────────

async fn range_scan_is_index_ordered_and_bounded(store: &dyn LocalStore) {
    for (id, date) in [("c", "2026-03-01"), ("a", "2026-01-01"), ("b", "2026-02-01"), ("d", "2026-04-01")] {
        store.put(Table::Notes, note(id, date)).await.unwrap();
    }

    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Included("2026-03-01".into()));
    let mut seen = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        seen.push(record["id"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, vec!["a", "b", "c"]);

    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Excluded("2026-03-01".into()));
    let mut seen = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        seen.push(record["id"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, vec!["a", "b"]);
}

async fn range_scan_orders_ties_by_key(store: &dyn LocalStore) {
    for id in ["z", "m", "a"] {
        store.put(Table::Notes, note(id, "2026-01-01")).await.unwrap();
    }
    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Unbounded);
    let mut seen = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        seen.push(record["id"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, vec!["a", "m", "z"]);
}

async fn delete_current_during_iteration(store: &dyn LocalStore) {
    for i in 0..10 {
        store
            .put(Table::Notes, note(&format!("n{i}"), &format!("2026-01-{:02}", i + 1)))
            .await
            .unwrap();
    }

    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Included("2026-01-05".into()));
    let mut deleted = 0;
    while cursor.next().await.unwrap().is_some() {
        cursor.delete_current().await.unwrap();
        deleted += 1;
    }
    assert_eq!(deleted, 5);
    assert_eq!(store.count(Table::Notes).await.unwrap(), 5);
    assert!(store.get(Table::Notes, "n4").await.unwrap().is_none());
    assert!(store.get(Table::Notes, "n5").await.unwrap().is_some());
}

async fn records_without_indexed_field_are_skipped(store: &dyn LocalStore) {
    store.put(Table::Notes, note("dated", "2026-01-01")).await.unwrap();
    store.put(Table::Notes, json!({ "id": "undated" })).await.unwrap();
    store.put(Table::Notes, json!({ "id": "bool", "date": true })).await.unwrap();

    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Unbounded);
    let first = cursor.next().await.unwrap().unwrap();
    assert_eq!(first["id"], "dated");
    assert!(cursor.next().await.unwrap().is_none());
}

async fn cursor_is_not_restartable(store: &dyn LocalStore) {
    store.put(Table::Notes, note("n1", "2026-01-01")).await.unwrap();

    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Unbounded);
    assert!(cursor.next().await.unwrap().is_some());
    assert!(cursor.next().await.unwrap().is_none());

    // New records do not revive an exhausted cursor.
    store.put(Table::Notes, note("n0", "2025-01-01")).await.unwrap();
    store.put(Table::Notes, note("n9", "2027-01-01")).await.unwrap();
    assert!(cursor.next().await.unwrap().is_none());
}

async fn reindex_on_overwrite(store: &dyn LocalStore) {
    store.put(Table::Notes, note("n1", "2020-01-01")).await.unwrap();
    store.put(Table::Notes, note("n1", "2030-01-01")).await.unwrap();

    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Included("2025-01-01".into()));
    assert!(cursor.next().await.unwrap().is_none());
}

async fn unknown_index_is_an_error(store: &dyn LocalStore) {
    let mut cursor = store.range_by_index(Table::Notes, "color", Bound::Unbounded);
    let err = cursor.next().await.unwrap_err();
    assert!(matches!(err, StorageError::UnknownIndex { .. }));
}

async fn integer_index_values(store: &dyn LocalStore) {
    for (id, ts) in [("late", 300), ("early", -5), ("mid", 20)] {
        store
            .put(Table::Contacts, json!({ "id": id, "last_seen_at": ts }))
            .await
            .unwrap();
    }
    let mut cursor = store.range_by_index(Table::Contacts, "last_seen_at", Bound::Included(IndexValue::Integer(20)));
    let mut seen = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        seen.push(record["id"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, vec!["early", "mid"]);
}

async fn equal_scan_skips_other_values(store: &dyn LocalStore) {
    for (id, status) in [
        (1, "conflict"),
        (2, "synced"),
        (3, "pending"),
        (4, "synced"),
        (5, "resolved"),
    ] {
        store
            .put(Table::SyncQueue, json!({ "id": id, "status": status }))
            .await
            .unwrap();
    }

    let mut cursor = store.entries_equal_to(Table::SyncQueue, "status", "synced".into());
    let mut seen = Vec::new();
    while let Some(record) = cursor.next().await.unwrap() {
        seen.push(record["id"].as_i64().unwrap());
        cursor.delete_current().await.unwrap();
    }
    assert_eq!(seen, vec![2, 4]);
    assert_eq!(store.count(Table::SyncQueue).await.unwrap(), 3);
}

async fn overwrite_and_delete_update_the_index(store: &dyn LocalStore) {
    store.put(Table::Notes, note("n1", "2026-01-01")).await.unwrap();
    store.put(Table::Notes, note("n2", "2026-01-02")).await.unwrap();
    store.put(Table::Notes, note("n1", "2026-01-03")).await.unwrap();
    store.delete(Table::Notes, "n2").await.unwrap();

    let mut cursor = store.range_by_index(Table::Notes, "date", Bound::Unbounded);
    let first = cursor.next().await.unwrap().unwrap();
    assert_eq!(first["date"], "2026-01-03");
    assert!(cursor.next().await.unwrap().is_none());
}

macro_rules! backend_suite {
    ($backend:ident, $make:expr, [$($case:ident),* $(,)?]) => {
        mod $backend {
            use super::*;
            $(
                #[tokio::test]
                async fn $case() {
                    let store = $make;
                    super::$case(&store).await;
                }
            )*
        }
    };
}

backend_suite!(memory_backend, MemoryStore::new(), [
    equal_scan_skips_other_values,
    overwrite_and_delete_update_the_index,
    put_and_get,
    get_missing_returns_none,
    put_overwrites_by_key,
    tables_are_independent_namespaces,
    delete_and_delete_missing,
    get_all_and_count,
    string_key_table_uses_key_field,
    missing_primary_key_is_rejected,
    non_object_record_is_rejected,
    auto_increment_assigns_monotonic_ids,
    auto_increment_never_reuses_deleted_ids,
    auto_increment_keeps_explicit_ids,
    range_scan_is_index_ordered_and_bounded,
    range_scan_orders_ties_by_key,
    delete_current_during_iteration,
    records_without_indexed_field_are_skipped,
    cursor_is_not_restartable,
    reindex_on_overwrite,
    unknown_index_is_an_error,
    integer_index_values,
]);

backend_suite!(duckdb_backend, DuckDbStore::open_in_memory().unwrap(), [
    equal_scan_skips_other_values,
    overwrite_and_delete_update_the_index,
    put_and_get,
    get_missing_returns_none,
    put_overwrites_by_key,
    tables_are_independent_namespaces,
    delete_and_delete_missing,
    get_all_and_count,
    string_key_table_uses_key_field,
    missing_primary_key_is_rejected,
    non_object_record_is_rejected,
    auto_increment_assigns_monotonic_ids,
    auto_increment_never_reuses_deleted_ids,
    auto_increment_keeps_explicit_ids,
    range_scan_is_index_ordered_and_bounded,
    range_scan_orders_ties_by_key,
    delete_current_during_iteration,
    records_without_indexed_field_are_skipped,
    cursor_is_not_restartable,
    reindex_on_overwrite,
    unknown_index_is_an_error,
    integer_index_values,
]);
