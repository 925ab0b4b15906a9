// ABOUTME: Tests for the queued SQLite key/value store
// ABOUTME: Covers record lifecycle, ordering, bulk replace, reopening and shutdown

use burrow::store::{Store, StoreError};
use serde_json::json;

// ============================================================================
// Record lifecycle
// ============================================================================

#[tokio::test]
async fn test_insert_then_list() {
    let store = Store::open_in_memory(8).unwrap();
    store
        .insert("note", "a", &json!({"text": "hello"}))
        .await
        .unwrap();

    let records = store.list("note").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, "note");
    assert_eq!(records[0].key, "a");
    assert_eq!(records[0].body["text"], "hello");
    assert!(!records[0].updated_at.is_empty());
}

#[tokio::test]
async fn test_duplicate_insert_is_rejected() {
    let store = Store::open_in_memory(8).unwrap();
    store.insert("note", "a", &1).await.unwrap();

    let err = store.insert("note", "a", &2).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::AlreadyExists { ref kind, ref key } if kind == "note" && key == "a"
    ));

    // same key under another kind is a different record
    store.insert("other", "a", &3).await.unwrap();
    assert_eq!(store.list("note").await.unwrap()[0].body, json!(1));
}

#[tokio::test]
async fn test_update_existing_and_missing() {
    let store = Store::open_in_memory(8).unwrap();
    store.insert("note", "a", &"old").await.unwrap();
    store.update("note", "a", &"new").await.unwrap();
    assert_eq!(store.list("note").await.unwrap()[0].body, json!("new"));

    let err = store.update("note", "missing", &"x").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_delete_reports_whether_anything_was_removed() {
    let store = Store::open_in_memory(8).unwrap();
    store.insert("note", "a", &1).await.unwrap();

    assert!(store.delete("note", "a").await.unwrap());
    assert!(!store.delete("note", "a").await.unwrap());
    assert!(store.list("note").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_ordered_by_key_and_scoped_to_kind() {
    let store = Store::open_in_memory(8).unwrap();
    for key in ["c", "a", "b"] {
        store.insert("note", key, &key).await.unwrap();
    }
    store.insert("other", "0", &0).await.unwrap();

    let keys: Vec<String> = store
        .list("note")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

// ============================================================================
// Bulk replace
// ============================================================================

#[tokio::test]
async fn test_replace_kind_swaps_all_records_of_that_kind() {
    let store = Store::open_in_memory(8).unwrap();
    store.insert("task", "1", &"one").await.unwrap();
    store.insert("task", "2", &"two").await.unwrap();
    store.insert("note", "keep", &"me").await.unwrap();

    let fresh = vec![
        ("3".to_string(), "three"),
        ("4".to_string(), "four"),
    ];
    store.replace_kind("task", &fresh).await.unwrap();

    let tasks = store.list("task").await.unwrap();
    let keys: Vec<&str> = tasks.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["3", "4"]);
    assert_eq!(store.list("note").await.unwrap().len(), 1);

    store.replace_kind::<String>("task", &[]).await.unwrap();
    assert!(store.list("task").await.unwrap().is_empty());
}

// ============================================================================
// Durability and shutdown
// ============================================================================

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("burrow.db");

    let store = Store::open(&path, 8).unwrap();
    store.insert("note", "a", &json!({"n": 1})).await.unwrap();
    store.close();

    let reopened = Store::open(&path, 8).unwrap();
    let records = reopened.list("note").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].body["n"], 1);
    reopened.close();
}

#[tokio::test]
async fn test_closed_store_refuses_work() {
    let store = Store::open_in_memory(8).unwrap();
    let clone = store.clone();
    store.close();

    assert!(matches!(
        clone.insert("note", "a", &1).await,
        Err(StoreError::Closed)
    ));
    assert!(matches!(clone.list("note").await, Err(StoreError::Closed)));

    // closing twice is harmless
    store.close();
}

#[tokio::test]
async fn test_many_concurrent_writers() {
    let store = Store::open_in_memory(64).unwrap();
    let mut handles = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.insert("n", &format!("{:03}", i), &i).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(store.list("n").await.unwrap().len(), 32);
}
