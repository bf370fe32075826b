//! Document Locking Tests
//!
//! Tests for:
//! - Lost updates on unlocked read-modify-write against the JSON file store
//! - Per-path locks serializing concurrent writers
//! - Independent documents not blocking each other

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cg_store::{Documents, JsonFileStore, MemoryStore};

const WRITERS: usize = 32;

async fn append_entry(docs: &Documents, id: usize) {
    let _guard = docs.lock("/keys").await;
    let mut keys: HashMap<String, String> = docs.load("/keys").await.unwrap();
    // Yield between read and write so other writers get a chance to interleave
    tokio::task::yield_now().await;
    keys.insert(format!("identity-{id}"), format!("key-{id}"));
    docs.save("/keys", &keys).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locked_writers_lose_nothing_on_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("main_db.json")).await.unwrap();
    let docs = Documents::new(Arc::new(store), Duration::from_secs(5));

    let tasks = (0..WRITERS).map(|id| {
        let docs = docs.clone();
        tokio::spawn(async move { append_entry(&docs, id).await })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let keys: HashMap<String, String> = docs.load("/keys").await.unwrap();
    assert_eq!(keys.len(), WRITERS);

    // And the file on disk agrees
    let reopened = JsonFileStore::open(dir.path().join("main_db.json")).await.unwrap();
    let docs = Documents::new(Arc::new(reopened), Duration::from_secs(5));
    let keys: HashMap<String, String> = docs.load("/keys").await.unwrap();
    assert_eq!(keys.len(), WRITERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unlocked_writers_can_lose_updates() {
    let docs = Documents::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));
    let barrier = Arc::new(tokio::sync::Barrier::new(WRITERS));

    let tasks = (0..WRITERS).map(|id| {
        let docs = docs.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            let mut keys: HashMap<String, String> = docs.load("/keys").await.unwrap();
            // Everyone has read the empty document before anyone writes
            barrier.wait().await;
            keys.insert(format!("identity-{id}"), format!("key-{id}"));
            docs.save("/keys", &keys).await.unwrap();
        })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let keys: HashMap<String, String> = docs.load("/keys").await.unwrap();
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn test_distinct_paths_lock_independently() {
    let docs = Documents::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));

    let _keys = docs.lock("/keys").await;
    let _limits = docs.lock("/ratelimits").await;
    let _records = docs.lock("/records").await;

    docs.save("/ratelimits", &HashMap::from([("10.0.0.1".to_string(), 1i64)]))
        .await
        .unwrap();
}
