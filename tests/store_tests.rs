mod common;

use bytes::Bytes;
use http::Method;
use idempotency_engine::error::AppError;
use idempotency_engine::idempotency::{CapturedResponse, Fingerprint, IdempotencyStatus};
use idempotency_engine::store::{
    CacheStore, ExpirySweeper, InMemoryCacheStore, LockManager, RecordStore, RedisCacheStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

fn fingerprint() -> Fingerprint {
    Fingerprint::compute(&Method::POST, "/payments", br#"{"amount":100}"#)
}

fn response() -> CapturedResponse {
    CapturedResponse {
        status_code: 201,
        content_type: Some("application/json".to_string()),
        body: Bytes::from_static(br#"{"id":"pay_1"}"#),
    }
}

async fn exercise_record_lifecycle(records: &RecordStore, key: &str) {
    assert!(records.get(key).await.unwrap().is_none());

    let created = records
        .put_processing(key, &fingerprint(), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(created.status, IdempotencyStatus::Processing);

    let err = records
        .put_processing(key, &fingerprint(), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyExists(_)));

    let stored = records.get(key).await.unwrap().unwrap();
    assert!(stored.is_processing());
    assert_eq!(stored.fingerprint, fingerprint());
    assert!(stored.response_body.is_none());

    assert_ok!(records.complete(key, &response()).await);
    let stored = records.get(key).await.unwrap().unwrap();
    assert!(stored.is_completed());
    assert_eq!(stored.response_status_code, Some(201));
    assert_eq!(stored.response_body, Some(response().body));
    assert_eq!(stored.content_type.as_deref(), Some("application/json"));
    assert!(stored.completed_at.is_some());

    // COMPLETED is terminal.
    let err = assert_err!(records.complete(key, &response()).await);
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_in_memory_record_lifecycle() {
    let records = RecordStore::new(Arc::new(InMemoryCacheStore::new()), "idem");
    exercise_record_lifecycle(&records, "order-1").await;
}

#[tokio::test]
async fn test_complete_without_record_is_not_found() {
    let records = RecordStore::new(Arc::new(InMemoryCacheStore::new()), "idem");
    let err = records.complete("missing", &response()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_empty_response_body_round_trips() {
    let records = RecordStore::new(Arc::new(InMemoryCacheStore::new()), "idem");
    records
        .put_processing("order-1", &fingerprint(), Duration::from_secs(60))
        .await
        .unwrap();
    records
        .complete(
            "order-1",
            &CapturedResponse {
                status_code: 204,
                content_type: None,
                body: Bytes::new(),
            },
        )
        .await
        .unwrap();

    let stored = records.get("order-1").await.unwrap().unwrap();
    assert_eq!(stored.response_status_code, Some(204));
    assert_eq!(stored.response_body, Some(Bytes::new()));
    assert!(stored.content_type.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_completion_does_not_extend_ttl() {
    let records = RecordStore::new(Arc::new(InMemoryCacheStore::new()), "idem");
    records
        .put_processing("order-1", &fingerprint(), Duration::from_secs(60))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;
    records.complete("order-1", &response()).await.unwrap();
    let stored = records.get("order-1").await.unwrap().unwrap();
    assert!(stored.ttl.unwrap() <= Duration::from_secs(30));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(records.get("order-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_lock_is_exclusive_until_released() {
    let locks = LockManager::new(Arc::new(InMemoryCacheStore::new()), "idem");

    let guard = locks
        .acquire("order-1", Duration::from_secs(5))
        .await
        .unwrap()
        .expect("lock is free");
    assert_eq!(guard.key(), "order-1");
    assert!(locks
        .acquire("order-1", Duration::from_secs(5))
        .await
        .unwrap()
        .is_none());
    assert!(locks
        .acquire("order-2", Duration::from_secs(5))
        .await
        .unwrap()
        .is_some());

    guard.release().await.unwrap();
    assert!(locks
        .acquire("order-1", Duration::from_secs(5))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let locks = LockManager::new(Arc::new(InMemoryCacheStore::new()), "idem");
    locks.release("never-held", "token").await.unwrap();

    let guard = locks
        .acquire("order-1", Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    let token = guard.token().to_string();
    guard.release().await.unwrap();
    locks.release("order-1", &token).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_expired_holder_cannot_release_new_holder() {
    let locks = LockManager::new(Arc::new(InMemoryCacheStore::new()), "idem");

    let stale = locks
        .acquire("order-1", Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    let current = locks
        .acquire("order-1", Duration::from_secs(5))
        .await
        .unwrap()
        .expect("lease expired");

    stale.release().await.unwrap();
    assert!(locks
        .acquire("order-1", Duration::from_secs(5))
        .await
        .unwrap()
        .is_none());

    current.release().await.unwrap();
}

#[tokio::test]
async fn test_dropped_guard_releases_lock() {
    let store = InMemoryCacheStore::new();
    let locks = LockManager::new(Arc::new(store.clone()), "idem");

    {
        let _guard = locks
            .acquire("order-1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
    }
    common::settle().await;

    assert!(!store.exists("idem:lock:order-1").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_purges_expired_entries() {
    let store = InMemoryCacheStore::new();
    let records = RecordStore::new(Arc::new(store.clone()), "idem");
    records
        .put_processing("short", &fingerprint(), Duration::from_secs(1))
        .await
        .unwrap();
    records
        .put_processing("long", &fingerprint(), Duration::from_secs(600))
        .await
        .unwrap();

    let sweeper = ExpirySweeper::new(store.clone(), Duration::from_secs(10));
    assert_eq!(sweeper.run_once().await, 0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(sweeper.run_once().await, 1);
    assert_eq!(store.len().await, 1);
}

async fn redis_store() -> RedisCacheStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = redis::Client::open(url).expect("valid redis url");
    RedisCacheStore::connect(&client)
        .await
        .expect("Failed to connect to Redis")
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_redis_record_lifecycle() {
    let store = redis_store().await;
    store.ping().await.unwrap();

    let prefix = format!("test-{}", Uuid::new_v4());
    let records = RecordStore::new(Arc::new(store), prefix);
    exercise_record_lifecycle(&records, "order-1").await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_redis_lock_is_token_checked() {
    let store = redis_store().await;
    let key = format!("test-lock-{}", Uuid::new_v4());

    assert!(store.try_acquire_lock(&key, "a", Duration::from_secs(5)).await.unwrap());
    assert!(!store.try_acquire_lock(&key, "b", Duration::from_secs(5)).await.unwrap());
    assert!(!store.release_lock(&key, "b").await.unwrap());
    assert!(store.release_lock(&key, "a").await.unwrap());
    assert!(!store.release_lock(&key, "a").await.unwrap());
    assert!(store.try_acquire_lock(&key, "b", Duration::from_secs(5)).await.unwrap());
    store.release_lock(&key, "b").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_redis_create_fields_sets_expiry() {
    let store = redis_store().await;
    let key = format!("test-hash-{}", Uuid::new_v4());
    let fields = vec![("status".to_string(), "PROCESSING".to_string())];

    assert!(store
        .create_fields(&key, fields.clone(), Duration::from_secs(30))
        .await
        .unwrap());
    assert!(!store
        .create_fields(&key, fields, Duration::from_secs(30))
        .await
        .unwrap());

    let ttl = store.time_to_live(&key).await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(30));
    assert!(ttl > Duration::from_secs(25));
    assert!(store.set_expiry(&key, Duration::from_millis(1)).await.unwrap());
}
