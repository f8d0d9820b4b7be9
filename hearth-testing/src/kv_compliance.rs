//! Behaviour every [`KvStore`] must share.
//!
//! Backends call [`run_compliance_suite`] from their own tests, and
//! [`run_gc_suite`] when they implement [`GarbageCollect`]. Each case uses
//! fresh random keys so the suite can run against a shared database.

use chrono::{Duration, Utc};
use hearth_session::store::{GarbageCollect, KvStore, generate_session_id};

fn key(case: &str) -> String {
    format!("compliance-{case}-{}", generate_session_id())
}

/// Run every [`KvStore`] case.
pub async fn run_compliance_suite<K: KvStore + ?Sized>(kv: &K) {
    set_get_delete(kv).await;
    get_not_found(kv).await;
    upsert(kv).await;
    get_expired_key(kv).await;
}

pub async fn set_get_delete<K: KvStore + ?Sized>(kv: &K) {
    let key = key("set-get-delete");
    let expires_at = Utc::now() + Duration::hours(1);

    kv.set(&key, expires_at, b"value").await.expect("set failed");
    let value = kv.get(&key).await.expect("get failed");
    assert_eq!(value.as_deref(), Some(&b"value"[..]), "value not returned after set");

    kv.delete(&key).await.expect("delete failed");
    let value = kv.get(&key).await.expect("get after delete failed");
    assert!(value.is_none(), "value still present after delete");
}

pub async fn get_not_found<K: KvStore + ?Sized>(kv: &K) {
    let value = kv.get(&key("not-found")).await.expect("get failed");
    assert!(value.is_none(), "unknown key returned a value");

    kv.delete(&key("not-found"))
        .await
        .expect("deleting an unknown key must succeed");
}

pub async fn upsert<K: KvStore + ?Sized>(kv: &K) {
    let key = key("upsert");
    let expires_at = Utc::now() + Duration::hours(1);

    kv.set(&key, expires_at, b"first").await.expect("set failed");
    kv.set(&key, expires_at + Duration::hours(1), b"second")
        .await
        .expect("second set failed");

    let value = kv.get(&key).await.expect("get failed");
    assert_eq!(value.as_deref(), Some(&b"second"[..]), "set did not overwrite");
    kv.delete(&key).await.expect("delete failed");
}

pub async fn get_expired_key<K: KvStore + ?Sized>(kv: &K) {
    let key = key("expired");
    kv.set(&key, Utc::now() - Duration::seconds(1), b"stale")
        .await
        .expect("set failed");

    let value = kv.get(&key).await.expect("get failed");
    assert!(value.is_none(), "expired key returned a value");
    kv.delete(&key).await.expect("delete failed");
}

/// Expired items are collected and live ones are kept.
pub async fn run_gc_suite<K: KvStore + GarbageCollect + ?Sized>(kv: &K) {
    let expired = key("gc-expired");
    let valid = key("gc-valid");

    kv.set(&expired, Utc::now() - Duration::seconds(1), b"old")
        .await
        .expect("set failed");
    kv.set(&valid, Utc::now() + Duration::hours(1), b"new")
        .await
        .expect("set failed");

    let deleted = kv.gc().await.expect("gc failed");
    assert!(deleted >= 1, "gc reported {deleted} deletions");

    assert!(kv.get(&expired).await.expect("get failed").is_none());
    assert_eq!(
        kv.get(&valid).await.expect("get failed").as_deref(),
        Some(&b"new"[..]),
        "gc removed a live item"
    );
    kv.delete(&valid).await.expect("delete failed");
}
