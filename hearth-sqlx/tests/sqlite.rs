//! SqlKv against an in-memory SQLite database.

use async_trait::async_trait;
use bytes::Bytes;
use hearth_session::store::{GarbageCollect, KvStore, hash_session_id};
use hearth_session::{
    BoxError, GcTask, Handler, ResponseWriter, Session, SessionConfig, SessionManager,
};
use hearth_sqlx::{Dialect, SqlKv, SqlKvError};
use hearth_testing::{TestClient, assert_body, assert_status, kv_compliance};
use http::{Request, StatusCode};
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use std::sync::Arc;
use std::time::Duration;

async fn sqlite() -> SqlKv {
    install_default_drivers();
    // each in-memory connection is its own database
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let kv = SqlKv::new(pool, Dialect::Sqlite);
    kv.create_table().await.unwrap();
    kv
}

#[tokio::test]
async fn test_compliance() {
    let kv = sqlite().await;
    kv_compliance::run_compliance_suite(&kv).await;
}

#[tokio::test]
async fn test_gc_compliance() {
    let kv = sqlite().await;
    kv_compliance::run_gc_suite(&kv).await;
}

#[tokio::test]
async fn test_create_table_is_idempotent() {
    let kv = sqlite().await;
    kv.create_table().await.unwrap();
    kv.create_table().await.unwrap();
}

#[tokio::test]
async fn test_custom_table_name() {
    let kv = sqlite().await.with_table_name("app_sessions").unwrap();
    assert_eq!(kv.table_name(), "app_sessions");
    kv.create_table().await.unwrap();
    kv_compliance::set_get_delete(&kv).await;
}

#[tokio::test]
async fn test_rejects_unsafe_table_name() {
    let result = sqlite().await.with_table_name("x; DROP TABLE web_sessions");
    assert!(matches!(result, Err(SqlKvError::InvalidTableName(_))));
}

#[tokio::test]
async fn test_missing_table_is_backend_error() {
    let kv = sqlite().await.with_table_name("not_created").unwrap();
    let err = kv.get("k").await.unwrap_err();
    assert!(matches!(err, hearth_session::SessionError::Backend(_)));
}

struct Cart;

#[async_trait]
impl Handler for Cart {
    async fn handle(
        &self,
        req: Request<Bytes>,
        session: Session,
        res: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        if req.uri().path() == "/add" {
            let items = session.get_as::<i64>("items").unwrap_or(0) + 1;
            session.set("items", items);
        }
        let items = session.get_as::<i64>("items").unwrap_or(0);
        res.write(items.to_string().as_bytes()).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_sessions_persist_in_sql() {
    let kv = Arc::new(sqlite().await);
    let manager = SessionManager::kv(kv.clone(), SessionConfig::default()).unwrap();
    let client = TestClient::new(manager.wrap(Cart));

    client.get("/add").await;
    let response = client.get("/add").await;
    assert_status(&response, StatusCode::OK);
    assert_body(&response, "2");

    let token = client.cookie("__Host-session-id").unwrap();
    assert!(kv.get(&hash_session_id(&token)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_gc_task_over_sql() {
    let kv = Arc::new(sqlite().await);
    kv.set(
        "expired",
        chrono::Utc::now() - chrono::Duration::seconds(5),
        b"old",
    )
    .await
    .unwrap();

    let task = GcTask::spawn(kv.clone(), Duration::from_millis(100)).unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    task.shutdown().await;

    assert_eq!(kv.gc().await.unwrap(), 0);
}
