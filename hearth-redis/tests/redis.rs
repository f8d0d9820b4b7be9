//! RedisKv against a live server, selected with `REDIS_URL`.

use hearth_redis::{RedisKv, RedisKvConfig};
use hearth_testing::kv_compliance;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_compliance() {
    let config = RedisKvConfig::new(&redis_url())
        .unwrap()
        .with_namespace("hearth-test");
    let kv = RedisKv::new(config).await.unwrap();
    kv_compliance::run_compliance_suite(&kv).await;
}
