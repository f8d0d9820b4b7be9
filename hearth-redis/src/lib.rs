//! Redis session storage for hearth.
//!
//! [`RedisKv`] implements [`hearth_session::KvStore`]. Items carry a Redis
//! TTL, so expired sessions disappear without a garbage collector.
//!
//! ```no_run
//! use hearth_redis::{RedisKv, RedisKvConfig};
//! use hearth_session::{SessionConfig, SessionManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisKvConfig::new("redis://localhost:6379")?.with_namespace("myapp:session");
//! let kv = RedisKv::new(config).await?;
//! let manager = SessionManager::kv(kv, SessionConfig::default())?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_session::store::KvStore;
use hearth_session::{SessionError, SessionResult};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::debug;

/// Default key prefix.
pub const DEFAULT_NAMESPACE: &str = "session";

/// Result type for Redis store setup.
pub type RedisKvResult<T> = Result<T, RedisKvError>;

/// Redis store errors.
#[derive(Debug, Error)]
pub enum RedisKvError {
    /// Redis-specific error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<RedisKvError> for SessionError {
    fn from(e: RedisKvError) -> Self {
        SessionError::Backend(e.to_string())
    }
}

fn backend(e: redis::RedisError) -> SessionError {
    RedisKvError::from(e).into()
}

/// Connection settings for [`RedisKv`].
#[derive(Debug, Clone)]
pub struct RedisKvConfig {
    pub url: String,
    /// Prefix joined to every key with `:`
    pub namespace: String,
}

impl RedisKvConfig {
    pub fn new(url: &str) -> RedisKvResult<Self> {
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(RedisKvError::InvalidUrl(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(Self {
            url: url.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        })
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Build the Redis key for a store key.
    pub fn key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }
}

/// A [`KvStore`] in Redis.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    config: RedisKvConfig,
}

impl RedisKv {
    pub async fn new(config: RedisKvConfig) -> RedisKvResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        debug!(namespace = %config.namespace, "Connected to Redis session store");
        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &RedisKvConfig {
        &self.config
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(self.config.key(key)).await.map_err(backend)
    }

    async fn set(&self, key: &str, expires_at: DateTime<Utc>, value: &[u8]) -> SessionResult<()> {
        let key = self.config.key(key);
        let mut conn = self.conn.clone();

        // Redis rejects non-positive TTLs; an already expired item is a delete.
        let remaining = (expires_at - Utc::now()).num_milliseconds();
        if remaining <= 0 {
            let _: () = conn.del(&key).await.map_err(backend)?;
            return Ok(());
        }

        let _: () = conn
            .pset_ex(&key, value, remaining as u64)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.config.key(key)).await.map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(RedisKvConfig::new("redis://localhost:6379").is_ok());
        assert!(RedisKvConfig::new("rediss://cache.internal:6380/1").is_ok());
        assert!(matches!(
            RedisKvConfig::new("http://localhost:6379"),
            Err(RedisKvError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_key_namespacing() {
        let config = RedisKvConfig::new("redis://localhost").unwrap();
        assert_eq!(config.key("abc"), "session:abc");

        let config = config.with_namespace("app:sess");
        assert_eq!(config.key("abc"), "app:sess:abc");

        let config = config.with_namespace("");
        assert_eq!(config.key("abc"), "abc");
    }

    #[test]
    fn test_errors_map_to_backend() {
        let err: SessionError = RedisKvError::InvalidUrl("nope".into()).into();
        assert!(matches!(err, SessionError::Backend(msg) if msg.contains("nope")));
    }
}
