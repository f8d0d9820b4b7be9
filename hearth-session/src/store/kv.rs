//! Key-value session storage.

use super::{IncomingCookie, SessionStore, Transport};
use crate::aead::Aead;
use crate::config::DEFAULT_KV_COOKIE_NAME;
use crate::error::SessionResult;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// A store of expiring byte values.
///
/// Implementations must not return items whose expiry has passed, even if
/// they have not been garbage collected yet.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Insert or replace a value.
    async fn set(&self, key: &str, expires_at: DateTime<Utc>, value: &[u8]) -> SessionResult<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> SessionResult<()>;
}

/// Stores that need explicit removal of expired items.
#[async_trait]
pub trait GarbageCollect: Send + Sync {
    /// Remove expired items, returning how many were deleted.
    async fn gc(&self) -> SessionResult<u64>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, expires_at: DateTime<Utc>, value: &[u8]) -> SessionResult<()> {
        (**self).set(key, expires_at, value).await
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        (**self).delete(key).await
    }
}

#[async_trait]
impl<T: GarbageCollect + ?Sized> GarbageCollect for Arc<T> {
    async fn gc(&self) -> SessionResult<u64> {
        (**self).gc().await
    }
}

/// Generate a new random session token (256 bits, base64url).
pub fn generate_session_id() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// Storage key for a session token: hex-encoded SHA-256.
///
/// Only the hash reaches the store, so a leaked table does not leak live
/// session cookies.
pub fn hash_session_id(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

/// Session storage in a [`KvStore`], referenced by a random cookie token.
pub struct KvSessionStore<K> {
    kv: K,
    aead: Option<Arc<dyn Aead>>,
}

impl<K: KvStore> KvSessionStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv, aead: None }
    }

    /// Encrypt payloads at rest with `aead`.
    pub fn with_encryption(mut self, aead: impl Aead + 'static) -> Self {
        self.aead = Some(Arc::new(aead));
        self
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }
}

#[async_trait]
impl<K: KvStore> SessionStore for KvSessionStore<K> {
    fn default_cookie_name(&self) -> &'static str {
        DEFAULT_KV_COOKIE_NAME
    }

    async fn load(&self, cookie: IncomingCookie<'_>) -> SessionResult<Option<Vec<u8>>> {
        if cookie.value.is_empty() {
            return Ok(None);
        }
        let Some(data) = self.kv.get(&hash_session_id(cookie.value)).await? else {
            return Ok(None);
        };
        match &self.aead {
            Some(aead) => aead.decrypt(&data, b"").map(Some),
            None => Ok(Some(data)),
        }
    }

    async fn store(
        &self,
        transport: &mut Transport<'_>,
        expires_at: DateTime<Utc>,
        data: &[u8],
    ) -> SessionResult<()> {
        let id = match transport.identity() {
            Some(id) => id.to_string(),
            None => {
                let id = generate_session_id();
                transport.set_identity(id.clone());
                id
            }
        };

        let sealed;
        let value = match &self.aead {
            Some(aead) => {
                sealed = aead.encrypt(data, b"")?;
                &sealed[..]
            }
            None => data,
        };

        self.kv.set(&hash_session_id(&id), expires_at, value).await?;
        transport.set_cookie(&id, expires_at)
    }

    async fn delete(&self, transport: &mut Transport<'_>) -> SessionResult<()> {
        if let Some(id) = transport.identity() {
            self.kv.delete(&hash_session_id(id)).await?;
        }
        // A later store in the same request must not reuse the old token.
        transport.clear_identity();
        transport.remove_cookie()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::AesGcmAead;
    use crate::config::CookieOptions;
    use crate::store::MemoryKv;
    use chrono::Duration;
    use http::HeaderMap;
    use http::header::SET_COOKIE;

    fn cookie_value(headers: &HeaderMap) -> String {
        let raw = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        let pair = raw.split(';').next().unwrap();
        pair.split_once('=').unwrap().1.to_string()
    }

    #[test]
    fn test_session_id_generation() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_hash_session_id() {
        let hashed = hash_session_id("token");
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, hash_session_id("token"));
        assert_ne!(hashed, hash_session_id("other"));
    }

    #[tokio::test]
    async fn test_store_load_delete() {
        let kv = Arc::new(MemoryKv::new());
        let store = KvSessionStore::new(kv.clone());
        let options = CookieOptions::new(DEFAULT_KV_COOKIE_NAME);
        let mut headers = HeaderMap::new();

        let mut transport = Transport::new(&options, None, &mut headers);
        store
            .store(&mut transport, Utc::now() + Duration::hours(1), b"data")
            .await
            .unwrap();
        let token = cookie_value(&headers);

        // the raw token never reaches the store
        assert!(kv.get(&token).await.unwrap().is_none());
        assert_eq!(
            kv.get(&hash_session_id(&token)).await.unwrap().as_deref(),
            Some(&b"data"[..])
        );

        let cookie = IncomingCookie {
            name: DEFAULT_KV_COOKIE_NAME,
            value: &token,
        };
        assert_eq!(
            store.load(cookie).await.unwrap().as_deref(),
            Some(&b"data"[..])
        );

        let mut transport = Transport::new(&options, Some(token.clone()), &mut headers);
        store.delete(&mut transport).await.unwrap();
        assert!(store.load(cookie).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existing_identity_is_reused() {
        let store = KvSessionStore::new(MemoryKv::new());
        let options = CookieOptions::new("sid");
        let mut headers = HeaderMap::new();

        let mut transport = Transport::new(&options, Some("fixed".into()), &mut headers);
        store
            .store(&mut transport, Utc::now() + Duration::hours(1), b"v1")
            .await
            .unwrap();
        assert_eq!(cookie_value(&headers), "fixed");
    }

    #[tokio::test]
    async fn test_delete_then_store_rotates_identity() {
        let store = KvSessionStore::new(MemoryKv::new());
        let options = CookieOptions::new("sid");
        let mut headers = HeaderMap::new();

        let mut transport = Transport::new(&options, Some("old".into()), &mut headers);
        store.delete(&mut transport).await.unwrap();
        store
            .store(&mut transport, Utc::now() + Duration::hours(1), b"kept")
            .await
            .unwrap();

        let token = cookie_value(&headers);
        assert_ne!(token, "old");
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_encryption_at_rest() {
        let kv = Arc::new(MemoryKv::new());
        let store =
            KvSessionStore::new(kv.clone()).with_encryption(AesGcmAead::new(&[9u8; 32]).unwrap());
        let options = CookieOptions::new("sid");
        let mut headers = HeaderMap::new();

        let mut transport = Transport::new(&options, None, &mut headers);
        store
            .store(&mut transport, Utc::now() + Duration::hours(1), b"secret")
            .await
            .unwrap();
        let token = cookie_value(&headers);

        let raw = kv.get(&hash_session_id(&token)).await.unwrap().unwrap();
        assert_ne!(raw, b"secret");

        let cookie = IncomingCookie {
            name: "sid",
            value: &token,
        };
        assert_eq!(
            store.load(cookie).await.unwrap().as_deref(),
            Some(&b"secret"[..])
        );
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let store = KvSessionStore::new(MemoryKv::new());
        let cookie = IncomingCookie {
            name: "sid",
            value: "nope",
        };
        assert!(store.load(cookie).await.unwrap().is_none());
    }
}
