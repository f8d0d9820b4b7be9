//! Cookie-resident session storage.

use super::{IncomingCookie, SessionStore, Transport};
use crate::aead::Aead;
use crate::compression::CompressorPool;
use crate::config::{CompressionOptions, DEFAULT_COOKIE_NAME};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Marker for an uncompressed cookie payload.
pub const MAGIC_UNCOMPRESSED: &str = "EU1";

/// Marker for a zlib-compressed cookie payload.
pub const MAGIC_COMPRESSED: &str = "EC1";

/// Largest cookie value the store will emit.
pub const MAX_COOKIE_SIZE: usize = 4096;

const EXPIRY_SIZE: usize = 8;

/// Stores the whole session inside an encrypted cookie.
///
/// The cookie value is `<magic>.<base64url(ciphertext)>`, where the
/// plaintext is the little-endian unix expiry followed by the session
/// payload, compressed first when it crosses the compression threshold. The
/// cookie name is bound as associated data.
pub struct CookieStore {
    aead: Arc<dyn Aead>,
    compression: CompressionOptions,
    pool: CompressorPool,
}

impl CookieStore {
    pub fn new(aead: impl Aead + 'static) -> Self {
        Self::from_arc(Arc::new(aead))
    }

    pub fn from_arc(aead: Arc<dyn Aead>) -> Self {
        let compression = CompressionOptions::default();
        Self {
            aead,
            pool: CompressorPool::new(compression.max_decompressed_size),
            compression,
        }
    }

    pub fn with_compression(mut self, compression: CompressionOptions) -> Self {
        self.pool = CompressorPool::new(compression.max_decompressed_size);
        self.compression = compression;
        self
    }

    /// Encode `data` into a cookie value for cookie `name`.
    pub fn seal(&self, name: &str, expires_at: DateTime<Utc>, data: &[u8]) -> SessionResult<String> {
        let mut framed = Vec::with_capacity(EXPIRY_SIZE + data.len());
        framed.extend_from_slice(&(expires_at.timestamp().max(0) as u64).to_le_bytes());
        framed.extend_from_slice(data);

        let (magic, plaintext) = if self.compression.should_compress(framed.len()) {
            (MAGIC_COMPRESSED, self.pool.compress(&framed)?)
        } else {
            (MAGIC_UNCOMPRESSED, framed)
        };

        let ciphertext = self.aead.encrypt(&plaintext, name.as_bytes())?;
        let value = format!("{}.{}", magic, URL_SAFE_NO_PAD.encode(ciphertext));

        if value.len() > MAX_COOKIE_SIZE {
            return Err(SessionError::CookieTooLarge {
                size: value.len(),
                max: MAX_COOKIE_SIZE,
            });
        }
        Ok(value)
    }

    /// Decode a cookie value produced by [`CookieStore::seal`].
    pub fn open(&self, name: &str, value: &str) -> SessionResult<Vec<u8>> {
        let (magic, encoded) = value.split_once('.').ok_or_else(|| {
            SessionError::InvalidCookie("cookie does not contain two . separated parts".into())
        })?;
        if magic != MAGIC_UNCOMPRESSED && magic != MAGIC_COMPRESSED {
            return Err(SessionError::InvalidCookie(format!(
                "bad magic prefix: {}",
                magic
            )));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| SessionError::InvalidCookie(e.to_string()))?;

        let plaintext = self.aead.decrypt(&ciphertext, name.as_bytes())?;
        let framed = if magic == MAGIC_COMPRESSED {
            self.pool.decompress(&plaintext)?
        } else {
            plaintext
        };

        if framed.len() < EXPIRY_SIZE {
            return Err(SessionError::InvalidCookie("payload too short".into()));
        }
        let (expiry, data) = framed.split_at(EXPIRY_SIZE);
        let mut secs = [0u8; EXPIRY_SIZE];
        secs.copy_from_slice(expiry);
        let secs = i64::try_from(u64::from_le_bytes(secs))
            .map_err(|_| SessionError::InvalidCookie("expiry out of range".into()))?;
        let expires_at = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| SessionError::InvalidCookie("expiry out of range".into()))?;

        if expires_at < Utc::now() {
            return Err(SessionError::Expired(expires_at));
        }
        Ok(data.to_vec())
    }
}

#[async_trait]
impl SessionStore for CookieStore {
    fn default_cookie_name(&self) -> &'static str {
        DEFAULT_COOKIE_NAME
    }

    async fn load(&self, cookie: IncomingCookie<'_>) -> SessionResult<Option<Vec<u8>>> {
        self.open(cookie.name, cookie.value).map(Some)
    }

    async fn store(
        &self,
        transport: &mut Transport<'_>,
        expires_at: DateTime<Utc>,
        data: &[u8],
    ) -> SessionResult<()> {
        let value = self.seal(transport.cookie_name(), expires_at, data)?;
        transport.set_cookie(&value, expires_at)
    }

    async fn delete(&self, transport: &mut Transport<'_>) -> SessionResult<()> {
        transport.remove_cookie()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::AesGcmAead;
    use crate::config::CookieOptions;
    use chrono::Duration;
    use http::HeaderMap;
    use http::header::SET_COOKIE;

    fn store() -> CookieStore {
        CookieStore::new(AesGcmAead::new(&[4u8; 32]).unwrap())
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[test]
    fn test_seal_open() {
        let store = store();
        let value = store.seal("sid", later(), b"payload").unwrap();
        assert!(value.starts_with("EU1."));
        assert_eq!(store.open("sid", &value).unwrap(), b"payload");
    }

    #[test]
    fn test_name_is_bound() {
        let store = store();
        let value = store.seal("sid", later(), b"payload").unwrap();
        assert!(matches!(
            store.open("other", &value),
            Err(SessionError::Decryption)
        ));
    }

    #[test]
    fn test_compression_threshold() {
        let store = store();
        // framed length = 8-byte expiry + payload
        let below = vec![b'a'; 512 - EXPIRY_SIZE - 1];
        let above = vec![b'a'; 512 - EXPIRY_SIZE + 1];

        let plain = store.seal("sid", later(), &below).unwrap();
        let compressed = store.seal("sid", later(), &above).unwrap();

        assert!(plain.starts_with("EU1."));
        assert!(compressed.starts_with("EC1."));
        assert_eq!(store.open("sid", &plain).unwrap(), below);
        assert_eq!(store.open("sid", &compressed).unwrap(), above);
    }

    #[test]
    fn test_compression_disabled() {
        let store = store().with_compression(CompressionOptions::disabled());
        let value = store.seal("sid", later(), &[b'a'; 2000]).unwrap();
        assert!(value.starts_with("EU1."));
    }

    #[test]
    fn test_expired_payload_rejected() {
        let store = store();
        let value = store
            .seal("sid", Utc::now() - Duration::seconds(5), b"old")
            .unwrap();
        assert!(matches!(
            store.open("sid", &value),
            Err(SessionError::Expired(_))
        ));
    }

    #[test]
    fn test_oversized_cookie() {
        let store = store().with_compression(CompressionOptions::disabled());
        let data: Vec<u8> = (0..4000).map(|i| (i * 7 % 251) as u8).collect();
        assert!(matches!(
            store.seal("sid", later(), &data),
            Err(SessionError::CookieTooLarge { max: 4096, .. })
        ));
    }

    #[test]
    fn test_malformed_values() {
        let store = store();
        assert!(matches!(
            store.open("sid", "no-dot"),
            Err(SessionError::InvalidCookie(_))
        ));
        assert!(matches!(
            store.open("sid", "XX1.abcd"),
            Err(SessionError::InvalidCookie(_))
        ));
        assert!(matches!(
            store.open("sid", "EU1.!!!"),
            Err(SessionError::InvalidCookie(_))
        ));
    }

    #[test]
    fn test_flipped_byte() {
        let store = store();
        let value = store.seal("sid", later(), b"payload").unwrap();
        let (magic, encoded) = value.split_once('.').unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(encoded).unwrap();
        raw[20] ^= 0x80;
        let tampered = format!("{}.{}", magic, URL_SAFE_NO_PAD.encode(raw));
        assert!(store.open("sid", &tampered).is_err());
    }

    #[tokio::test]
    async fn test_store_and_delete_cookies() {
        let store = store();
        let options = CookieOptions::new("sid");
        let mut headers = HeaderMap::new();

        let mut transport = Transport::new(&options, None, &mut headers);
        store.store(&mut transport, later(), b"data").await.unwrap();
        let value = headers
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let cookie_value = value
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("sid=")
            .to_string();

        let loaded = store
            .load(IncomingCookie {
                name: "sid",
                value: &cookie_value,
            })
            .await
            .unwrap();
        assert_eq!(loaded.as_deref(), Some(&b"data"[..]));

        let mut transport = Transport::new(&options, None, &mut headers);
        store.delete(&mut transport).await.unwrap();
        let values: Vec<_> = headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(values.len(), 1);
        assert!(values[0].to_str().unwrap().contains("Max-Age=0"));
    }
}
