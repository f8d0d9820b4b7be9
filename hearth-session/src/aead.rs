//! Authenticated encryption for session payloads.
//!
//! [`AesGcmAead`] seals with a single primary key and opens with the primary
//! key followed by any number of legacy keys, so keys can be rotated without
//! logging every user out.

use crate::error::{SessionError, SessionResult};
use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use std::fmt;

/// Size of the random nonce prefixed to every ciphertext.
pub const NONCE_SIZE: usize = 12;

/// Authenticated encryption with associated data.
///
/// Implement this to plug in an external key-management system. The
/// associated data is authenticated but not encrypted; the cookie store binds
/// it to the cookie name so a value cannot be replayed under another cookie.
pub trait Aead: Send + Sync {
    /// Seal `plaintext`, returning a self-contained ciphertext.
    fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> SessionResult<Vec<u8>>;

    /// Open a ciphertext produced by [`Aead::encrypt`].
    fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> SessionResult<Vec<u8>>;
}

impl<T: Aead + ?Sized> Aead for std::sync::Arc<T> {
    fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> SessionResult<Vec<u8>> {
        (**self).encrypt(plaintext, associated_data)
    }

    fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> SessionResult<Vec<u8>> {
        (**self).decrypt(ciphertext, associated_data)
    }
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl Cipher {
    fn new(key: &[u8]) -> SessionResult<Self> {
        if key.iter().all(|&b| b == 0) {
            return Err(SessionError::InvalidKey("key must not be all zeros".into()));
        }

        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| Self::Aes128(Box::new(c)))
                .map_err(|e| SessionError::InvalidKey(e.to_string())),
            32 => Aes256Gcm::new_from_slice(key)
                .map(|c| Self::Aes256(Box::new(c)))
                .map_err(|e| SessionError::InvalidKey(e.to_string())),
            n => Err(SessionError::InvalidKey(format!(
                "key must be 16 or 32 bytes, got {}",
                n
            ))),
        }
    }

    fn seal(&self, nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg, aad };
        match self {
            Self::Aes128(c) => c.encrypt(nonce, payload),
            Self::Aes256(c) => c.encrypt(nonce, payload),
        }
    }

    fn open(&self, nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg, aad };
        match self {
            Self::Aes128(c) => c.decrypt(nonce, payload),
            Self::Aes256(c) => c.decrypt(nonce, payload),
        }
    }

    fn bits(&self) -> usize {
        match self {
            Self::Aes128(_) => 128,
            Self::Aes256(_) => 256,
        }
    }
}

/// AES-GCM engine with one primary key and ordered legacy keys.
///
/// # Examples
///
/// ```
/// use hearth_session::aead::{Aead, AesGcmAead};
///
/// let old = AesGcmAead::new(&[7u8; 32]).unwrap();
/// let sealed = old.encrypt(b"payload", b"cookie").unwrap();
///
/// let rotated = old.rotate(&[9u8; 32]).unwrap();
/// assert_eq!(rotated.decrypt(&sealed, b"cookie").unwrap(), b"payload");
/// ```
pub struct AesGcmAead {
    primary: Cipher,
    legacy: Vec<Cipher>,
}

impl AesGcmAead {
    /// Create an engine from a 16- or 32-byte primary key.
    pub fn new(key: &[u8]) -> SessionResult<Self> {
        Ok(Self {
            primary: Cipher::new(key)?,
            legacy: Vec::new(),
        })
    }

    /// Create an engine that can still open values sealed with `legacy` keys.
    ///
    /// Legacy keys are tried in the order given, after the primary key.
    pub fn with_legacy_keys<K: AsRef<[u8]>>(key: &[u8], legacy: &[K]) -> SessionResult<Self> {
        let legacy = legacy
            .iter()
            .map(|k| Cipher::new(k.as_ref()))
            .collect::<SessionResult<Vec<_>>>()?;
        Ok(Self {
            primary: Cipher::new(key)?,
            legacy,
        })
    }

    /// Make `new_key` the primary key and demote the current primary to the
    /// front of the legacy list.
    pub fn rotate(self, new_key: &[u8]) -> SessionResult<Self> {
        let primary = Cipher::new(new_key)?;
        let mut legacy = Vec::with_capacity(self.legacy.len() + 1);
        legacy.push(self.primary);
        legacy.extend(self.legacy);
        Ok(Self { primary, legacy })
    }

    /// Generate a random 256-bit key.
    pub fn generate_key() -> Vec<u8> {
        rand::random::<[u8; 32]>().to_vec()
    }

    /// Number of decrypt-only keys.
    pub fn legacy_key_count(&self) -> usize {
        self.legacy.len()
    }
}

impl Aead for AesGcmAead {
    fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> SessionResult<Vec<u8>> {
        let nonce = rand::random::<[u8; NONCE_SIZE]>();
        let sealed = self
            .primary
            .seal(&nonce, plaintext, associated_data)
            .map_err(|e| SessionError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> SessionResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(SessionError::Decryption);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

        std::iter::once(&self.primary)
            .chain(self.legacy.iter())
            .find_map(|cipher| cipher.open(nonce, sealed, associated_data).ok())
            .ok_or(SessionError::Decryption)
    }
}

impl fmt::Debug for AesGcmAead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmAead")
            .field("primary_bits", &self.primary.bits())
            .field("legacy_keys", &self.legacy.len())
            .finish_non_exhaustive()
    }
}
