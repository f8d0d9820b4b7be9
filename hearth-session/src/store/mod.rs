//! Storage backends.
//!
//! A [`SessionStore`] turns serialized session bytes into something that
//! survives until the next request: either the cookie itself
//! ([`CookieStore`]) or an external key-value store referenced by an opaque
//! cookie token ([`KvSessionStore`]).

mod cookie;
mod gc;
mod kv;
mod memory;

pub use cookie::{CookieStore, MAGIC_COMPRESSED, MAGIC_UNCOMPRESSED, MAX_COOKIE_SIZE};
pub use gc::GcTask;
pub use kv::{GarbageCollect, KvSessionStore, KvStore, generate_session_id, hash_session_id};
pub use memory::MemoryKv;

use crate::config::CookieOptions;
use crate::cookie::{render, render_removal, replace_set_cookie};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::header::HeaderValue;

/// The session cookie received with a request.
#[derive(Debug, Clone, Copy)]
pub struct IncomingCookie<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// Per-request cookie channel used while persisting a session.
///
/// Holds the request's session identity (the KV token; unused by the cookie
/// store) and writes `Set-Cookie` headers into the outgoing response. Writing
/// a cookie replaces any earlier `Set-Cookie` for the same name.
pub struct Transport<'a> {
    options: &'a CookieOptions,
    identity: Option<String>,
    headers: &'a mut HeaderMap,
}

impl<'a> Transport<'a> {
    pub fn new(
        options: &'a CookieOptions,
        identity: Option<String>,
        headers: &'a mut HeaderMap,
    ) -> Self {
        Self {
            options,
            identity,
            headers,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &CookieOptions {
        self.options
    }

    /// Identity carried by this request, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: impl Into<String>) {
        self.identity = Some(identity.into());
    }

    pub fn clear_identity(&mut self) {
        self.identity = None;
    }

    /// Emit the session cookie.
    pub fn set_cookie(&mut self, value: &str, expires_at: DateTime<Utc>) -> SessionResult<()> {
        let rendered = render(self.options, value, expires_at);
        let header = HeaderValue::from_str(&rendered)
            .map_err(|e| SessionError::InvalidCookie(e.to_string()))?;
        replace_set_cookie(self.headers, &self.options.name, header);
        Ok(())
    }

    /// Emit a cookie that removes the session cookie from the client.
    pub fn remove_cookie(&mut self) -> SessionResult<()> {
        let rendered = render_removal(self.options);
        let header = HeaderValue::from_str(&rendered)
            .map_err(|e| SessionError::InvalidCookie(e.to_string()))?;
        replace_set_cookie(self.headers, &self.options.name, header);
        Ok(())
    }
}

/// Storage backend contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Cookie name used when the configuration does not set one.
    fn default_cookie_name(&self) -> &'static str;

    /// Load the session bytes referenced by `cookie`.
    ///
    /// `Ok(None)` means there is no live session for this cookie.
    async fn load(&self, cookie: IncomingCookie<'_>) -> SessionResult<Option<Vec<u8>>>;

    /// Persist `data` until `expires_at` and emit the identity cookie.
    async fn store(
        &self,
        transport: &mut Transport<'_>,
        expires_at: DateTime<Utc>,
        data: &[u8],
    ) -> SessionResult<()>;

    /// Remove persisted state and emit a removal cookie.
    async fn delete(&self, transport: &mut Transport<'_>) -> SessionResult<()>;
}
