//! The session manager: load on request, persist before the response.

use crate::aead::Aead;
use crate::codec::{JsonCodec, SessionCodec, TypeRegistry};
use crate::config::{CompressionOptions, CookieOptions, SessionConfig};
use crate::cookie::{find_cookie, remove_set_cookie};
use crate::error::{SessionError, SessionResult};
use crate::expiry::ExpiryPolicy;
use crate::hook::{
    BufferedResponse, FinalizeHook, Finalizer, HookedWriter, ResponseWriter, drop_entity_headers,
};
use crate::record::SessionRecord;
use crate::session::{Intent, Session};
use crate::store::{CookieStore, IncomingCookie, KvSessionStore, KvStore, SessionStore, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Request, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Error type handlers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Transform applied to every record restored from storage.
pub type OnLoad = Arc<dyn Fn(&mut SessionRecord) + Send + Sync>;

/// A request handler that receives the request's session.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(
        &self,
        req: Request<Bytes>,
        session: Session,
        res: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(
        &self,
        req: Request<Bytes>,
        session: Session,
        res: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        (**self).handle(req, session, res).await
    }
}

/// Request extension recording which managers already loaded a session for
/// the request.
#[derive(Debug, Clone, Default)]
struct LoadedBy(Vec<usize>);

struct ManagerInner {
    store: Arc<dyn SessionStore>,
    codec: Arc<dyn SessionCodec>,
    expiry: ExpiryPolicy,
    cookie: CookieOptions,
    on_load: Option<OnLoad>,
}

/// Loads sessions for requests and persists them before the response.
///
/// # Examples
///
/// ```no_run
/// use hearth_session::{AesGcmAead, SessionConfig, SessionManager};
///
/// # fn example() -> Result<(), hearth_session::SessionError> {
/// let aead = AesGcmAead::new(&AesGcmAead::generate_key())?;
/// let manager = SessionManager::cookie(aead, SessionConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    /// A manager that keeps sessions in encrypted cookies.
    pub fn cookie(aead: impl Aead + 'static, config: SessionConfig) -> SessionResult<Self> {
        Self::builder().config(config).aead(aead).build()
    }

    /// A manager that keeps sessions in `kv`, referenced by a cookie token.
    pub fn kv<K: KvStore + 'static>(kv: K, config: SessionConfig) -> SessionResult<Self> {
        Self::builder().config(config).kv(kv).build()
    }

    pub fn cookie_options(&self) -> &CookieOptions {
        &self.inner.cookie
    }

    pub fn expiry(&self) -> &ExpiryPolicy {
        &self.inner.expiry
    }

    /// Wrap a handler so it receives a session and its response is
    /// finalized through this manager.
    pub fn wrap<H: Handler>(&self, handler: H) -> SessionService<H> {
        SessionService {
            manager: self.clone(),
            handler: Arc::new(handler),
        }
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Mark the request and load its session.
    ///
    /// # Panics
    ///
    /// Panics if this manager already loaded a session for `req`.
    async fn begin<B: Send>(&self, req: &mut Request<B>) -> (Session, Option<String>) {
        let id = self.id();
        let mut loaded_by = req
            .extensions_mut()
            .remove::<LoadedBy>()
            .unwrap_or_default();
        assert!(
            !loaded_by.0.contains(&id),
            "session manager applied twice to the same request"
        );
        loaded_by.0.push(id);
        req.extensions_mut().insert(loaded_by);

        let incoming =
            find_cookie(req.headers(), &self.inner.cookie.name).filter(|v| !v.is_empty());
        let Some(value) = incoming else {
            debug!("No session cookie, starting a new session");
            return (Session::new(SessionRecord::new(), None), None);
        };

        match self.restore(&value).await {
            Some(session) => (session, Some(value)),
            // never adopt an identity the store does not know
            None => (Session::new(SessionRecord::new(), None), None),
        }
    }

    async fn restore(&self, value: &str) -> Option<Session> {
        let inner = &self.inner;
        let cookie = IncomingCookie {
            name: &inner.cookie.name,
            value,
        };

        let bytes = match inner.store.load(cookie).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Session not found, starting a new session");
                return None;
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, cookie = %inner.cookie.name, "Discarding unreadable session cookie");
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to load session, starting a new session");
                return None;
            }
        };

        let mut record = match inner.codec.decode(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Failed to decode session, starting a new session");
                return None;
            }
        };
        if let Some(on_load) = &inner.on_load {
            on_load(&mut record);
        }

        let loaded = inner.expiry.has_idle_timeout().then_some(bytes);
        Some(Session::new(record, loaded))
    }

    /// Persist `session` according to its intent.
    async fn persist(
        &self,
        session: &Session,
        identity: Option<String>,
        headers: &mut HeaderMap,
    ) -> SessionResult<()> {
        let Some(snapshot) = session.finalize(Utc::now()) else {
            return Ok(());
        };
        let inner = &self.inner;
        let mut transport = Transport::new(&inner.cookie, identity, headers);

        match snapshot.intent {
            Intent::Delete => {
                debug!("Deleting session");
                inner.store.delete(&mut transport).await
            }
            Intent::Reset => {
                debug!("Resetting session identity");
                inner.store.delete(&mut transport).await?;
                self.save(&mut transport, &snapshot.record).await
            }
            Intent::Save => self.save(&mut transport, &snapshot.record).await,
            Intent::None => match snapshot.loaded {
                // Untouched restored session: refresh the idle timeout.
                Some(bytes) => {
                    let record = &snapshot.record;
                    let expires_at = inner.expiry.expires_at(record.created_at, record.updated_at);
                    debug!(%expires_at, "Refreshing session expiry");
                    inner.store.store(&mut transport, expires_at, &bytes).await
                }
                None => Ok(()),
            },
        }
    }

    async fn save(&self, transport: &mut Transport<'_>, record: &SessionRecord) -> SessionResult<()> {
        let inner = &self.inner;
        let data = inner.codec.encode(record)?;
        let expires_at = inner.expiry.expires_at(record.created_at, record.updated_at);
        debug!(%expires_at, size = data.len(), "Saving session");
        inner.store.store(transport, expires_at, &data).await
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie", &self.inner.cookie)
            .field("expiry", &self.inner.expiry)
            .finish_non_exhaustive()
    }
}

struct SessionFinalizer {
    manager: SessionManager,
    session: Session,
    identity: Option<String>,
}

#[async_trait]
impl FinalizeHook for SessionFinalizer {
    async fn finalize(&self, headers: &mut HeaderMap) -> SessionResult<()> {
        let result = self
            .manager
            .persist(&self.session, self.identity.clone(), headers)
            .await;
        if result.is_err() {
            // never ship a half-written session cookie
            remove_set_cookie(headers, &self.manager.inner.cookie.name);
        }
        result
    }
}

/// A handler wrapped by a [`SessionManager`].
pub struct SessionService<H> {
    manager: SessionManager,
    handler: Arc<H>,
}

impl<H> Clone for SessionService<H> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<H: Handler> SessionService<H> {
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Run the handler for `req`, writing the response to `res`.
    ///
    /// # Panics
    ///
    /// Panics if the same manager already wraps this request.
    pub async fn serve(&self, mut req: Request<Bytes>, res: &mut dyn ResponseWriter) -> SessionResult<()> {
        let (session, identity) = self.manager.begin(&mut req).await;
        let finalizer = Finalizer::new(SessionFinalizer {
            manager: self.manager.clone(),
            session: session.clone(),
            identity,
        });
        let mut writer = HookedWriter::new(res, finalizer);

        if let Err(e) = self.handler.handle(req, session, &mut writer).await {
            if writer.is_interrupted() {
                debug!(error = %e, "Handler stopped after session finalization failed");
            } else {
                error!(error = %e, "Handler failed");
                if !writer.head_written() {
                    drop_entity_headers(writer.headers_mut());
                    match writer.write_head(StatusCode::INTERNAL_SERVER_ERROR).await {
                        Ok(()) | Err(SessionError::Interrupted) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        writer.finish().await
    }

    /// Run the handler and collect the whole response.
    pub async fn call(&self, req: Request<Bytes>) -> SessionResult<Response<Bytes>> {
        let mut response = BufferedResponse::new();
        self.serve(req, &mut response).await?;
        Ok(response.into_response())
    }
}

enum StoreChoice {
    Cookie(Arc<dyn Aead>),
    Custom(Arc<dyn SessionStore>),
}

/// Builder for [`SessionManager`].
#[derive(Default)]
pub struct SessionManagerBuilder {
    config: SessionConfig,
    store: Option<StoreChoice>,
    codec: Option<Arc<dyn SessionCodec>>,
    on_load: Option<OnLoad>,
}

impl SessionManagerBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Store sessions in cookies encrypted with `aead`.
    pub fn aead(mut self, aead: impl Aead + 'static) -> Self {
        self.store = Some(StoreChoice::Cookie(Arc::new(aead)));
        self
    }

    /// Store sessions in `kv`.
    pub fn kv<K: KvStore + 'static>(self, kv: K) -> Self {
        self.store(KvSessionStore::new(kv))
    }

    /// Use a custom storage backend.
    pub fn store(mut self, store: impl SessionStore + 'static) -> Self {
        self.store = Some(StoreChoice::Custom(Arc::new(store)));
        self
    }

    pub fn codec(mut self, codec: impl SessionCodec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Use the JSON codec with `registry`.
    pub fn type_registry(self, registry: TypeRegistry) -> Self {
        self.codec(JsonCodec::with_registry(registry))
    }

    pub fn on_load(mut self, f: impl Fn(&mut SessionRecord) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(f));
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = Some(lifetime);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    pub fn without_idle_timeout(mut self) -> Self {
        self.config.idle_timeout = None;
        self
    }

    pub fn cookie(mut self, cookie: CookieOptions) -> Self {
        self.config.cookie = Some(cookie);
        self
    }

    pub fn compression(mut self, compression: CompressionOptions) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn build(self) -> SessionResult<SessionManager> {
        let expiry = self.config.expiry_policy()?;
        let store: Arc<dyn SessionStore> = match self.store {
            Some(StoreChoice::Cookie(aead)) => {
                Arc::new(CookieStore::from_arc(aead).with_compression(self.config.compression))
            }
            Some(StoreChoice::Custom(store)) => store,
            None => {
                return Err(SessionError::Config(
                    "a session store or AEAD must be configured".into(),
                ));
            }
        };
        let cookie = self.config.cookie_options(store.default_cookie_name())?;
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(JsonCodec::new()) as Arc<dyn SessionCodec>);

        Ok(SessionManager {
            inner: Arc::new(ManagerInner {
                store,
                codec,
                expiry,
                cookie,
                on_load: self.on_load,
            }),
        })
    }
}
