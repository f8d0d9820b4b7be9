//! Write-ordering between session persistence and the response.
//!
//! Handlers write through a [`HookedWriter`]. The first head or body write
//! fires the request's [`Finalizer`], which persists the session and adds
//! its `Set-Cookie` header before anything is forwarded to the client.

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, LOCATION};
use http::{HeaderMap, Response, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

/// A response under construction.
///
/// Headers may be changed until the head is written. Writing body bytes
/// implies a `200 OK` head if none was written.
#[async_trait]
pub trait ResponseWriter: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn head_written(&self) -> bool;

    async fn write_head(&mut self, status: StatusCode) -> SessionResult<()>;

    async fn write(&mut self, chunk: &[u8]) -> SessionResult<()>;
}

/// Work to run once, right before the response starts.
#[async_trait]
pub trait FinalizeHook: Send + Sync {
    async fn finalize(&self, headers: &mut HeaderMap) -> SessionResult<()>;
}

/// Runs a [`FinalizeHook`] at most once.
pub struct Finalizer {
    fired: AtomicBool,
    hook: Box<dyn FinalizeHook>,
}

impl Finalizer {
    pub fn new(hook: impl FinalizeHook + 'static) -> Self {
        Self {
            fired: AtomicBool::new(false),
            hook: Box::new(hook),
        }
    }

    /// Run the hook if it has not run yet.
    ///
    /// Returns `None` when a previous call already ran it.
    pub async fn fire(&self, headers: &mut HeaderMap) -> Option<SessionResult<()>> {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(self.hook.finalize(headers).await)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// A [`ResponseWriter`] that fires a [`Finalizer`] before the first write.
///
/// If finalization fails the client receives `500 Internal Error` instead of
/// the handler's response, and every handler write returns
/// [`SessionError::Interrupted`].
pub struct HookedWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
    finalizer: Finalizer,
    interrupted: bool,
}

impl<'a> HookedWriter<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter, finalizer: Finalizer) -> Self {
        Self {
            inner,
            finalizer,
            interrupted: false,
        }
    }

    /// Whether finalization failed and the response was replaced by a 500.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn is_finalized(&self) -> bool {
        self.finalizer.has_fired()
    }

    async fn before_write(&mut self) -> SessionResult<()> {
        if self.interrupted {
            return Err(SessionError::Interrupted);
        }

        match self.finalizer.fire(self.inner.headers_mut()).await {
            None | Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                error!(error = %e, "error in session manager");
                self.interrupted = true;
                let headers = self.inner.headers_mut();
                drop_entity_headers(headers);
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                self.inner
                    .write_head(StatusCode::INTERNAL_SERVER_ERROR)
                    .await?;
                self.inner.write(b"Internal Error\n").await?;
                Err(SessionError::Interrupted)
            }
        }
    }

    /// Finalize if no write did, once the handler has returned.
    ///
    /// A finalization failure here is already answered with a 500, so only
    /// errors from the underlying writer are returned.
    pub async fn finish(mut self) -> SessionResult<()> {
        match self.before_write().await {
            Ok(()) | Err(SessionError::Interrupted) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<'a> ResponseWriter for HookedWriter<'a> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn head_written(&self) -> bool {
        self.inner.head_written()
    }

    async fn write_head(&mut self, status: StatusCode) -> SessionResult<()> {
        self.before_write().await?;
        self.inner.write_head(status).await
    }

    async fn write(&mut self, chunk: &[u8]) -> SessionResult<()> {
        self.before_write().await?;
        self.inner.write(chunk).await
    }
}

/// Remove headers that describe a body or redirect the handler meant to
/// send, before an error response replaces it.
pub(crate) fn drop_entity_headers(headers: &mut HeaderMap) {
    headers.remove(CONTENT_LENGTH);
    headers.remove(LOCATION);
}

/// Collects a whole response in memory.
#[derive(Debug)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    head_written: bool,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            head_written: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.body.freeze());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[async_trait]
impl ResponseWriter for BufferedResponse {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn head_written(&self) -> bool {
        self.head_written
    }

    async fn write_head(&mut self, status: StatusCode) -> SessionResult<()> {
        if self.head_written {
            debug!(status = %status, "Ignoring superfluous write_head");
            return Ok(());
        }
        self.status = status;
        self.head_written = true;
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> SessionResult<()> {
        if !self.head_written {
            self.write_head(StatusCode::OK).await?;
        }
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}
