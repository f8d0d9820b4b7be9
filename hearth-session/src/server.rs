//! Serving a [`SessionService`] over HTTP/1 with hyper.
//!
//! The handler runs in its own task and streams its response: the head is
//! forwarded as soon as it is written, which is also the moment the session
//! is persisted.

use crate::error::{SessionError, SessionResult};
use crate::hook::ResponseWriter;
use crate::manager::{Handler, SessionService};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

/// Body type of responses produced by [`serve_connection`].
pub type ResponseBody = BoxBody<Bytes, Infallible>;

type Head = (StatusCode, HeaderMap);

const BODY_CHANNEL_CAPACITY: usize = 16;

/// Accept connections on `listener` forever, serving each with `service`.
pub async fn serve<H: Handler>(listener: TcpListener, service: SessionService<H>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "Session server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service.clone();

        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, service).await {
                debug!(%peer, error = %err, "Error serving connection");
            }
        });
    }
}

/// Serve a single HTTP/1 connection.
pub async fn serve_connection<H: Handler>(
    stream: TcpStream,
    service: SessionService<H>,
) -> Result<(), hyper::Error> {
    let io = TokioIo::new(stream);
    let svc = service_fn(move |req: Request<Incoming>| {
        let service = service.clone();
        async move { dispatch(service, req).await }
    });

    http1::Builder::new().serve_connection(io, svc).await
}

async fn dispatch<H: Handler>(
    service: SessionService<H>,
    req: Request<Incoming>,
) -> Result<Response<ResponseBody>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let req = Request::from_parts(parts, body);

    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut writer = StreamingWriter::new(head_tx, body_tx);
        if let Err(e) = service.serve(req, &mut writer).await {
            error!(error = %e, "Failed to write response");
        }
        writer.close();
    });

    // A dropped sender means the handler task panicked before the head.
    let (status, headers) = head_rx
        .await
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new()));

    let mut response = Response::new(StreamBody::new(ReceiverStream::new(body_rx)).boxed());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Forwards the head over a oneshot and body chunks over a channel.
struct StreamingWriter {
    headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: mpsc::Sender<Result<Frame<Bytes>, Infallible>>,
}

impl StreamingWriter {
    fn new(
        head: oneshot::Sender<Head>,
        body: mpsc::Sender<Result<Frame<Bytes>, Infallible>>,
    ) -> Self {
        Self {
            headers: HeaderMap::new(),
            head: Some(head),
            body,
        }
    }

    fn send_head(&mut self, status: StatusCode) {
        if let Some(tx) = self.head.take() {
            let headers = std::mem::take(&mut self.headers);
            if tx.send((status, headers)).is_err() {
                debug!("Client went away before the response head");
            }
        }
    }

    /// Send a `200 OK` head if the handler never wrote one.
    fn close(mut self) {
        self.send_head(StatusCode::OK);
    }
}

#[async_trait]
impl ResponseWriter for StreamingWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn head_written(&self) -> bool {
        self.head.is_none()
    }

    async fn write_head(&mut self, status: StatusCode) -> SessionResult<()> {
        if self.head.is_none() {
            debug!(status = %status, "Ignoring superfluous write_head");
            return Ok(());
        }
        self.send_head(status);
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> SessionResult<()> {
        self.send_head(StatusCode::OK);
        self.body
            .send(Ok(Frame::data(Bytes::copy_from_slice(chunk))))
            .await
            .map_err(|_| {
                SessionError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "client disconnected",
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::AesGcmAead;
    use crate::config::{CookieOptions, SessionConfig};
    use crate::manager::{BoxError, SessionManager};
    use crate::session::Session;
    use http::header::{COOKIE, SET_COOKIE};
    use http_body_util::Empty;
    use hyper::client::conn::http1 as client;

    struct Greeter;

    #[async_trait]
    impl Handler for Greeter {
        async fn handle(
            &self,
            _req: Request<Bytes>,
            session: Session,
            res: &mut dyn ResponseWriter,
        ) -> Result<(), BoxError> {
            let visits = session.get_as::<i64>("visits").unwrap_or(0) + 1;
            session.set("visits", visits);
            res.write(format!("visit {visits}").as_bytes()).await?;
            res.write(b"!").await?;
            Ok(())
        }
    }

    async fn send(
        addr: std::net::SocketAddr,
        cookie: Option<&str>,
    ) -> (StatusCode, HeaderMap, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut sender, conn) = client::handshake(TokioIo::new(stream)).await.unwrap();
        tokio::spawn(conn);

        let mut req = Request::builder().uri("/").header("host", "localhost");
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }
        let res = sender
            .send_request(req.body(Empty::<Bytes>::new()).unwrap())
            .await
            .unwrap();

        let status = res.status();
        let headers = res.headers().clone();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_serves_sessions_over_tcp() {
        let manager = SessionManager::builder()
            .aead(AesGcmAead::new(&[9u8; 16]).unwrap())
            .cookie(CookieOptions::new("sid").insecure())
            .build()
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, manager.wrap(Greeter)));

        let (status, headers, body) = send(addr, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "visit 1!");
        let set_cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        let pair = set_cookie.split(';').next().unwrap().to_string();

        let (_, _, body) = send(addr, Some(&pair)).await;
        assert_eq!(body, "visit 2!");
    }

    struct Silent;

    #[async_trait]
    impl Handler for Silent {
        async fn handle(
            &self,
            _req: Request<Bytes>,
            session: Session,
            _res: &mut dyn ResponseWriter,
        ) -> Result<(), BoxError> {
            session.set("quiet", true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_without_writes_still_responds() {
        let manager = SessionManager::cookie(
            AesGcmAead::new(&[9u8; 32]).unwrap(),
            SessionConfig::default(),
        )
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, manager.wrap(Silent)));

        let (status, headers, body) = send(addr, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 1);
    }
}
