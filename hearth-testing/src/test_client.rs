// Test HTTP client with a cookie jar

use bytes::Bytes;
use hearth_session::{Handler, SessionService};
use http::header::{COOKIE, HeaderValue, SET_COOKIE};
use http::{Method, Request, Response, StatusCode};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// In-process client for a wrapped handler.
///
/// Cookies set by responses are kept in a jar and sent with later requests,
/// the way a browser would. [`TestClient::fork`] copies the jar so two
/// "browsers" can diverge.
pub struct TestClient<H> {
    service: SessionService<H>,
    jar: Mutex<BTreeMap<String, String>>,
}

impl<H: Handler> TestClient<H> {
    /// Create a new test client with an empty jar
    pub fn new(service: SessionService<H>) -> Self {
        Self {
            service,
            jar: Mutex::new(BTreeMap::new()),
        }
    }

    /// A second client for the same service, starting from a copy of this
    /// client's cookies.
    pub fn fork(&self) -> Self {
        Self {
            service: self.service.clone(),
            jar: Mutex::new(self.jar.lock().clone()),
        }
    }

    /// Current value of a cookie in the jar
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar.lock().get(name).cloned()
    }

    /// Put a cookie in the jar by hand
    pub fn set_cookie(&self, name: impl Into<String>, value: impl Into<String>) {
        self.jar.lock().insert(name.into(), value.into());
    }

    pub fn clear_cookies(&self) {
        self.jar.lock().clear();
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, Bytes::new()).await
    }

    /// Make a POST request
    pub async fn post(&self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.request(Method::POST, path, body.into()).await
    }

    /// Make a request with custom method
    pub async fn request(&self, method: Method, path: &str, body: Bytes) -> TestResponse {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(body)
            .unwrap_or_else(|e| panic!("invalid test request for {path}: {e}"));
        self.send(req).await
    }

    /// Send a prepared request, adding the jar's cookies.
    pub async fn send(&self, mut req: Request<Bytes>) -> TestResponse {
        let header = self.cookie_header();
        if !header.is_empty() {
            let value = HeaderValue::from_str(&header)
                .unwrap_or_else(|e| panic!("cookie jar holds an invalid value: {e}"));
            req.headers_mut().insert(COOKIE, value);
        }

        let response = self
            .service
            .call(req)
            .await
            .unwrap_or_else(|e| panic!("request failed: {e}"));
        self.absorb(&response);
        TestResponse { response }
    }

    fn cookie_header(&self) -> String {
        self.jar
            .lock()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn absorb(&self, response: &Response<Bytes>) {
        let mut jar = self.jar.lock();
        for header in response.headers().get_all(SET_COOKIE) {
            let Ok(header) = header.to_str() else {
                continue;
            };
            let mut parts = header.split(';').map(str::trim);
            let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
                continue;
            };
            let removed = parts.any(|attr| {
                attr.split_once('=').is_some_and(|(key, v)| {
                    key.eq_ignore_ascii_case("max-age") && v.parse::<i64>().is_ok_and(|n| n <= 0)
                })
            });

            if removed || value.is_empty() {
                jar.remove(name);
            } else {
                jar.insert(name.to_string(), value.to_string());
            }
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    response: Response<Bytes>,
}

impl TestResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn body(&self) -> &Bytes {
        self.response.body()
    }

    /// Get the response body as string
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(self.response.body()).into_owned()
    }

    /// Get the response body as JSON
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_slice(self.response.body())
            .map_err(|e| format!("Serialization error: {}", e))
    }

    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.response.headers().get(key).and_then(|v| v.to_str().ok())
    }

    /// All `Set-Cookie` headers
    pub fn set_cookies(&self) -> Vec<&str> {
        self.response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Number of `Set-Cookie` headers for the cookie `name`
    pub fn set_cookie_count(&self, name: &str) -> usize {
        self.set_cookies()
            .iter()
            .filter(|c| c.split_once('=').is_some_and(|(n, _)| n.trim() == name))
            .count()
    }

    pub fn into_inner(self) -> Response<Bytes> {
        self.response
    }
}
