//! Testing utilities for hearth sessions.
//!
//! ## Features
//!
//! - **TestClient** - in-process client with a cookie jar
//! - **Assertions** - response and cookie assertions
//! - **KV compliance** - the behaviour every `KvStore` must share
//!
//! ## Quick Start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use hearth_session::*;
//! use hearth_testing::*;
//! use http::Request;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn handle(
//!         &self,
//!         _req: Request<Bytes>,
//!         session: Session,
//!         res: &mut dyn ResponseWriter,
//!     ) -> Result<(), BoxError> {
//!         session.set("greeted", true);
//!         res.write(b"Hello!").await?;
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let manager = SessionManager::kv(MemoryKv::new(), SessionConfig::default()).unwrap();
//! let client = TestClient::new(manager.wrap(Hello));
//!
//! let response = client.get("/").await;
//! assert_body(&response, "Hello!");
//! assert_sets_cookie(&response, "__Host-session-id");
//! # });
//! ```
//!
//! ## Testing a KV backend
//!
//! ```no_run
//! use hearth_session::MemoryKv;
//! use hearth_testing::kv_compliance;
//!
//! # tokio_test::block_on(async {
//! let kv = MemoryKv::new();
//! kv_compliance::run_compliance_suite(&kv).await;
//! kv_compliance::run_gc_suite(&kv).await;
//! # });
//! ```

pub mod assertions;
pub mod kv_compliance;
pub mod test_client;

pub use assertions::*;
pub use hearth_session::SessionProbe;
pub use test_client::{TestClient, TestResponse};
