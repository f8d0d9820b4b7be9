//! Per-request HTTP session state.
//!
//! A [`SessionManager`] loads the session named by the request's cookie,
//! hands a [`Session`] to the handler and persists any change right before
//! the first byte of the response is written. Sessions live either in an
//! encrypted cookie ([`store::CookieStore`]) or in a key-value backend
//! referenced by a random token ([`store::KvSessionStore`]).
//!
//! # Features
//!
//! - AES-GCM sealed cookies with key rotation and optional compression
//! - Server-side sessions over any [`store::KvStore`], with periodic
//!   garbage collection
//! - Absolute and idle expiry
//! - Flash messages
//! - Session identity reset on privilege change
//!
//! # Examples
//!
//! ```no_run
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use hearth_session::*;
//! use http::Request;
//! use tokio::net::TcpListener;
//!
//! struct Counter;
//!
//! #[async_trait]
//! impl Handler for Counter {
//!     async fn handle(
//!         &self,
//!         _req: Request<Bytes>,
//!         session: Session,
//!         res: &mut dyn ResponseWriter,
//!     ) -> Result<(), BoxError> {
//!         let visits = session.get_as::<i64>("visits").unwrap_or(0) + 1;
//!         session.set("visits", visits);
//!         res.write(format!("{visits} visits").as_bytes()).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aead = AesGcmAead::new(&AesGcmAead::generate_key())?;
//!     let manager = SessionManager::cookie(aead, SessionConfig::default())?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:3000").await?;
//!     server::serve(listener, manager.wrap(Counter)).await?;
//!     Ok(())
//! }
//! ```

pub mod aead;
pub mod codec;
pub mod compression;
pub mod config;
pub mod cookie;
pub mod error;
pub mod expiry;
pub mod hook;
pub mod manager;
pub mod record;
pub mod server;
pub mod session;
pub mod store;
pub mod value;

pub use aead::{Aead, AesGcmAead};
pub use codec::{JsonCodec, SessionCodec, TypeRegistry};
pub use config::{CompressionOptions, CookieOptions, SessionConfig, SessionSettings};
pub use error::{SessionError, SessionResult};
pub use expiry::ExpiryPolicy;
pub use hook::{BufferedResponse, FinalizeHook, Finalizer, HookedWriter, ResponseWriter};
pub use manager::{BoxError, Handler, SessionManager, SessionManagerBuilder, SessionService};
pub use record::{FlashLevel, SessionRecord};
pub use session::Session;
pub use store::{
    CookieStore, GarbageCollect, GcTask, KvSessionStore, KvStore, MemoryKv, SessionStore,
};
pub use value::{SessionType, Value};

#[cfg(any(test, feature = "test-util"))]
pub use session::SessionProbe;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aead::{Aead, AesGcmAead};
    pub use crate::config::{CookieOptions, SessionConfig};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::hook::ResponseWriter;
    pub use crate::manager::{BoxError, Handler, SessionManager};
    pub use crate::session::Session;
    pub use crate::store::{GarbageCollect, GcTask, KvStore, MemoryKv};
    pub use crate::value::{SessionType, Value};
}
