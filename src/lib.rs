// Hearth - per-request HTTP session state for Rust
//
// Encrypted cookie sessions, server-side key-value sessions, expiry policies
// and persistence that always happens before the response is written.

// Re-export core functionality
pub use hearth_session::*;

#[cfg(feature = "sqlx")]
pub use hearth_sqlx;

#[cfg(feature = "redis")]
pub use hearth_redis;

#[cfg(feature = "testing")]
pub use hearth_testing;

pub mod logging;

// Prelude for common imports
pub mod prelude {
    pub use async_trait::async_trait;
    pub use hearth_session::prelude::*;
    pub use hearth_session::{BufferedResponse, SessionService, TypeRegistry};

    #[cfg(feature = "sqlx")]
    pub use hearth_sqlx::{Dialect, SqlKv};

    #[cfg(feature = "redis")]
    pub use hearth_redis::{RedisKv, RedisKvConfig};
}
