//! SQL session storage for hearth.
//!
//! [`SqlKv`] implements [`hearth_session::KvStore`] and
//! [`hearth_session::GarbageCollect`] over any database sqlx's `Any` driver
//! reaches: PostgreSQL, MySQL and SQLite, plus a generic dialect for other
//! databases that accept SQLite-style upserts.
//!
//! ```no_run
//! use hearth_session::{GcTask, SessionConfig, SessionManager};
//! use hearth_sqlx::SqlKv;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kv = Arc::new(SqlKv::connect("sqlite://sessions.db?mode=rwc").await?);
//! kv.create_table().await?;
//!
//! let gc = GcTask::spawn(kv.clone(), Duration::from_secs(300))?;
//! let manager = SessionManager::kv(kv, SessionConfig::default())?;
//! // ...
//! gc.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod dialect;
pub mod error;
pub mod store;

pub use dialect::{DEFAULT_TABLE_NAME, Dialect};
pub use error::{SqlKvError, SqlKvResult};
pub use store::SqlKv;
