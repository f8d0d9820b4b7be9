//! SQL-backed key-value store.

use crate::dialect::{DEFAULT_TABLE_NAME, Dialect, Queries, is_valid_table_name};
use crate::error::{SqlKvError, SqlKvResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_session::store::{GarbageCollect, KvStore};
use hearth_session::{SessionError, SessionResult};
use sqlx::AnyPool;
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use tracing::debug;

fn backend(e: sqlx::Error) -> SessionError {
    SqlKvError::from(e).into()
}

/// A [`KvStore`] kept in a SQL table.
///
/// Rows are `(id, data, expires_at)` with `expires_at` in unix seconds.
/// Reads ignore expired rows; [`GarbageCollect::gc`] deletes them.
///
/// # Examples
///
/// ```no_run
/// use hearth_session::{SessionConfig, SessionManager};
/// use hearth_sqlx::SqlKv;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let kv = SqlKv::connect("postgres://localhost/app").await?;
/// kv.create_table().await?;
///
/// let manager = SessionManager::kv(kv, SessionConfig::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqlKv {
    pool: AnyPool,
    dialect: Dialect,
    table: String,
    queries: Queries,
}

impl SqlKv {
    /// Connect to `url`, picking the dialect from its scheme.
    pub async fn connect(url: &str) -> SqlKvResult<Self> {
        install_default_drivers();
        let pool = AnyPoolOptions::new().connect(url).await?;
        Ok(Self::new(pool, Dialect::from_url(url)))
    }

    /// Use an existing pool.
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            table: DEFAULT_TABLE_NAME.to_string(),
            queries: Queries::new(DEFAULT_TABLE_NAME, dialect),
        }
    }

    /// Store sessions in `table` instead of `web_sessions`.
    pub fn with_table_name(mut self, table: impl Into<String>) -> SqlKvResult<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(SqlKvError::InvalidTableName(table));
        }
        self.queries = Queries::new(&table, self.dialect);
        self.table = table;
        Ok(self)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Create the sessions table and its expiry index if missing.
    pub async fn create_table(&self) -> SqlKvResult<()> {
        sqlx::query(&self.queries.create_table)
            .execute(&self.pool)
            .await?;
        if let Some(index) = &self.queries.create_index {
            sqlx::query(index).execute(&self.pool).await?;
        }
        debug!(table = %self.table, dialect = ?self.dialect, "Session table ready");
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqlKv {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        sqlx::query_scalar::<_, Vec<u8>>(&self.queries.get)
            .bind(key)
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn set(&self, key: &str, expires_at: DateTime<Utc>, value: &[u8]) -> SessionResult<()> {
        sqlx::query(&self.queries.set)
            .bind(key)
            .bind(value)
            .bind(expires_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        sqlx::query(&self.queries.delete)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl GarbageCollect for SqlKv {
    async fn gc(&self) -> SessionResult<u64> {
        let result = sqlx::query(&self.queries.gc)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
