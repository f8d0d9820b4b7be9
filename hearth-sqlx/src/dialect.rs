//! SQL dialects and the queries they need.

use std::fmt::Write;

/// Default table holding sessions.
pub const DEFAULT_TABLE_NAME: &str = "web_sessions";

/// SQL flavour of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Standard SQL with SQLite-style upsert
    #[default]
    Generic,
    MySql,
    PostgreSql,
    Sqlite,
}

impl Dialect {
    /// Guess the dialect from a connection URL.
    pub fn from_url(url: &str) -> Self {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Dialect::PostgreSql,
            "mysql" | "mariadb" => Dialect::MySql,
            "sqlite" => Dialect::Sqlite,
            _ => Dialect::Generic,
        }
    }

    fn upsert_clause(self) -> &'static str {
        match self {
            Dialect::MySql => {
                "ON DUPLICATE KEY UPDATE data = VALUES(data), expires_at = VALUES(expires_at)"
            }
            Dialect::PostgreSql => {
                "ON CONFLICT(id) DO UPDATE SET data = EXCLUDED.data, expires_at = EXCLUDED.expires_at"
            }
            Dialect::Sqlite | Dialect::Generic => {
                "ON CONFLICT(id) DO UPDATE SET data = excluded.data, expires_at = excluded.expires_at"
            }
        }
    }

    /// Rewrite `?` placeholders into the dialect's bind syntax.
    fn placeholders(self, query: String) -> String {
        if self != Dialect::PostgreSql {
            return query;
        }

        let mut out = String::with_capacity(query.len() + 8);
        let mut n = 0;
        for c in query.chars() {
            if c == '?' {
                n += 1;
                let _ = write!(out, "${n}");
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// Whether `name` is safe to splice into SQL as a table name.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|part| {
                part.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                    && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
}

/// The statements a store runs, rendered for one table and dialect.
#[derive(Debug, Clone)]
pub(crate) struct Queries {
    pub get: String,
    pub set: String,
    pub delete: String,
    pub gc: String,
    pub create_table: String,
    pub create_index: Option<String>,
}

impl Queries {
    pub fn new(table: &str, dialect: Dialect) -> Self {
        let get = format!("SELECT data FROM {table} WHERE id = ? AND expires_at > ?");
        let set = format!(
            "INSERT INTO {table} (id, data, expires_at) VALUES (?, ?, ?) {}",
            dialect.upsert_clause()
        );
        let delete = format!("DELETE FROM {table} WHERE id = ?");
        let gc = format!("DELETE FROM {table} WHERE expires_at < ?");

        let index_name = format!("{}_expires_at_idx", table.replace('.', "_"));
        let (create_table, create_index) = match dialect {
            Dialect::MySql => (
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (\
                     id VARCHAR(255) PRIMARY KEY, \
                     data LONGBLOB NOT NULL, \
                     expires_at BIGINT NOT NULL, \
                     INDEX {index_name} (expires_at))"
                ),
                None,
            ),
            Dialect::PostgreSql => (
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (\
                     id TEXT PRIMARY KEY, \
                     data BYTEA NOT NULL, \
                     expires_at BIGINT NOT NULL)"
                ),
                Some(format!(
                    "CREATE INDEX IF NOT EXISTS {index_name} ON {table} (expires_at)"
                )),
            ),
            Dialect::Sqlite => (
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (\
                     id TEXT PRIMARY KEY, \
                     data BLOB NOT NULL, \
                     expires_at INTEGER NOT NULL)"
                ),
                Some(format!(
                    "CREATE INDEX IF NOT EXISTS {index_name} ON {table} (expires_at)"
                )),
            ),
            Dialect::Generic => (
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (\
                     id VARCHAR(255) PRIMARY KEY, \
                     data BLOB NOT NULL, \
                     expires_at BIGINT NOT NULL)"
                ),
                Some(format!(
                    "CREATE INDEX IF NOT EXISTS {index_name} ON {table} (expires_at)"
                )),
            ),
        };

        Self {
            get: dialect.placeholders(get),
            set: dialect.placeholders(set),
            delete: dialect.placeholders(delete),
            gc: dialect.placeholders(gc),
            create_table,
            create_index,
        }
    }
}
