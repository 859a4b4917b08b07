//! `SQLite` plumbing for the relay store.
//!
//! The relay keeps one store file. Every room runs its queries under its own
//! session lock, so several rooms hit the pool at once: the file is opened in
//! WAL mode with a small pool and a busy timeout. Tests use a single-connection
//! in-memory pool, since each in-memory connection is a separate database.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Cannot create database directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open database: {0}")]
    Open(#[source] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] MigrateError),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored integer does not fit the type the relay uses for it.
    #[error("Stored {column} value {value} is out of range")]
    OutOfRange { column: &'static str, value: i64 },
}

/// Pool sizing for a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Open (or create) the store file at `path`, creating missing parent
/// directories.
pub async fn open_pool(path: &Path, settings: PoolSettings) -> Result<SqlitePool, DatabaseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(settings.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await
        .map_err(DatabaseError::Open)?;

    info!(
        path = %path.display(),
        max_connections = settings.max_connections,
        "Relay store opened"
    );
    Ok(pool)
}

pub async fn open_pool_in_memory() -> Result<SqlitePool, DatabaseError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(DatabaseError::Open)?
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(DatabaseError::Open)
}

/// Bring the schema up to date. Returns how many migrations the store knows.
pub async fn run_migrations(pool: &SqlitePool, migrator: &Migrator) -> Result<usize, DatabaseError> {
    migrator.run(pool).await?;
    Ok(migrator.iter().count())
}

/// Seconds since the Unix epoch, as stored in timestamp columns.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Define a store handle type over a migrated `SQLite` pool.
///
/// Migrations are read from `./migrations` in the invoking crate.
///
/// ```ignore
/// wordrelay_core::define_database!(RelayDatabase);
/// ```
#[macro_export]
macro_rules! define_database {
    ($name:ident) => {
        #[derive(Clone)]
        pub struct $name {
            pool: ::sqlx::SqlitePool,
        }

        impl $name {
            /// Open or create the store at `path`.
            pub async fn open(
                path: &::std::path::Path,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                let settings = $crate::db::PoolSettings::default();
                Self::migrated($crate::db::open_pool(path, settings).await?).await
            }

            /// A fresh in-memory store.
            pub async fn open_in_memory() -> ::std::result::Result<Self, $crate::db::DatabaseError>
            {
                Self::migrated($crate::db::open_pool_in_memory().await?).await
            }

            async fn migrated(
                pool: ::sqlx::SqlitePool,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                let migrations =
                    $crate::db::run_migrations(&pool, &::sqlx::migrate!("./migrations")).await?;
                let store = stringify!($name);
                ::tracing::debug!(store, migrations, "Schema up to date");
                Ok(Self { pool })
            }

            pub const fn pool(&self) -> &::sqlx::SqlitePool {
                &self.pool
            }
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_recent() {
        // 2024-01-01
        assert!(unix_timestamp() > 1_704_067_200);
    }

    #[tokio::test]
    async fn store_file_gets_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("relay.db");

        let pool = open_pool(&path, PoolSettings::default()).await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(mode, "wal");
    }

    #[tokio::test]
    async fn blocked_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = open_pool(&blocker.join("relay.db"), PoolSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::CreateDir { path, .. } if path == blocker));
    }

    #[tokio::test]
    async fn in_memory_pool_enforces_foreign_keys() {
        let pool = open_pool_in_memory().await.unwrap();
        let on: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(on, 1);
    }
}
