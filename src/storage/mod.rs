//! SQLite store: connection setup plus the write and read paths.
//!
//! Writers go through [`writes`]; everything in [`queries`] is read-only and
//! safe to call from the HTTP API.

pub mod queries;
pub mod writes;

use std::path::Path;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub use queries::{StationStats, StorageStats, get_latest, get_range, stats};
pub use writes::{BatchCommit, commit_batch, optimize, update_station_timestamp, upsert_measurements};

/// Open (creating if needed) the configured database file and migrate it.
///
/// # Errors
///
/// Returns `AppError::Internal` if the parent directory cannot be created and
/// `AppError::Database` if connecting or migrating fails.
pub async fn open(config: &Config) -> AppResult<DatabaseConnection> {
    if let Some(parent) = config.database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::Internal(format!("Cannot create {}: {e}", parent.display()))
        })?;
    }

    let db = connect(&config.database_url()).await?;
    tracing::info!(path = %config.database_path.display(), "Database ready");
    Ok(db)
}

/// Connect to `url`, enable WAL and apply pending migrations.
///
/// # Errors
///
/// Returns `AppError::Database` if connecting or migrating fails.
pub async fn connect(url: &str) -> AppResult<DatabaseConnection> {
    let db = Database::connect(url).await?;

    db.execute_unprepared("PRAGMA journal_mode = WAL").await?;
    db.execute_unprepared("PRAGMA foreign_keys = ON").await?;

    migration::Migrator::up(&db, None).await?;
    tracing::debug!("Migrations applied");
    Ok(db)
}

/// Size of the database file, if it exists on disk.
#[must_use]
pub fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
