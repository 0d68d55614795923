//! Repository layer for catalog persistence.

pub mod catalog;

pub use catalog::CatalogRepository;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Format a timestamp the way the catalog stores it (RFC3339, UTC).
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("URL or URL title already exists in the collection")]
    UrlOrTitleAlreadyExistsInCollection,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// True when a rusqlite error is a `UNIQUE constraint failed` violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    ) && err.to_string().contains("UNIQUE constraint failed")
}

/// Create a database connection with optimized settings for concurrency.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // WAL mode persists in the database file, so this is effectively a one-time
    // setting, but harmless to re-apply on every connection.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;
    "#,
    )?;

    Ok(conn)
}

/// Run the catalog's embedded schema bootstrap, returning the tables now present.
pub fn run_all_migrations(db_path: &Path) -> Result<Vec<String>> {
    let conn = connect(db_path)?;
    CatalogRepository::init_schema(&conn)?;

    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(tables)
}

/// Execute a database operation with retry logic for lock errors.
/// Retries up to 5 times with exponential backoff (100ms, 200ms, 400ms, 800ms, 1600ms).
pub fn with_retry<T, F>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_retries = 5;
    let mut delay_ms = 100;

    for attempt in 0..max_retries {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e @ RepositoryError::Database(_)) => {
                let is_lock_error = e.to_string().contains("database is locked")
                    || e.to_string().contains("SQLITE_BUSY")
                    || e.to_string().contains("SQLITE_LOCKED");

                if is_lock_error && attempt < max_retries - 1 {
                    tracing::debug!(
                        "database locked, retrying in {}ms (attempt {}/{})",
                        delay_ms,
                        attempt + 1,
                        max_retries
                    );
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                    continue;
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        }
    }

    operation()
}
