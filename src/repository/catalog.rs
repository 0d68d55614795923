//! Catalog repository: durable persistence of apps, collections, URLs, domains,
//! tags, hashes and update history.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::SnapshotRow;

use super::{connect, format_datetime, is_unique_violation, parse_datetime_opt};
use super::{RepositoryError, Result};

/// Outcome of `insert_hash`: whether this call created the blob's identity row
/// or another fetch already claimed the same `(hash, size_bytes)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashInsertOutcome {
    Inserted(i64),
    AlreadyExists(i64),
}

impl HashInsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            HashInsertOutcome::Inserted(id) => *id,
            HashInsertOutcome::AlreadyExists(id) => *id,
        }
    }
}

pub struct CatalogRepository {
    conn: Connection,
}

impl CatalogRepository {
    /// Open (creating if needed) the catalog database at `db_path` and ensure
    /// its schema exists.
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = connect(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Idempotent schema bootstrap. Safe to call on every startup.
    pub fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS app (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS domain (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS url (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                domain_id INTEGER NOT NULL REFERENCES domain(id)
            );

            CREATE TABLE IF NOT EXISTS collection (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app_id INTEGER NOT NULL REFERENCES app(id),
                name TEXT NOT NULL,
                UNIQUE(app_id, name)
            );

            CREATE TABLE IF NOT EXISTS collection_url (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id INTEGER NOT NULL REFERENCES collection(id),
                url_id INTEGER NOT NULL REFERENCES url(id),
                title TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                update_freq_minutes INTEGER NOT NULL DEFAULT 0,
                UNIQUE(collection_id, url_id),
                UNIQUE(collection_id, title)
            );

            CREATE TABLE IF NOT EXISTS tag (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS url_tag (
                collection_url_id INTEGER NOT NULL REFERENCES collection_url(id),
                tag_id INTEGER NOT NULL REFERENCES tag(id),
                value TEXT NOT NULL,
                PRIMARY KEY (collection_url_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS hash (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                download_path TEXT NOT NULL,
                downloaded_at TEXT NOT NULL,
                UNIQUE(hash, size_bytes)
            );

            CREATE TABLE IF NOT EXISTS url_update_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url_id INTEGER NOT NULL REFERENCES url(id),
                updated_at TEXT NOT NULL,
                hash_id INTEGER REFERENCES hash(id),
                error TEXT,
                error_code INTEGER,
                timedout_seconds INTEGER
            );
            CREATE INDEX IF NOT EXISTS url_update_history_url_id_idx
                ON url_update_history(url_id, updated_at DESC);

            CREATE TABLE IF NOT EXISTS url_last_update (
                url_id INTEGER PRIMARY KEY REFERENCES url(id),
                url_update_history_id INTEGER NOT NULL REFERENCES url_update_history(id)
            );

            CREATE TABLE IF NOT EXISTS url_last_successful_update (
                url_id INTEGER PRIMARY KEY REFERENCES url(id),
                url_update_history_id INTEGER NOT NULL REFERENCES url_update_history(id)
            );

            CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url_id INTEGER NOT NULL UNIQUE REFERENCES url(id),
                timeout_seconds INTEGER NOT NULL,
                added_at TEXT NOT NULL,
                status TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    // --- primitive upserts --------------------------------------------------

    pub fn upsert_domain(&self, host: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO domain (domain) VALUES (?1)",
            params![host],
        )?;
        Ok(self.conn.query_row(
            "SELECT id FROM domain WHERE domain = ?1",
            params![host],
            |row| row.get(0),
        )?)
    }

    pub fn upsert_url(&self, url: &str, domain_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO url (url, domain_id) VALUES (?1, ?2)",
            params![url, domain_id],
        )?;
        Ok(self.conn.query_row(
            "SELECT id FROM url WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?)
    }

    pub fn upsert_collection(&self, app_id: i64, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO collection (app_id, name) VALUES (?1, ?2)",
            params![app_id, name],
        )?;
        Ok(self.conn.query_row(
            "SELECT id FROM collection WHERE app_id = ?1 AND name = ?2",
            params![app_id, name],
            |row| row.get(0),
        )?)
    }

    /// Fails with `UrlOrTitleAlreadyExistsInCollection` when either uniqueness
    /// constraint on `collection_url` is violated.
    pub fn insert_collection_url(
        &self,
        collection_id: i64,
        url_id: i64,
        title: &str,
        metadata: &serde_json::Value,
        update_freq_minutes: i64,
    ) -> Result<i64> {
        let metadata_json = serde_json::to_string(metadata)?;
        match self.conn.execute(
            "INSERT INTO collection_url (collection_id, url_id, title, metadata, update_freq_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection_id, url_id, title, metadata_json, update_freq_minutes],
        ) {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => {
                Err(RepositoryError::UrlOrTitleAlreadyExistsInCollection)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn replace_url_tags(
        &self,
        collection_url_id: i64,
        tags: &HashMap<String, String>,
    ) -> Result<()> {
        self.conn.execute(
            "DELETE FROM url_tag WHERE collection_url_id = ?1",
            params![collection_url_id],
        )?;
        for (name, value) in tags {
            if value.is_empty() {
                continue;
            }
            self.conn.execute(
                "INSERT OR IGNORE INTO tag (name) VALUES (?1)",
                params![name],
            )?;
            let tag_id: i64 = self.conn.query_row(
                "SELECT id FROM tag WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            self.conn.execute(
                "INSERT INTO url_tag (collection_url_id, tag_id, value) VALUES (?1, ?2, ?3)",
                params![collection_url_id, tag_id, value],
            )?;
        }
        Ok(())
    }

    /// Insert the content-addressed identity row for a freshly downloaded
    /// payload, or discover that one already exists for `(hash, size_bytes)`.
    pub fn insert_hash(
        &self,
        hash: &str,
        size_bytes: i64,
        download_path: &str,
        downloaded_at: DateTime<Utc>,
    ) -> Result<HashInsertOutcome> {
        match self.conn.execute(
            "INSERT INTO hash (hash, size_bytes, download_path, downloaded_at) VALUES (?1, ?2, ?3, ?4)",
            params![hash, size_bytes, download_path, format_datetime(downloaded_at)],
        ) {
            Ok(_) => Ok(HashInsertOutcome::Inserted(self.conn.last_insert_rowid())),
            Err(e) if is_unique_violation(&e) => {
                let id: i64 = self.conn.query_row(
                    "SELECT id FROM hash WHERE hash = ?1 AND size_bytes = ?2",
                    params![hash, size_bytes],
                    |row| row.get(0),
                )?;
                Ok(HashInsertOutcome::AlreadyExists(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn insert_update_history(
        &self,
        url_id: i64,
        updated_at: DateTime<Utc>,
        hash_id: Option<i64>,
        error: Option<&str>,
        error_code: Option<i64>,
        timedout_seconds: Option<i64>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO url_update_history (url_id, updated_at, hash_id, error, error_code, timedout_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                url_id,
                format_datetime(updated_at),
                hash_id,
                error,
                error_code,
                timedout_seconds
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Raw connection access for tests elsewhere in the crate that need to
    /// assert on table contents directly.
    #[cfg(test)]
    pub fn conn_for_test(&self) -> &Connection {
        &self.conn
    }

    pub fn upsert_last_update(&self, url_id: i64, history_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO url_last_update (url_id, url_update_history_id) VALUES (?1, ?2)
             ON CONFLICT(url_id) DO UPDATE SET url_update_history_id = excluded.url_update_history_id",
            params![url_id, history_id],
        )?;
        Ok(())
    }

    pub fn upsert_last_successful_update(&self, url_id: i64, history_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO url_last_successful_update (url_id, url_update_history_id) VALUES (?1, ?2)
             ON CONFLICT(url_id) DO UPDATE SET url_update_history_id = excluded.url_update_history_id",
            params![url_id, history_id],
        )?;
        Ok(())
    }

    /// Advisory lease; omitted consumers are expected to rely on
    /// `queue.txt`/`output.txt` instead (see DESIGN.md).
    pub fn insert_queue(&self, url_id: i64, timeout_seconds: i64, added_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO queue (url_id, timeout_seconds, added_at, status) VALUES (?1, ?2, ?3, 'added')",
            params![url_id, timeout_seconds, format_datetime(added_at)],
        )?;
        Ok(())
    }

    /// Count of consecutive failures (hash_id IS NULL) starting from the most
    /// recent history row, capped at the 5 most recent rows.
    pub fn recent_consecutive_failures(&self, url_id: i64) -> Result<u32> {
        let mut stmt = self.conn.prepare(
            "SELECT hash_id FROM url_update_history WHERE url_id = ?1 ORDER BY updated_at DESC, id DESC LIMIT 5",
        )?;
        let mut count = 0u32;
        let rows = stmt.query_map(params![url_id], |row| row.get::<_, Option<i64>>(0))?;
        for hash_id in rows {
            if hash_id?.is_some() {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    // --- snapshot ------------------------------------------------------------

    /// Join every `CollectionUrl` with its URL, domain, last-update and
    /// last-successful-update history.
    pub fn stream_snapshot(&self) -> Result<Vec<SnapshotRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                app.id, app.name,
                collection.id, collection.name,
                url.id, url.url,
                domain.id,
                collection_url.update_freq_minutes,
                last_update.updated_at,
                last_update.hash_id,
                last_update.error,
                last_update.error_code,
                last_update.timedout_seconds,
                last_successful.updated_at
            FROM collection_url
            JOIN collection ON collection.id = collection_url.collection_id
            JOIN app ON app.id = collection.app_id
            JOIN url ON url.id = collection_url.url_id
            JOIN domain ON domain.id = url.domain_id
            LEFT JOIN url_last_update ON url_last_update.url_id = url.id
            LEFT JOIN url_update_history last_update ON last_update.id = url_last_update.url_update_history_id
            LEFT JOIN url_last_successful_update ON url_last_successful_update.url_id = url.id
            LEFT JOIN url_update_history last_successful ON last_successful.id = url_last_successful_update.url_update_history_id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(SnapshotRow {
                app_id: row.get(0)?,
                app_name: row.get(1)?,
                collection_id: row.get(2)?,
                collection_name: row.get(3)?,
                url_id: row.get(4)?,
                url: row.get(5)?,
                domain_id: row.get(6)?,
                update_freq_minutes: row.get(7)?,
                updated_at: parse_datetime_opt(row.get(8)?),
                last_update_hash_id: row.get(9)?,
                last_update_error: row.get(10)?,
                last_update_error_code: row.get(11)?,
                last_update_timedout_seconds: row.get(12)?,
                last_successful_updated_at: parse_datetime_opt(row.get(13)?),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // --- app / url ingestion convenience -------------------------------------

    pub fn create_app(&self, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO app (name) VALUES (?1)",
            params![name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn find_app_id(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM app WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Convenience composition over the primitive operations above, grounded
    /// in the original `add()` ingestion routine: validates the URL, then
    /// performs the upsert-domain/upsert-url/upsert-collection/insert sequence.
    #[allow(clippy::too_many_arguments)]
    pub fn add_url(
        &self,
        app_name: &str,
        url: &str,
        title: Option<&str>,
        collection: Option<&str>,
        tags: &HashMap<String, String>,
        metadata: serde_json::Value,
        update_freq_minutes: i64,
    ) -> Result<i64> {
        let app_name = app_name.trim();
        let url = url.trim();
        if url.len() < 10 {
            return Err(RepositoryError::InvalidUrl(
                "url length must be at least 10 characters".into(),
            ));
        }
        if url.contains('\n') || url.contains('\r') {
            return Err(RepositoryError::InvalidUrl("invalid characters in url".into()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(RepositoryError::InvalidUrl("invalid url schema".into()));
        }

        let app_id = self
            .find_app_id(app_name)?
            .ok_or_else(|| RepositoryError::NotFound(format!("app {app_name}")))?;

        let host = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| RepositoryError::InvalidUrl("could not extract host".into()))?;

        let domain_id = self.upsert_domain(host)?;
        let url_id = self.upsert_url(url, domain_id)?;
        let collection_name = collection.unwrap_or("default").trim();
        let collection_id = self.upsert_collection(app_id, collection_name)?;
        let title = title.unwrap_or(url).trim();

        let collection_url_id =
            self.insert_collection_url(collection_id, url_id, title, &metadata, update_freq_minutes)?;

        self.replace_url_tags(collection_url_id, tags)?;
        Ok(collection_url_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo() -> (tempfile::TempDir, CatalogRepository) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("catalog.sqlite3");
        let repo = CatalogRepository::new(&db_path).unwrap();
        (dir, repo)
    }

    #[test]
    fn upsert_domain_is_idempotent() {
        let (_dir, repo) = repo();
        let a = repo.upsert_domain("example.com").unwrap();
        let b = repo.upsert_domain("example.com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn add_url_creates_full_chain() {
        let (_dir, repo) = repo();
        repo.create_app("acme").unwrap();
        let collection_url_id = repo
            .add_url(
                "acme",
                "https://example.com/a",
                Some("Example A"),
                Some("feeds"),
                &HashMap::new(),
                serde_json::json!({}),
                60,
            )
            .unwrap();
        assert!(collection_url_id > 0);
    }

    #[test]
    fn add_url_rejects_short_url() {
        let (_dir, repo) = repo();
        repo.create_app("acme").unwrap();
        let err = repo
            .add_url(
                "acme",
                "http://a",
                None,
                None,
                &HashMap::new(),
                serde_json::json!({}),
                0,
            )
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidUrl(_)));
    }

    #[test]
    fn duplicate_title_in_collection_is_rejected() {
        let (_dir, repo) = repo();
        repo.create_app("acme").unwrap();
        repo.add_url(
            "acme",
            "https://example.com/a",
            Some("same-title"),
            Some("feeds"),
            &HashMap::new(),
            serde_json::json!({}),
            0,
        )
        .unwrap();

        let err = repo
            .add_url(
                "acme",
                "https://example.com/b",
                Some("same-title"),
                Some("feeds"),
                &HashMap::new(),
                serde_json::json!({}),
                0,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::UrlOrTitleAlreadyExistsInCollection
        ));
    }

    #[test]
    fn insert_hash_dedups_on_content_identity() {
        let (_dir, repo) = repo();
        let now = Utc::now();
        let first = repo.insert_hash("deadbeef", 2, "2026/1/1/0/0/1/output", now).unwrap();
        let second = repo.insert_hash("deadbeef", 2, "2026/1/1/0/0/2/output", now).unwrap();
        assert!(matches!(first, HashInsertOutcome::Inserted(_)));
        assert!(matches!(second, HashInsertOutcome::AlreadyExists(_)));
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn last_update_pointer_updates_in_place() {
        let (_dir, repo) = repo();
        repo.create_app("acme").unwrap();
        let collection_url_id = repo
            .add_url(
                "acme",
                "https://example.com/a",
                None,
                None,
                &HashMap::new(),
                serde_json::json!({}),
                0,
            )
            .unwrap();
        let url_id: i64 = repo
            .conn
            .query_row(
                "SELECT url_id FROM collection_url WHERE id = ?1",
                params![collection_url_id],
                |row| row.get(0),
            )
            .unwrap();

        let h1 = repo
            .insert_update_history(url_id, Utc::now(), None, Some("boom"), Some(500), None)
            .unwrap();
        repo.upsert_last_update(url_id, h1).unwrap();
        let h2 = repo
            .insert_update_history(url_id, Utc::now(), None, Some("boom again"), Some(500), None)
            .unwrap();
        repo.upsert_last_update(url_id, h2).unwrap();

        let pointer: i64 = repo
            .conn
            .query_row(
                "SELECT url_update_history_id FROM url_last_update WHERE url_id = ?1",
                params![url_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(pointer, h2);
    }

    #[test]
    fn recent_consecutive_failures_stops_at_success() {
        let (_dir, repo) = repo();
        repo.create_app("acme").unwrap();
        let collection_url_id = repo
            .add_url(
                "acme",
                "https://example.com/a",
                None,
                None,
                &HashMap::new(),
                serde_json::json!({}),
                0,
            )
            .unwrap();
        let url_id: i64 = repo
            .conn
            .query_row(
                "SELECT url_id FROM collection_url WHERE id = ?1",
                params![collection_url_id],
                |row| row.get(0),
            )
            .unwrap();

        let hash = repo
            .insert_hash("feed", 4, "path", Utc::now())
            .unwrap()
            .id();
        repo.insert_update_history(url_id, Utc::now(), Some(hash), None, Some(200), None)
            .unwrap();
        repo.insert_update_history(url_id, Utc::now(), None, Some("x"), Some(500), None)
            .unwrap();
        repo.insert_update_history(url_id, Utc::now(), None, Some("x"), Some(500), None)
            .unwrap();

        assert_eq!(repo.recent_consecutive_failures(url_id).unwrap(), 2);
    }
}
