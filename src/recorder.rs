//! Result recorder.
//!
//! Called once per transfer outcome from the fetcher's single driver task,
//! which keeps catalog writes serialized: history row, then pointer
//! upserts, then the resume log.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::blob_store::BlobStore;
use crate::constants::HASH_BLOCKSIZE;
use crate::repository::catalog::HashInsertOutcome;
use crate::repository::{with_retry, CatalogRepository, Result as RepoResult};

/// One completed (or failed, or timed-out) transfer, ready to be recorded.
pub struct FetchOutcome {
    pub url_id: i64,
    pub url: String,
    pub payload_path: PathBuf,
    pub header_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub timeout_seconds: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderStats {
    pub num_existing_hash_id: u64,
    pub num_new_hash_id: u64,
    pub num_error_urls: u64,
    pub num_timeout_urls: u64,
}

/// Compute the SHA-256 of a file in `HASH_BLOCKSIZE`-sized chunks, matching
/// the source's incremental-hash loop.
fn hash_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCKSIZE];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Record one transfer outcome: hash + store the payload on success, append
/// history, and update the last-update / last-successful-update pointers.
/// Steps run in a fixed order: hash, commit-or-discard, history row,
/// pointer upserts, then the resume log.
pub fn record(
    repo: &CatalogRepository,
    blob_store: &BlobStore,
    output_path: &Path,
    stats: &mut RecorderStats,
    outcome: FetchOutcome,
) -> RepoResult<()> {
    let completed_at: DateTime<Utc> = Utc::now();
    let mut hash_id: Option<i64> = None;
    let mut error: Option<String> = None;
    let mut error_code: Option<i64> = None;
    let mut timedout_seconds: Option<i64> = None;

    if outcome.error.is_none() && !outcome.timed_out && outcome.http_status == Some(200) {
        let file_size = std::fs::metadata(&outcome.payload_path).map(|m| m.len()).unwrap_or(0);
        if file_size > 0 {
            match hash_file(&outcome.payload_path) {
                Ok((hash_hex, size)) => {
                    let relative_path = blob_store.relative_path(outcome.url_id, completed_at);
                    match with_retry(|| {
                        repo.insert_hash(&hash_hex, size as i64, &relative_path, completed_at)
                    })? {
                        HashInsertOutcome::Inserted(id) => {
                            stats.num_new_hash_id += 1;
                            blob_store
                                .commit(&outcome.payload_path, &relative_path)
                                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                            hash_id = Some(id);
                        }
                        HashInsertOutcome::AlreadyExists(id) => {
                            stats.num_existing_hash_id += 1;
                            let _ = blob_store.discard(&outcome.payload_path);
                            hash_id = Some(id);
                        }
                    }
                }
                Err(e) => {
                    stats.num_error_urls += 1;
                    error = Some(e.to_string());
                    let _ = blob_store.discard(&outcome.payload_path);
                }
            }
        } else {
            let _ = blob_store.discard(&outcome.payload_path);
        }
        error_code = Some(200);
    } else if outcome.timed_out {
        stats.num_timeout_urls += 1;
        timedout_seconds = Some(outcome.timeout_seconds);
        let _ = blob_store.discard(&outcome.payload_path);
    } else {
        stats.num_error_urls += 1;
        error = outcome.error.clone();
        error_code = outcome.http_status.map(i64::from);
        let _ = blob_store.discard(&outcome.payload_path);
    }

    let _ = std::fs::remove_file(&outcome.header_path);
    let _ = std::fs::remove_dir(&outcome.scratch_dir);

    let history_id = with_retry(|| {
        repo.insert_update_history(
            outcome.url_id,
            completed_at,
            hash_id,
            error.as_deref(),
            error_code,
            timedout_seconds,
        )
    })?;
    with_retry(|| repo.upsert_last_update(outcome.url_id, history_id))?;
    if hash_id.is_some() {
        with_retry(|| repo.upsert_last_successful_update(outcome.url_id, history_id))?;
    }

    append_output(output_path, outcome.url_id)?;

    Ok(())
}

/// Append a completed `url_id` to the cycle's resume log.
fn append_output(output_path: &Path, url_id: i64) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_path)?;
    writeln!(file, "{url_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, CatalogRepository, BlobStore, i64) {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.sqlite3")).unwrap();
        repo.create_app("acme").unwrap();
        let collection_url_id = repo
            .add_url(
                "acme",
                "https://example.com/a",
                None,
                None,
                &HashMap::new(),
                serde_json::json!({}),
                60,
            )
            .unwrap();
        let url_id: i64 = repo
            .conn_for_test()
            .query_row(
                "SELECT url_id FROM collection_url WHERE id = ?1",
                [collection_url_id],
                |row| row.get(0),
            )
            .unwrap();
        let blob_store = BlobStore::new(dir.path().join("blobs"));
        (dir, repo, blob_store, url_id)
    }

    fn scratch_outcome(dir: &Path, url_id: i64, url: &str, body: &[u8]) -> FetchOutcome {
        let scratch_dir = dir.join(url_id.to_string());
        std::fs::create_dir_all(&scratch_dir).unwrap();
        let payload_path = scratch_dir.join("output");
        let header_path = scratch_dir.join("header");
        std::fs::write(&payload_path, body).unwrap();
        std::fs::write(&header_path, b"HTTP/1.1 200 OK\r\n").unwrap();
        FetchOutcome {
            url_id,
            url: url.to_string(),
            payload_path,
            header_path,
            scratch_dir,
            http_status: Some(200),
            error: None,
            timed_out: false,
            timeout_seconds: 15,
        }
    }

    #[test]
    fn successful_fetch_creates_hash_and_pointers() {
        let (dir, repo, blob_store, url_id) = setup();
        let scratch = tempdir().unwrap();
        let outcome = scratch_outcome(scratch.path(), url_id, "https://example.com/a", b"hi");
        let output_path = dir.path().join("output.txt");
        let mut stats = RecorderStats::default();
        record(&repo, &blob_store, &output_path, &mut stats, outcome).unwrap();

        assert_eq!(stats.num_new_hash_id, 1);
        assert_eq!(
            std::fs::read_to_string(&output_path).unwrap().trim(),
            url_id.to_string()
        );
        let hash_id: Option<i64> = repo
            .conn_for_test()
            .query_row(
                "SELECT url_update_history_id FROM url_last_successful_update WHERE url_id = ?1",
                [url_id],
                |row| row.get(0),
            )
            .ok();
        assert!(hash_id.is_some());
        drop(dir);
    }

    #[test]
    fn duplicate_payload_dedups_and_discards_scratch() {
        let (dir, repo, blob_store, url_id) = setup();
        let scratch = tempdir().unwrap();
        let first = scratch_outcome(scratch.path(), url_id, "https://example.com/a", b"hi");
        let output_path = dir.path().join("output.txt");
        let mut stats = RecorderStats::default();
        record(&repo, &blob_store, &output_path, &mut stats, first).unwrap();

        let second = scratch_outcome(scratch.path(), url_id, "https://example.com/a", b"hi");
        record(&repo, &blob_store, &output_path, &mut stats, second).unwrap();

        assert_eq!(stats.num_new_hash_id, 1);
        assert_eq!(stats.num_existing_hash_id, 1);
        drop(dir);
    }

    #[test]
    fn timeout_outcome_is_recorded_without_hash() {
        let (dir, repo, blob_store, url_id) = setup();
        let scratch = tempdir().unwrap();
        let scratch_dir = scratch.path().join(url_id.to_string());
        std::fs::create_dir_all(&scratch_dir).unwrap();
        let payload_path = scratch_dir.join("output");
        let header_path = scratch_dir.join("header");
        std::fs::write(&payload_path, b"partial").unwrap();
        std::fs::write(&header_path, b"").unwrap();
        let outcome = FetchOutcome {
            url_id,
            url: "https://example.com/a".into(),
            payload_path,
            header_path,
            scratch_dir,
            http_status: None,
            error: None,
            timed_out: true,
            timeout_seconds: 15,
        };
        let output_path = dir.path().join("output.txt");
        let mut stats = RecorderStats::default();
        record(&repo, &blob_store, &output_path, &mut stats, outcome).unwrap();
        assert_eq!(stats.num_timeout_urls, 1);
        drop(dir);
    }
}
