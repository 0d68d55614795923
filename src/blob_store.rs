//! Content-addressed blob store.
//!
//! Downloaded payloads live under `<output_root>/<YYYY>/<M>/<D>/<H>/<Min>/<url_id>/output`,
//! with date components reflecting the completion time of the download and
//! rendered without zero-padding, matching the layout the catalog's
//! `Hash.download_path` column records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlobStoreError>;

pub struct BlobStore {
    output_root: PathBuf,
}

impl BlobStore {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Relative path (no leading slash) that a payload for `url_id`,
    /// completed at `completed_at`, should live at under the output root.
    pub fn relative_path(&self, url_id: i64, completed_at: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}/output",
            completed_at.format("%Y"),
            completed_at.format("%-m"),
            completed_at.format("%-d"),
            completed_at.format("%-H"),
            completed_at.format("%-M"),
            url_id,
        )
    }

    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        self.output_root.join(relative)
    }

    /// Atomically move a scratch payload into its final content-addressed
    /// location, creating parent directories as needed. Used only when this
    /// `(hash, size)` pair is new; on a hash collision the caller discards
    /// the temp file instead of calling this.
    pub fn commit(&self, temp_path: &Path, relative_path: &str) -> Result<PathBuf> {
        let dest = self.absolute_path(relative_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(temp_path, &dest)?;
        Ok(dest)
    }

    /// Discard a scratch payload that will never be committed (hash
    /// collision, transfer error, or timeout).
    pub fn discard(&self, temp_path: &Path) -> Result<()> {
        if temp_path.exists() {
            std::fs::remove_file(temp_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn relative_path_is_unpadded() {
        let store = BlobStore::new("/out");
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 3, 7, 0).unwrap();
        assert_eq!(store.relative_path(42, ts), "2026/1/5/3/7/42/output");
    }

    #[test]
    fn commit_moves_file_and_creates_dirs() {
        let root = tempdir().unwrap();
        let store = BlobStore::new(root.path());
        let scratch = tempdir().unwrap();
        let temp_file = scratch.path().join("output");
        std::fs::write(&temp_file, b"hi").unwrap();

        let dest = store.commit(&temp_file, "2026/1/5/3/7/42/output").unwrap();
        assert!(dest.exists());
        assert!(!temp_file.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"hi");
    }

    #[test]
    fn discard_removes_scratch_file() {
        let root = tempdir().unwrap();
        let store = BlobStore::new(root.path());
        let scratch = tempdir().unwrap();
        let temp_file = scratch.path().join("output");
        std::fs::write(&temp_file, b"hi").unwrap();

        store.discard(&temp_file).unwrap();
        assert!(!temp_file.exists());
    }

    #[test]
    fn discard_is_a_no_op_when_already_gone() {
        let root = tempdir().unwrap();
        let store = BlobStore::new(root.path());
        store.discard(Path::new("/nonexistent/path")).unwrap();
    }
}
