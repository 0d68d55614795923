//! Daemon loop.
//!
//! Repeats snapshot → plan → fetch forever, sleeping between cycles.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::constants::{DAEMON_SLEEP_TIME_SECONDS, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS};
use crate::models::QueueType;
use crate::repository::CatalogRepository;
use crate::{fetcher, planner, snapshot};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("queue directory already exists: {0}")]
    QueueDirectoryExists(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Planner(#[from] planner::PlannerError),
    #[error(transparent)]
    Fetcher(#[from] fetcher::FetcherError),
    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Run one snapshot-plan-fetch cycle. The queue directory must not already
/// exist; it is created fresh and removed before returning, so a crash mid
/// cycle leaves no stale directory for the next run to trip over.
pub async fn run_cycle(
    queue_type: QueueType,
    queue_dir: &Path,
    output_root: &Path,
    concurrency: usize,
    repo: &CatalogRepository,
) -> Result<fetcher::FetchCycleOutcome> {
    if queue_dir.exists() {
        return Err(DaemonError::QueueDirectoryExists(queue_dir.to_path_buf()));
    }
    std::fs::create_dir_all(queue_dir)?;

    let cycle_result = run_cycle_inner(queue_type, queue_dir, output_root, concurrency, repo).await;

    let _ = std::fs::remove_dir_all(queue_dir);
    cycle_result
}

async fn run_cycle_inner(
    queue_type: QueueType,
    queue_dir: &Path,
    output_root: &Path,
    concurrency: usize,
    repo: &CatalogRepository,
) -> Result<fetcher::FetchCycleOutcome> {
    let snap = snapshot::build(repo)?;
    let plan_result = planner::plan(queue_dir, queue_type, &snap, repo)?;

    tracing::info!(
        queue_type = %queue_type,
        queued = plan_result.total_queued,
        "bucket plan ready"
    );

    let timeout_seconds = match queue_type {
        QueueType::Timedout => MAX_TIMEOUT_SECONDS,
        _ => MIN_TIMEOUT_SECONDS,
    };

    let outcome =
        fetcher::run_cycle(queue_dir, output_root, concurrency, timeout_seconds, repo).await?;

    tracing::info!(
        completed = outcome.completed,
        total = outcome.total_lines,
        new_hashes = outcome.stats.num_new_hash_id,
        existing_hashes = outcome.stats.num_existing_hash_id,
        errors = outcome.stats.num_error_urls,
        timeouts = outcome.stats.num_timeout_urls,
        "fetch cycle complete"
    );

    Ok(outcome)
}

/// Run cycles forever, sleeping `DAEMON_SLEEP_TIME_SECONDS` between them. A
/// fresh queue directory name is derived per cycle so a slow shutdown or
/// crash of the previous cycle can never collide with the next one's
/// `QueueDirectoryExists` check.
pub async fn run_forever(
    queue_type: QueueType,
    queue_dir_root: &Path,
    output_root: &Path,
    concurrency: usize,
    repo: &CatalogRepository,
) -> Result<()> {
    let mut cycle: u64 = 0;
    loop {
        let started = Instant::now();
        let queue_dir = queue_dir_root.join(format!("cycle-{cycle}"));

        match run_cycle(queue_type, &queue_dir, output_root, concurrency, repo).await {
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "fetch cycle failed"),
        }

        tracing::debug!(elapsed_seconds = started.elapsed().as_secs(), "cycle finished");
        cycle += 1;
        tokio::time::sleep(Duration::from_secs(DAEMON_SLEEP_TIME_SECONDS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn refuses_to_reuse_an_existing_queue_directory() {
        let catalog_dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&catalog_dir.path().join("catalog.sqlite3")).unwrap();
        let parent = tempdir().unwrap();
        let queue_dir = parent.path().join("taken");
        std::fs::create_dir_all(&queue_dir).unwrap();
        let output_root = tempdir().unwrap();

        let result = run_cycle(QueueType::Regular, &queue_dir, output_root.path(), 1, &repo).await;
        assert!(matches!(result, Err(DaemonError::QueueDirectoryExists(_))));
    }

    #[tokio::test]
    async fn empty_catalog_cycle_cleans_up_its_queue_directory() {
        let catalog_dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&catalog_dir.path().join("catalog.sqlite3")).unwrap();
        let parent = tempdir().unwrap();
        let queue_dir = parent.path().join("cycle-0");
        let output_root = tempdir().unwrap();

        let outcome = run_cycle(QueueType::Regular, &queue_dir, output_root.path(), 1, &repo)
            .await
            .unwrap();
        assert_eq!(outcome.total_lines, 0);
        assert!(!queue_dir.exists());
    }
}
