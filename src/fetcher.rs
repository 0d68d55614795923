//! Concurrent fetcher.
//!
//! Realizes the source's curl-multi pump as a pool of tokio tasks: a
//! `tokio::sync::Semaphore` permit stands in for a curl-multi "slot", and
//! "drain completed transfers" is realized by awaiting a bounded `mpsc`
//! channel of [`FetchOutcome`]s. Exactly one task, the cycle driver, reads
//! that channel and calls into the result recorder, which keeps catalog
//! writes serialized.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::{mpsc, Semaphore};

use crate::blob_store::BlobStore;
use crate::constants::{
    DOWNLOAD_CONNECT_TIMEOUT_SECONDS, DOWNLOAD_DOMAIN_THROTTLE_SECONDS,
    DOWNLOAD_ITERATIONS_SLEEP_SECONDS, DOWNLOAD_MAX_REDIRECTS, MAX_DOWNLOAD_RUNTIME_SECONDS,
};
use crate::domain_throttle::DomainThrottle;
use crate::http_client;
use crate::recorder::{self, FetchOutcome, RecorderStats};
use crate::repository::{CatalogRepository, Result as RepoResult};

#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),
}

pub type Result<T> = std::result::Result<T, FetcherError>;

/// Outcome of one full fetch cycle: how many of the queued URLs were
/// settled, against how many were queued in total, plus the recorder's
/// tally.
pub struct FetchCycleOutcome {
    pub completed: usize,
    pub total_lines: usize,
    pub stats: RecorderStats,
}

/// Run one fetch cycle against `queue_dir/queue.txt`, storing committed
/// payloads under `output_root` and resuming from `queue_dir/output.txt` if
/// present. `timeout_seconds` is chosen by the caller per queue type
/// (`MAX_TIMEOUT_SECONDS` for `timedout`, `MIN_TIMEOUT_SECONDS` otherwise).
pub async fn run_cycle(
    queue_dir: &Path,
    output_root: &Path,
    concurrency: usize,
    timeout_seconds: i64,
    repo: &CatalogRepository,
) -> Result<FetchCycleOutcome> {
    let queue_path = queue_dir.join("queue.txt");
    let output_path = queue_dir.join("output.txt");
    let blob_store = BlobStore::new(output_root.to_path_buf());
    let concurrency = concurrency.max(1);

    let mut completed_ids = load_completed(&output_path)?;
    let total_lines = count_lines(&queue_path)?;

    let throttle = Arc::new(DomainThrottle::new(Duration::from_secs(
        DOWNLOAD_DOMAIN_THROTTLE_SECONDS,
    )));
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let client = Arc::new(http_client::build_client(
        Duration::from_secs(timeout_seconds.max(0) as u64),
        Duration::from_secs(DOWNLOAD_CONNECT_TIMEOUT_SECONDS),
        DOWNLOAD_MAX_REDIRECTS,
    )?);

    let cycle_start = Instant::now();
    let mut stats = RecorderStats::default();
    let scratch_root = tempfile::tempdir()?;

    loop {
        let spawned = spawn_pass(
            &queue_path,
            &throttle,
            &semaphore,
            &client,
            scratch_root.path(),
            timeout_seconds,
            &mut completed_ids,
            &blob_store,
            &output_path,
            repo,
            &mut stats,
        )
        .await?;

        if total_lines == 0 || completed_ids.len() >= total_lines {
            break;
        }
        if cycle_start.elapsed() >= Duration::from_secs(MAX_DOWNLOAD_RUNTIME_SECONDS) {
            tracing::warn!(
                elapsed_seconds = cycle_start.elapsed().as_secs(),
                completed = completed_ids.len(),
                total_lines,
                "fetch cycle hit its wall-clock cap"
            );
            break;
        }
        if spawned == 0 {
            tokio::time::sleep(Duration::from_secs(DOWNLOAD_ITERATIONS_SLEEP_SECONDS)).await;
        }
    }

    Ok(FetchCycleOutcome {
        completed: completed_ids.len(),
        total_lines,
        stats,
    })
}

/// Filter `queue.txt` down to the lines eligible for admission this pass:
/// not already completed, and not presently throttled by their host. Applied
/// eagerly, in file order, so throttle admission order matches a sequential
/// scan regardless of how the transfers themselves are later interleaved.
fn admissible_lines(
    queue_path: &Path,
    throttle: &DomainThrottle,
    completed_ids: &HashSet<i64>,
) -> std::io::Result<Vec<(i64, String)>> {
    let file = File::open(queue_path)?;
    let mut candidates = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let Some((url_id_str, url)) = line.split_once(' ') else {
            continue;
        };
        let Ok(url_id) = url_id_str.parse::<i64>() else {
            continue;
        };
        if completed_ids.contains(&url_id) {
            continue;
        }
        if !throttle.try_admit(url) {
            continue;
        }
        candidates.push((url_id, url.to_string()));
    }
    Ok(candidates)
}

/// One pass over `queue.txt`: admit every line not yet completed and not
/// presently throttled, run its transfer, and record every outcome as it
/// arrives. Recording is interleaved with admission via `select!` so a full
/// channel never holds every semaphore permit hostage behind an admission
/// loop that hasn't reached the receive side yet. Returns the number of
/// transfers spawned this pass.
#[allow(clippy::too_many_arguments)]
async fn spawn_pass(
    queue_path: &Path,
    throttle: &Arc<DomainThrottle>,
    semaphore: &Arc<Semaphore>,
    client: &Arc<Client>,
    scratch_root: &Path,
    timeout_seconds: i64,
    completed_ids: &mut HashSet<i64>,
    blob_store: &BlobStore,
    output_path: &Path,
    repo: &CatalogRepository,
    stats: &mut RecorderStats,
) -> Result<usize> {
    let mut candidates = admissible_lines(queue_path, throttle, completed_ids)?.into_iter();
    let (tx, mut rx) = mpsc::channel::<FetchOutcome>(8);
    let mut spawned = 0usize;
    let mut pending = 0usize;
    let mut next = candidates.next();

    while next.is_some() || pending > 0 {
        tokio::select! {
            permit = semaphore.clone().acquire_owned(), if next.is_some() => {
                let permit = permit.expect("semaphore never closes");
                let (url_id, url) = next.take().expect("guarded by next.is_some()");
                let tx = tx.clone();
                let client = client.clone();
                let scratch_dir = scratch_root.join(url_id.to_string());
                spawned += 1;
                pending += 1;
                tokio::spawn(async move {
                    let _permit = permit;
                    let outcome =
                        perform_transfer(&client, url_id, url, scratch_dir, timeout_seconds).await;
                    let _ = tx.send(outcome).await;
                });
                next = candidates.next();
            }
            Some(outcome) = rx.recv(), if pending > 0 => {
                pending -= 1;
                completed_ids.insert(outcome.url_id);
                record_outcome(repo, blob_store, output_path, stats, outcome)?;
            }
        }
    }

    Ok(spawned)
}

fn record_outcome(
    repo: &CatalogRepository,
    blob_store: &BlobStore,
    output_path: &Path,
    stats: &mut RecorderStats,
    outcome: FetchOutcome,
) -> RepoResult<()> {
    recorder::record(repo, blob_store, output_path, stats, outcome)
}

/// Perform one GET, writing payload and headers to scratch files under
/// `scratch_dir`. Never returns an `Err`: transport failures and timeouts
/// are captured on the [`FetchOutcome`] itself so the recorder can classify
/// them.
async fn perform_transfer(
    client: &Client,
    url_id: i64,
    url: String,
    scratch_dir: PathBuf,
    timeout_seconds: i64,
) -> FetchOutcome {
    let _ = std::fs::create_dir_all(&scratch_dir);
    let payload_path = scratch_dir.join("output");
    let header_path = scratch_dir.join("header");

    let mut outcome = FetchOutcome {
        url_id,
        url: url.clone(),
        payload_path: payload_path.clone(),
        header_path: header_path.clone(),
        scratch_dir: scratch_dir.clone(),
        http_status: None,
        error: None,
        timed_out: false,
        timeout_seconds,
    };

    match client.get(&url).send().await {
        Ok(response) => {
            outcome.http_status = Some(response.status().as_u16());
            let header_dump = format!("{:?}\n", response.headers());
            let _ = std::fs::write(&header_path, header_dump);

            match response.bytes().await {
                Ok(body) => {
                    if let Err(e) = std::fs::write(&payload_path, &body) {
                        outcome.error = Some(e.to_string());
                    }
                }
                Err(e) => {
                    outcome.timed_out = e.is_timeout();
                    if !outcome.timed_out {
                        outcome.error = Some(e.to_string());
                    }
                    let _ = std::fs::write(&payload_path, b"");
                }
            }
        }
        Err(e) => {
            outcome.timed_out = e.is_timeout();
            if !outcome.timed_out {
                outcome.error = Some(e.to_string());
            }
            let _ = std::fs::write(&payload_path, b"");
            let _ = std::fs::write(&header_path, b"");
        }
    }

    outcome
}

fn load_completed(output_path: &Path) -> std::io::Result<HashSet<i64>> {
    if !output_path.exists() {
        return Ok(HashSet::new());
    }
    let file = File::open(output_path)?;
    let mut ids = HashSet::new();
    for line in BufReader::new(file).lines() {
        if let Ok(id) = line?.trim().parse::<i64>() {
            ids.insert(id);
        }
    }
    Ok(ids)
}

fn count_lines(queue_path: &Path) -> std::io::Result<usize> {
    if !queue_path.exists() {
        return Ok(0);
    }
    let file = File::open(queue_path)?;
    Ok(BufReader::new(file).lines().count())
}
