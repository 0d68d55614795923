//! Bucket planner.
//!
//! Filters the snapshot by queue type, classifies each surviving row into a
//! bucket type, partitions bucket types into per-domain/per-collection
//! fairness groups, and interleaves those groups into a single deduplicated
//! `queue.txt`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::constants::{
    DEFAULT_MIN_SAME_DOMAIN_BUCKET, MAX_SAMEDOMAINS, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS,
    RETRY_FAILED_MIN_SECONDS,
};
use crate::models::{BucketType, QueueType, SnapshotRow};
use crate::repository::CatalogRepository;
use crate::snapshot::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),
}

pub type Result<T> = std::result::Result<T, PlannerError>;

pub struct PlanResult {
    pub queue_path: PathBuf,
    pub total_queued: usize,
}

/// Keep rows whose timeout history and domain occupancy match
/// the requested queue type.
fn passes_queue_type_filter(row: &SnapshotRow, queue_type: QueueType, domain_stats: &crate::models::DomainStats) -> bool {
    let timeout_seconds = row.last_update_timedout_seconds.unwrap_or(0);
    let same_domain = *domain_stats.get(&row.domain_id).unwrap_or(&0);

    match queue_type {
        QueueType::Regular => timeout_seconds <= MIN_TIMEOUT_SECONDS && same_domain <= MAX_SAMEDOMAINS,
        QueueType::Timedout => {
            timeout_seconds >= MIN_TIMEOUT_SECONDS && timeout_seconds <= MAX_TIMEOUT_SECONDS
        }
        QueueType::Samedomain => same_domain >= MAX_SAMEDOMAINS,
    }
}

/// Classify a row into at most one bucket type. Needs a catalog
/// lookup for the "failed" case (consecutive-failure count over the 5 most
/// recent history rows).
fn classify(row: &SnapshotRow, repo: &CatalogRepository) -> Result<Option<BucketType>> {
    let Some(updated_at) = row.updated_at else {
        return Ok(Some(BucketType::New));
    };

    if let Some(_hash_id) = row.last_update_hash_id {
        let eligible = row.last_successful_updated_at.is_some()
            && row.update_freq_minutes > 0
            && row.last_successful_updated_at.map(|t| {
                (Utc::now() - t).num_seconds() as f64 / 60.0 > row.update_freq_minutes as f64
            }) == Some(true);
        return Ok(eligible.then_some(BucketType::Update));
    }

    let stale_enough = (Utc::now() - updated_at).num_seconds() > RETRY_FAILED_MIN_SECONDS;
    if !stale_enough {
        return Ok(None);
    }
    let consecutive_failures = repo.recent_consecutive_failures(row.url_id)?;
    Ok((consecutive_failures >= 1).then_some(BucketType::Failed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FairnessGroup {
    Domain(i64),
    Collection(i64),
}

/// Run the full planning pipeline, writing bucket files and the final `queue.txt`
/// under `queue_dir`. Returns the path to `queue.txt` and the number of
/// deduplicated URLs it contains.
pub fn plan(
    queue_dir: &Path,
    queue_type: QueueType,
    snapshot: &Snapshot,
    repo: &CatalogRepository,
) -> Result<PlanResult> {
    let filtered: Vec<&SnapshotRow> = snapshot
        .rows
        .iter()
        .filter(|row| passes_queue_type_filter(row, queue_type, &snapshot.domain_stats))
        .collect();

    let same_domain_bucket_ids: BTreeSet<i64> = snapshot
        .domain_stats
        .iter()
        .filter(|(_, count)| **count >= DEFAULT_MIN_SAME_DOMAIN_BUCKET)
        .map(|(domain_id, _)| *domain_id)
        .collect();

    let mut all_collection_ids: BTreeSet<i64> = BTreeSet::new();
    for row in &filtered {
        all_collection_ids.insert(row.collection_id);
    }

    // classified[bucket_type][fairness_group] -> rows
    let mut classified: BTreeMap<BucketType, BTreeMap<FairnessGroup, Vec<(i64, String)>>> =
        BTreeMap::new();
    for bucket_type in BucketType::ALL {
        classified.insert(bucket_type, BTreeMap::new());
    }

    for row in &filtered {
        let Some(bucket_type) = classify(row, repo)? else {
            continue;
        };
        let group = if same_domain_bucket_ids.contains(&row.domain_id) {
            FairnessGroup::Domain(row.domain_id)
        } else {
            FairnessGroup::Collection(row.collection_id)
        };
        classified
            .get_mut(&bucket_type)
            .unwrap()
            .entry(group)
            .or_default()
            .push((row.url_id, row.url.clone()));
    }

    let buckets_dir = queue_dir.join("buckets");
    let mut ordered_bucket_files: Vec<PathBuf> = Vec::new();

    for bucket_type in BucketType::ALL {
        let type_dir = buckets_dir.join(bucket_type.as_str());
        std::fs::create_dir_all(&type_dir)?;
        let groups = &classified[&bucket_type];

        // domain buckets first, ascending id
        for domain_id in &same_domain_bucket_ids {
            let path = type_dir.join(format!("domain_{domain_id}.txt"));
            write_bucket_file(&path, groups.get(&FairnessGroup::Domain(*domain_id)))?;
            ordered_bucket_files.push(path);
        }
        // then collection buckets, ascending id
        for collection_id in &all_collection_ids {
            let path = type_dir.join(format!("collection_{collection_id}.txt"));
            write_bucket_file(&path, groups.get(&FairnessGroup::Collection(*collection_id)))?;
            ordered_bucket_files.push(path);
        }
    }

    let queue_path = queue_dir.join("queue.txt");
    let total_queued = interleave(&ordered_bucket_files, &queue_path)?;

    Ok(PlanResult {
        queue_path,
        total_queued,
    })
}

fn write_bucket_file(path: &Path, rows: Option<&Vec<(i64, String)>>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    if let Some(rows) = rows {
        for (url_id, url) in rows {
            writeln!(writer, "{url_id} {url}")?;
        }
    }
    Ok(())
}

/// Round-robin one line at a time from each bucket file, in the
/// order the files were created (bucket-type major, domain-then-collection
/// minor, ascending id), deduplicating by `url_id` (first occurrence wins).
fn interleave(bucket_files: &[PathBuf], queue_path: &Path) -> Result<usize> {
    let mut readers: Vec<BufReader<File>> = bucket_files
        .iter()
        .map(|p| Ok(BufReader::new(File::open(p)?)))
        .collect::<std::result::Result<_, std::io::Error>>()?;

    let out_file = File::create(queue_path)?;
    let mut writer = BufWriter::new(out_file);
    let mut seen: HashSet<i64> = HashSet::new();
    let mut total = 0usize;

    let mut active: Vec<usize> = (0..readers.len()).collect();
    while !active.is_empty() {
        let mut still_active = Vec::with_capacity(active.len());
        for idx in active {
            let mut line = String::new();
            let bytes_read = readers[idx].read_line(&mut line)?;
            if bytes_read == 0 {
                continue; // exhausted, drop from rotation
            }
            let line = line.trim_end_matches('\n');
            if let Some((url_id_str, _url)) = line.split_once(' ') {
                if let Ok(url_id) = url_id_str.parse::<i64>() {
                    if seen.insert(url_id) {
                        writeln!(writer, "{line}")?;
                        total += 1;
                    }
                }
            }
            still_active.push(idx);
        }
        active = still_active;
    }

    writer.flush()?;
    Ok(total)
}
