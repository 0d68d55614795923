//! Snapshot builder.
//!
//! Joins catalog state into a flat per-URL record set and accumulates the
//! domain occupancy counts the bucket planner needs for fairness sizing, in
//! one pass over the streamed rows.

use crate::models::{DomainStats, SnapshotRow};
use crate::repository::CatalogRepository;
use crate::repository::Result;

pub struct Snapshot {
    pub rows: Vec<SnapshotRow>,
    pub domain_stats: DomainStats,
}

/// Stream the catalog into a `Snapshot`, accumulating per-domain counts as
/// each row is seen.
pub fn build(repo: &CatalogRepository) -> Result<Snapshot> {
    let rows = repo.stream_snapshot()?;
    let mut domain_stats = DomainStats::new();
    for row in &rows {
        *domain_stats.entry(row.domain_id).or_insert(0) += 1;
    }
    Ok(Snapshot { rows, domain_stats })
}
