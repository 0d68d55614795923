//! Catalog row types and the small enums that drive bucket planning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One flattened row out of the snapshot builder, joining a collection-url binding
/// with its URL, domain, last-update history, and last-successful-update history.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub app_id: i64,
    pub app_name: String,
    pub collection_id: i64,
    pub collection_name: String,
    pub url_id: i64,
    pub url: String,
    pub domain_id: i64,
    pub update_freq_minutes: i64,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_update_hash_id: Option<i64>,
    pub last_update_error: Option<String>,
    pub last_update_error_code: Option<i64>,
    pub last_update_timedout_seconds: Option<i64>,
    pub last_successful_updated_at: Option<DateTime<Utc>>,
}

/// Global filter profile selecting which URLs a cycle targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    Regular,
    Timedout,
    Samedomain,
}

impl std::str::FromStr for QueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(QueueType::Regular),
            "timedout" => Ok(QueueType::Timedout),
            "samedomain" => Ok(QueueType::Samedomain),
            other => Err(format!("invalid queue_type: {other}")),
        }
    }
}

impl std::fmt::Display for QueueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueType::Regular => "regular",
            QueueType::Timedout => "timedout",
            QueueType::Samedomain => "samedomain",
        };
        write!(f, "{s}")
    }
}

/// Why a URL is eligible for the queue this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BucketType {
    New,
    Update,
    Failed,
}

impl BucketType {
    pub const ALL: [BucketType; 3] = [BucketType::New, BucketType::Update, BucketType::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketType::New => "new",
            BucketType::Update => "update",
            BucketType::Failed => "failed",
        }
    }
}

/// Per-cycle domain occupancy counts accumulated while streaming the snapshot.
pub type DomainStats = HashMap<i64, u64>;
