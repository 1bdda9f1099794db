use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::models::variables::Column;

/// Resolution of a cell present, with a value, in both merged tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
pub enum MergePolicy {
    /// the value already stored is kept, differing values are counted as conflicts
    #[default]
    KeepExisting,
    /// the new value replaces the stored one (authoritative recompute)
    Overwrite,
}

fn default_table_file() -> String {
    "ros_master.rct".into()
}

fn default_hourly_file() -> String {
    "hourly_features.rct".into()
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_stale_lock_secs() -> u64 {
    3_600
}

fn default_tracked_columns() -> Vec<String> {
    Column::tracked().iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub dir: PathBuf,
    #[serde(default = "default_table_file")]
    pub table_file: String,
    #[serde(default = "default_hourly_file")]
    pub hourly_file: String,
    #[serde(default)]
    pub merge_policy: MergePolicy,
    /// columns looked at by the coverage check
    #[serde(default = "default_tracked_columns")]
    pub tracked_columns: Vec<String>,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// lock files older than this are considered left over by a crashed writer
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CacheConfig {
            dir: dir.into(),
            table_file: default_table_file(),
            hourly_file: default_hourly_file(),
            merge_policy: MergePolicy::default(),
            tracked_columns: default_tracked_columns(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.dir.join(&self.table_file)
    }

    pub fn hourly_path(&self) -> PathBuf {
        self.dir.join(&self.hourly_file)
    }
}
