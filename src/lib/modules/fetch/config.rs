use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::{constants::ARCHIVE_LATENCY_DAYS, io::readers::prelude::SourceFormat};

fn default_latency_days() -> i64 {
    ARCHIVE_LATENCY_DAYS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// where fetched source files are kept
    pub cache_dir: PathBuf,
    /// days the archive needs before a date can be retrieved
    #[serde(default = "default_latency_days")]
    pub latency_days: i64,
    #[serde(default)]
    pub format: SourceFormat,
}

impl FetchConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        FetchConfig {
            cache_dir: cache_dir.into(),
            latency_days: default_latency_days(),
            format: SourceFormat::default(),
        }
    }
}
