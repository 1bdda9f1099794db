use std::{collections::BTreeMap, path::PathBuf};

use serde_derive::{Deserialize, Serialize};

use crate::{
    constants::GRID_RESOLUTION,
    error::RosResult,
    models::grid::{BoundingBox, SpatialGrid},
    modules::{
        cache::config::CacheConfig, fetch::config::FetchConfig, harmonize::config::HarmonizeConfig,
        predict::features::LATEST_FEATURE_MAP, temporal::HistoryPolicy,
    },
};

fn default_resolution() -> f32 {
    GRID_RESOLUTION
}

fn default_feature_map() -> u32 {
    LATEST_FEATURE_MAP
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub bbox: BoundingBox,
    #[serde(default = "default_resolution")]
    pub resolution: f32,
}

impl GridConfig {
    pub fn build(&self) -> RosResult<SpatialGrid> {
        SpatialGrid::new(&self.bbox, self.resolution)
    }
}

/// Everything a [`super::Pipeline`] needs apart from its collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub grid: GridConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    #[serde(default)]
    pub harmonize: HarmonizeConfig,
    #[serde(default)]
    pub history_policy: HistoryPolicy,
    /// GeoJSON region of interest; the whole grid when absent
    #[serde(default)]
    pub boundary: Option<PathBuf>,
    /// yearly fuel and burned-area layers
    #[serde(default)]
    pub static_layers: Option<PathBuf>,
    #[serde(default = "default_feature_map")]
    pub feature_map_version: u32,
    /// column -> feature entries replacing the versioned ones
    #[serde(default)]
    pub feature_overrides: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn new(bbox: BoundingBox, cache: CacheConfig, fetch: FetchConfig) -> Self {
        PipelineConfig {
            grid: GridConfig {
                bbox,
                resolution: default_resolution(),
            },
            cache,
            fetch,
            harmonize: HarmonizeConfig::default(),
            history_policy: HistoryPolicy::default(),
            boundary: None,
            static_layers: None,
            feature_map_version: default_feature_map(),
            feature_overrides: BTreeMap::new(),
        }
    }
}
