use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{
    error::RosResult,
    models::dataset::{DatasetKind, RawSourceDataset},
};

/// Trait implemented by every on-disk source format
pub trait DatasetReader: Send + Sync {
    /// parse a fetched file into a dataset of the given kind
    fn read(&self, path: &Path, kind: DatasetKind) -> RosResult<RawSourceDataset>;

    /// extension of the files handled by this reader
    fn extension(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceFormat {
    /// JSON dataset documents (mirrors, tests)
    #[default]
    Json,
    /// NetCDF files as delivered by the archive
    NetCdf,
}
