use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Timelike};
use log::debug;
use ndarray::Axis;
use serde_json::Value;
use strum::IntoEnumIterator;

use crate::{
    error::{RosError, RosResult},
    io::readers::{
        json::{write_dataset, JsonDatasetReader},
        prelude::DatasetReader,
    },
    models::dataset::DatasetKind,
};

/// Client of the external reanalysis archive.
/// `retrieve` writes the requested data to `destination` or fails.
pub trait ArchiveClient: Send + Sync {
    fn retrieve(&self, dataset_id: &str, request: &Value, destination: &Path) -> RosResult<()>;
}

fn unavailable(dataset_id: &str, reason: impl ToString) -> RosError {
    RosError::SourceUnavailable {
        dataset: dataset_id.to_string(),
        reason: reason.to_string(),
    }
}

fn first_number(request: &Value, key: &str) -> Option<u32> {
    let value = request.get(key)?;
    let value = value.as_array().and_then(|a| a.first()).unwrap_or(value);
    value
        .as_u64()
        .map(|v| v as u32)
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// requested date, from the `year`/`month`/`day` members
pub fn request_date(request: &Value) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        first_number(request, "year")? as i32,
        first_number(request, "month")?,
        first_number(request, "day")?,
    )
}

/// requested hours, from `time` entries such as "14:00"; empty for daily products
pub fn request_hours(request: &Value) -> Vec<u32> {
    request
        .get("time")
        .and_then(|t| t.as_array())
        .map(|times| {
            times
                .iter()
                .filter_map(|t| t.as_str())
                .filter_map(|t| t.split(':').next())
                .filter_map(|h| h.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Archive served from a local directory holding one JSON dataset document
/// per product and day, as `<root>/<dataset_id>/<YYYYMMDD>.json`.
#[derive(Debug, Clone)]
pub struct MirrorArchiveClient {
    root: PathBuf,
}

impl MirrorArchiveClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MirrorArchiveClient { root: root.into() }
    }

    pub fn day_path(&self, dataset_id: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(dataset_id)
            .join(format!("{}.json", date.format("%Y%m%d")))
    }
}

impl ArchiveClient for MirrorArchiveClient {
    fn retrieve(&self, dataset_id: &str, request: &Value, destination: &Path) -> RosResult<()> {
        let kind = DatasetKind::iter()
            .find(|k| k.dataset_id() == dataset_id)
            .ok_or_else(|| unavailable(dataset_id, "unknown product"))?;
        let date = request_date(request).ok_or_else(|| unavailable(dataset_id, "request without a valid date"))?;
        let path = self.day_path(dataset_id, date);
        if !path.is_file() {
            return Err(unavailable(dataset_id, format!("{} not in mirror", path.display())));
        }
        let day = JsonDatasetReader.read(&path, kind)?;

        let hours = request_hours(request);
        let dataset = if kind.is_daily() || hours.is_empty() {
            day
        } else {
            let keep: Vec<usize> = day
                .times
                .iter()
                .enumerate()
                .filter(|(_, t)| hours.contains(&t.hour()))
                .map(|(i, _)| i)
                .collect();
            let mut subset = day.clone();
            subset.times = keep.iter().map(|i| day.times[*i]).collect();
            for data in subset.variables.values_mut() {
                *data = data.select(Axis(0), &keep);
            }
            subset
        };
        debug!(
            "[MIRROR] {} {} -> {} ({} times)",
            dataset_id,
            date,
            destination.display(),
            dataset.times.len()
        );
        write_dataset(destination, &dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn date_and_hours_are_read_from_the_request() {
        let request = json!({"year": ["2023"], "month": ["08"], "day": ["15"], "time": ["14:00", "15:00"]});
        assert_eq!(request_date(&request), NaiveDate::from_ymd_opt(2023, 8, 15));
        assert_eq!(request_hours(&request), vec![14, 15]);
        assert!(request_hours(&json!({"year": 2023})).is_empty());
    }

    #[test]
    fn missing_mirror_day_is_unavailable() {
        let client = MirrorArchiveClient::new(std::env::temp_dir().join("roscube-empty-mirror"));
        let request = json!({"year": ["2023"], "month": ["08"], "day": ["15"]});
        let err = client
            .retrieve("cems-fire-historical-v1", &request, Path::new("/tmp/never"))
            .unwrap_err();
        assert_eq!(err.kind(), "SourceUnavailable");
        assert!(err.is_retryable());
    }
}
