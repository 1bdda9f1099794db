//! Retrieval of source datasets from the reanalysis archive, with an on-disk
//! cache keyed by (dataset, date, hours, area).

pub mod client;
pub mod config;

use std::{
    fs,
    path::PathBuf,
    sync::Arc,
};

use chrono::{Datelike, NaiveDate, Timelike, Utc};
use itertools::Itertools;
use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::{
    error::{RosError, RosResult},
    io::{
        helpers::{partial_path, temp_path},
        readers::{prelude::DatasetReader, reader_for},
    },
    models::{
        dataset::{DatasetKind, RawSourceDataset},
        grid::BoundingBox,
    },
};

use client::ArchiveClient;
use config::FetchConfig;

/// archive names of the variables requested for each product
fn request_variables(kind: DatasetKind) -> Vec<&'static str> {
    kind.variables()
        .iter()
        .map(|name| match *name {
            "u100" => "100m_u_component_of_wind",
            "v100" => "100m_v_component_of_wind",
            "cape" => "convective_available_potential_energy",
            "swvl3" => "volumetric_soil_water_layer_3",
            "sp" => "surface_pressure",
            "t2m" => "2m_temperature",
            "d2m" => "2m_dewpoint_temperature",
            "z" => "geopotential",
            "t" => "temperature",
            "u" => "u_component_of_wind",
            "v" => "v_component_of_wind",
            "fwinx" => "fire_weather_index",
            other => other,
        })
        .collect()
}

/// Archive request for one product, one day and a set of hours
pub fn build_request(kind: DatasetKind, date: NaiveDate, hours: &[u32], bbox: &BoundingBox, format: &str) -> Value {
    let mut request = json!({
        "product_type": ["reanalysis"],
        "variable": request_variables(kind),
        "year": [date.year().to_string()],
        "month": [format!("{:02}", date.month())],
        "day": [format!("{:02}", date.day())],
        "data_format": format,
        "area": bbox.area(),
    });
    if let Some(map) = request.as_object_mut() {
        match kind {
            DatasetKind::FireIndex => {
                map.insert("dataset_type".into(), json!("consolidated_dataset"));
                map.insert("system_version".into(), json!("4_1"));
                map.insert("grid".into(), json!("original_grid"));
            }
            DatasetKind::PressureLevels => {
                let levels: Vec<String> = kind.levels().iter().map(|l| l.to_string()).collect();
                map.insert("pressure_level".into(), json!(levels));
                map.insert("time".into(), json!(time_list(hours)));
            }
            DatasetKind::SingleLevels => {
                map.insert("time".into(), json!(time_list(hours)));
            }
        }
    }
    request
}

fn time_list(hours: &[u32]) -> Vec<String> {
    hours.iter().map(|h| format!("{:02}:00", h)).collect()
}

/// Whether `dataset` holds every requested hour. Daily products and hourless
/// requests only need one instant.
fn covers(dataset: &RawSourceDataset, kind: DatasetKind, hours: &[u32]) -> bool {
    if kind.is_daily() || hours.is_empty() {
        return !dataset.times.is_empty();
    }
    hours
        .iter()
        .all(|h| dataset.times.iter().any(|t| t.hour() == *h))
}

/// Result of one fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub kind: DatasetKind,
    pub path: PathBuf,
    /// true when the file was already on disk and the archive was not called
    pub from_cache: bool,
    pub warnings: Vec<String>,
}

/// Fetches source files through an [`ArchiveClient`], keeping every committed
/// file in the cache directory.
pub struct SourceFetcher {
    config: FetchConfig,
    client: Arc<dyn ArchiveClient>,
    reader: Box<dyn DatasetReader>,
    today: Option<NaiveDate>,
}

impl SourceFetcher {
    pub fn new(config: FetchConfig, client: Arc<dyn ArchiveClient>) -> RosResult<Self> {
        let reader = reader_for(config.format)?;
        Ok(SourceFetcher {
            config,
            client,
            reader,
            today: None,
        })
    }

    /// fix the date the latency floor is measured from
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Cache file of (kind, date, hours, area). Daily products ignore the hours.
    pub fn cache_path(&self, kind: DatasetKind, date: NaiveDate, hours: &[u32], bbox: &BoundingBox) -> PathBuf {
        let hour_code = if kind.is_daily() || hours.is_empty() {
            "daily".to_string()
        } else {
            hours
                .iter()
                .sorted()
                .dedup()
                .map(|h| format!("{:02}", h))
                .join("-")
        };
        self.config.cache_dir.join(format!(
            "{}_{}_{}_{}.{}",
            kind.file_prefix(),
            date.format("%Y%m%d"),
            hour_code,
            bbox.cache_key(),
            self.reader.extension()
        ))
    }

    /// `fetch(kind, year, month, day, hours, bounding_box)`: local path of the
    /// requested data, retrieved from the archive only when not cached.
    pub fn fetch(&self, kind: DatasetKind, date: NaiveDate, hours: &[u32], bbox: &BoundingBox) -> RosResult<FetchOutcome> {
        if let Some(bad) = hours.iter().find(|h| **h > 23) {
            return Err(RosError::Config(format!("invalid hour {} in fetch request", bad)));
        }
        let path = self.cache_path(kind, date, hours, bbox);
        if path.is_file() {
            debug!("[FETCH] cache hit {}", path.display());
            return Ok(FetchOutcome {
                kind,
                path,
                from_cache: true,
                warnings: vec![],
            });
        }

        let mut warnings = vec![];
        let age = (self.today() - date).num_days();
        if age < self.config.latency_days {
            let soft = RosError::DataNotYetAvailable {
                dataset: kind.dataset_id().to_string(),
                date,
                latency_days: self.config.latency_days,
            };
            warn!("{}", soft);
            warnings.push(soft.to_string());
        }

        fs::create_dir_all(&self.config.cache_dir)?;
        let request = build_request(kind, date, hours, bbox, &self.config.format.to_string());
        let tmp = temp_path(&path);
        let start = Utc::now();
        info!("Requesting {} for {} hours {:?}", kind.dataset_id(), date, hours);

        let result = self
            .client
            .retrieve(kind.dataset_id(), &request, &tmp)
            .and_then(|_| self.reader.read(&tmp, kind));
        let dataset = match result {
            Ok(dataset) => dataset,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                return Err(match err {
                    RosError::SourceUnavailable { .. } => err,
                    other => RosError::SourceUnavailable {
                        dataset: kind.dataset_id().to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        // a reply missing some of the requested instants is used once and
        // never committed, so a later request asks the archive again
        let target = if covers(&dataset, kind, hours) {
            path
        } else {
            let msg = format!(
                "{} for {} does not cover hours {:?} ({} times), not cached",
                kind.dataset_id(),
                date,
                hours,
                dataset.times.len()
            );
            warn!("[FETCH] {}", msg);
            warnings.push(msg);
            partial_path(&path)
        };
        if let Err(err) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        info!(
            "Fetched {} in {} ms",
            target.display(),
            (Utc::now() - start).num_milliseconds()
        );
        Ok(FetchOutcome {
            kind,
            path: target,
            from_cache: false,
            warnings,
        })
    }

    /// parse a fetched file
    pub fn open(&self, outcome: &FetchOutcome) -> RosResult<RawSourceDataset> {
        self.reader.read(&outcome.path, outcome.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::readers::json::write_dataset, models::dataset::SourceLayout};
    use chrono::TimeZone;
    use ndarray::Array4;
    use strum::IntoEnumIterator;
    use std::{
        collections::BTreeMap,
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::client::{request_date, request_hours};

    struct CountingClient {
        calls: AtomicUsize,
        fail: bool,
        /// hours the archive can serve, all of them when None
        available: Mutex<Option<Vec<u32>>>,
    }

    impl CountingClient {
        fn reply(&self, kind: DatasetKind, request: &Value) -> RawSourceDataset {
            let date = request_date(request).unwrap();
            let mut hours = if kind.is_daily() { vec![0] } else { request_hours(request) };
            if let Some(available) = self.available.lock().unwrap().as_ref() {
                hours.retain(|h| available.contains(h));
            }
            let times: Vec<_> = hours
                .iter()
                .map(|h| Utc.from_utc_datetime(&date.and_hms_opt(*h, 0, 0).unwrap()))
                .collect();
            let levels = kind.levels().to_vec();
            let shape = (times.len(), levels.len().max(1), 2, 2);
            let variables = kind
                .variables()
                .iter()
                .map(|name| (name.to_string(), Array4::from_elem(shape, 1.0)))
                .collect::<BTreeMap<_, _>>();
            let layout = SourceLayout::Regular {
                lats: vec![41.0, 40.0],
                lons: vec![-9.0, -8.0],
            };
            RawSourceDataset::new(kind, times, levels, layout, variables).unwrap()
        }
    }

    impl ArchiveClient for CountingClient {
        fn retrieve(&self, dataset_id: &str, request: &Value, destination: &Path) -> RosResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                fs::write(destination, "partial")?;
                return Err(RosError::SourceUnavailable {
                    dataset: dataset_id.into(),
                    reason: "quota exceeded".into(),
                });
            }
            let kind = DatasetKind::iter().find(|k| k.dataset_id() == dataset_id).unwrap();
            write_dataset(destination, &self.reply(kind, request))
        }
    }

    fn fetcher(name: &str, fail: bool) -> (SourceFetcher, Arc<CountingClient>) {
        let dir = std::env::temp_dir().join(format!("roscube-fetch-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&dir);
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            fail,
            available: Mutex::new(None),
        });
        let fetcher = SourceFetcher::new(FetchConfig::new(dir), client.clone())
            .unwrap()
            .with_today(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        (fetcher, client)
    }

    fn portugal() -> BoundingBox {
        BoundingBox::new(43.0, -10.0, 36.9, -6.0).unwrap()
    }

    #[test]
    fn second_fetch_is_served_from_disk() {
        let (fetcher, client) = fetcher("hit", false);
        let date = NaiveDate::from_ymd_opt(2023, 8, 15).unwrap();
        let first = fetcher.fetch(DatasetKind::SingleLevels, date, &[14, 15, 16], &portugal()).unwrap();
        let second = fetcher.fetch(DatasetKind::SingleLevels, date, &[16, 15, 14], &portugal()).unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.path, second.path);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(first.path.to_string_lossy().contains("ERA5_SL_20230815_14-15-16_43.00_-10.00_36.90_-6.00"));
    }

    #[test]
    fn failed_retrieval_leaves_nothing_behind() {
        let (fetcher, _) = fetcher("fail", true);
        let date = NaiveDate::from_ymd_opt(2023, 8, 15).unwrap();
        let err = fetcher.fetch(DatasetKind::FireIndex, date, &[14], &portugal()).unwrap_err();
        assert_eq!(err.kind(), "SourceUnavailable");
        let path = fetcher.cache_path(DatasetKind::FireIndex, date, &[14], &portugal());
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn recent_dates_are_attempted_with_a_warning() {
        let (fetcher, client) = fetcher("recent", false);
        let date = NaiveDate::from_ymd_opt(2023, 12, 30).unwrap();
        let outcome = fetcher.fetch(DatasetKind::FireIndex, date, &[], &portugal()).unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.path.to_string_lossy().contains("CEMS_FWI_20231230_daily"));
    }

    #[test]
    fn incomplete_replies_are_not_cached() {
        let (fetcher, client) = fetcher("incomplete", false);
        let date = NaiveDate::from_ymd_opt(2023, 8, 15).unwrap();
        *client.available.lock().unwrap() = Some(vec![14, 15]);

        let first = fetcher.fetch(DatasetKind::SingleLevels, date, &[14, 15, 16], &portugal()).unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.warnings.len(), 1);
        let cached = fetcher.cache_path(DatasetKind::SingleLevels, date, &[14, 15, 16], &portugal());
        assert!(!cached.exists());
        assert_eq!(fetcher.open(&first).unwrap().times.len(), 2);

        // the archive catches up: the next request goes back to it and is kept
        *client.available.lock().unwrap() = None;
        let second = fetcher.fetch(DatasetKind::SingleLevels, date, &[14, 15, 16], &portugal()).unwrap();
        assert!(!second.from_cache);
        assert!(second.warnings.is_empty());
        assert_eq!(second.path, cached);
        assert_eq!(fetcher.open(&second).unwrap().times.len(), 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        let third = fetcher.fetch(DatasetKind::SingleLevels, date, &[14, 15, 16], &portugal()).unwrap();
        assert!(third.from_cache);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn daily_reply_without_times_is_not_cached() {
        let (fetcher, client) = fetcher("empty-daily", false);
        let date = NaiveDate::from_ymd_opt(2023, 8, 15).unwrap();
        *client.available.lock().unwrap() = Some(vec![]);
        let outcome = fetcher.fetch(DatasetKind::FireIndex, date, &[], &portugal()).unwrap();
        assert!(fetcher.open(&outcome).unwrap().times.is_empty());
        assert!(!fetcher.cache_path(DatasetKind::FireIndex, date, &[], &portugal()).exists());
    }

    #[test]
    fn requests_carry_the_product_parameters() {
        let date = NaiveDate::from_ymd_opt(2023, 8, 15).unwrap();
        let request = build_request(DatasetKind::PressureLevels, date, &[14, 15], &portugal(), "json");
        assert_eq!(request["pressure_level"], json!(["950", "850", "700"]));
        assert_eq!(request["time"], json!(["14:00", "15:00"]));
        assert_eq!(request["month"], json!(["08"]));
        let fwi = build_request(DatasetKind::FireIndex, date, &[14], &portugal(), "json");
        assert!(fwi.get("time").is_none());
    }
}
