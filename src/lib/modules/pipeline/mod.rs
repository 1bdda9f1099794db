//! Per-request state machine:
//! check coverage, then either read the cached slice or compute the missing
//! window (fetch, harmonize, derive, mask, average, predict), merge it and read.

pub mod assemble;
pub mod config;
pub mod progress;

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::{debug, info, trace, warn};
use strum::IntoEnumIterator;

use crate::{
    error::{RosError, RosResult},
    io::statics::StaticLayers,
    models::{
        dataset::{DatasetKind, RawSourceDataset},
        field::FieldSet,
        grid::SpatialGrid,
        time::TimeAxis,
        variables::{Column, DURATION, FIRE_START},
    },
    modules::{
        cache::{
            merge::{MergeStats, TableSlice},
            CacheStore, WriteGuard,
        },
        derive,
        fetch::{client::ArchiveClient, SourceFetcher},
        harmonize::{align_fields, harmonize},
        mask::{boundary::Boundary, CoverageMask, MaskCache},
        predict::{features::FeatureMap, models::Predictor},
        temporal::{available_hours, cumulative_average, InsufficientHistory},
    },
};

use assemble::{hourly_fragment, static_fields, table_fragment, window};
use config::PipelineConfig;
use progress::{CancellationToken, ProgressCallback, Stage};

/// One prediction request: the window starting at `start_time` (rounded up to
/// the hour) with buckets 1..=`duration_hours`, for a fire started
/// `fire_start_offset` minutes before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionRequest {
    pub start_time: DateTime<Utc>,
    pub duration_hours: u32,
    pub fire_start_offset: u32,
}

impl PredictionRequest {
    pub fn new(start_time: DateTime<Utc>, duration_hours: u32, fire_start_offset: u32) -> Self {
        PredictionRequest {
            start_time,
            duration_hours,
            fire_start_offset,
        }
    }

    pub fn validate(&self) -> RosResult<()> {
        if self.duration_hours == 0 {
            return Err(RosError::Config("duration must be at least one hour".into()));
        }
        Ok(())
    }

    pub fn durations(&self) -> Vec<u32> {
        (1..=self.duration_hours).collect()
    }
}

/// What a request produced and how
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub start_time: DateTime<Utc>,
    pub slice: TableSlice,
    /// the slice was already in the table, nothing was computed
    pub cache_hit: bool,
    /// archive calls made, cached source files excluded
    pub archive_fetches: usize,
    pub warnings: Vec<String>,
    pub low_confidence: Vec<String>,
    pub insufficient: Option<InsufficientHistory>,
    pub merge: Option<MergeStats>,
}

#[derive(Debug, Default)]
struct Computation {
    archive_fetches: usize,
    warnings: Vec<String>,
    low_confidence: Vec<String>,
    insufficient: Option<InsufficientHistory>,
    merge: Option<MergeStats>,
}

/// Explicitly constructed context of the prediction pipeline.
/// Owns the cache store, the fetcher and the memoized masks.
pub struct Pipeline {
    config: PipelineConfig,
    grid: Arc<SpatialGrid>,
    store: CacheStore,
    fetcher: SourceFetcher,
    predictor: Arc<dyn Predictor>,
    feature_map: FeatureMap,
    boundary: Option<Boundary>,
    statics: Option<StaticLayers>,
    masks: MaskCache,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        client: Arc<dyn ArchiveClient>,
        predictor: Arc<dyn Predictor>,
    ) -> RosResult<Self> {
        let grid = Arc::new(config.grid.build()?);
        let feature_map =
            FeatureMap::new(config.feature_map_version)?.with_overrides(&config.feature_overrides);
        let boundary = config
            .boundary
            .as_deref()
            .map(Boundary::from_file)
            .transpose()?;
        let statics = config
            .static_layers
            .as_deref()
            .map(StaticLayers::from_file)
            .transpose()?;
        let fetcher = SourceFetcher::new(config.fetch.clone(), client)?;
        let store = CacheStore::new(config.cache.clone(), grid.as_ref().clone());
        info!(
            "Pipeline on grid {:?} {}, model {}",
            grid.shape(),
            config.grid.bbox,
            predictor.name()
        );
        Ok(Pipeline {
            config,
            grid,
            store,
            fetcher,
            predictor,
            feature_map,
            boundary,
            statics,
            masks: MaskCache::new(),
        })
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn with_static_layers(mut self, layers: StaticLayers) -> Self {
        self.statics = Some(layers);
        self
    }

    /// fix the date used for the archive latency check
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.fetcher = self.fetcher.with_today(today);
        self
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Fail early when the model asks for features no column provides.
    pub fn check_features(&self) -> RosResult<()> {
        let statics = Column::statics();
        let mut columns: Vec<String> = Column::iter()
            .filter(|c| !matches!(c, Column::Predictions | Column::LinearPrediction))
            .filter(|c| !statics.contains(c))
            .map(|c| c.to_string())
            .collect();
        if let Some(layers) = &self.statics {
            columns.extend(
                statics
                    .iter()
                    .map(|c| c.to_string())
                    .filter(|name| layers.variables.contains_key(name)),
            );
        }
        columns.push(DURATION.to_string());
        columns.push(FIRE_START.to_string());

        let known: HashSet<&str> = columns
            .iter()
            .map(|c| self.feature_map.feature_for(c))
            .collect();
        let missing: Vec<String> = self
            .predictor
            .feature_names()
            .iter()
            .filter(|f| !known.contains(f.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(RosError::FeatureMismatch { missing });
        }
        Ok(())
    }

    fn coverage_mask(&self) -> RosResult<Option<Arc<CoverageMask>>> {
        self.boundary
            .as_ref()
            .map(|boundary| self.masks.get_or_build(&self.grid, boundary))
            .transpose()
    }

    fn cached(&self, start: DateTime<Utc>, durations: &[u32], offset: u32) -> RosResult<Option<RequestOutcome>> {
        let coverage = self.store.check_coverage(&start, durations, offset)?;
        if !coverage.is_complete() {
            debug!(
                "[PIPELINE] durations {:?} not covered for {}",
                coverage.missing, start
            );
            return Ok(None);
        }
        info!("Cache hit for {} durations {:?}", start.format("%Y-%m-%d %H:%M"), durations);
        Ok(Some(RequestOutcome {
            start_time: start,
            slice: self.store.read_slice(&start, durations, offset)?,
            cache_hit: true,
            archive_fetches: 0,
            warnings: vec![],
            low_confidence: vec![],
            insufficient: None,
            merge: None,
        }))
    }

    /// Serve the request from the table, computing and merging what is missing.
    pub fn run(
        &self,
        request: &PredictionRequest,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> RosResult<RequestOutcome> {
        let run_start = Utc::now();
        request.validate()?;
        self.check_features()?;

        let axis = TimeAxis::for_window(request.start_time, request.duration_hours);
        let start = *axis
            .first()
            .ok_or_else(|| RosError::Config("empty request window".into()))?;
        let durations = request.durations();
        let offset = request.fire_start_offset;
        info!(
            "Processing {} for {} hours, fire started {} min before",
            start.format("%Y-%m-%d %H:%M"),
            request.duration_hours,
            offset
        );

        progress.on_stage(Stage::CheckCoverage);
        if let Some(outcome) = self.cached(start, &durations, offset)? {
            return Ok(outcome);
        }

        let guard = self.store.lock()?;
        // a concurrent writer may have filled the window while we waited
        if let Some(outcome) = self.cached(start, &durations, offset)? {
            return Ok(outcome);
        }
        let computation = self.compute_missing(&guard, &axis, request, progress, cancel)?;
        drop(guard);

        progress.on_stage(Stage::ReadSlice);
        let slice = self.store.read_slice(&start, &durations, offset)?;
        trace!("Request took {} seconds", Utc::now() - run_start);
        Ok(RequestOutcome {
            start_time: start,
            slice,
            cache_hit: false,
            archive_fetches: computation.archive_fetches,
            warnings: computation.warnings,
            low_confidence: computation.low_confidence,
            insufficient: computation.insufficient,
            merge: computation.merge,
        })
    }

    fn compute_missing(
        &self,
        guard: &WriteGuard<'_>,
        axis: &TimeAxis,
        request: &PredictionRequest,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
    ) -> RosResult<Computation> {
        let mut computation = Computation::default();
        let mask = self.coverage_mask()?;
        let wind = Column::WindSpeed100m.to_string();

        let hourly = self.store.load_hourly()?;
        let missing: Vec<DateTime<Utc>> = axis
            .times()
            .iter()
            .filter(|t| !hourly.has_hour(t, &wind))
            .copied()
            .collect();

        if !missing.is_empty() {
            let missing = TimeAxis::from_times(missing)?;
            debug!("[PIPELINE] {} hours missing from the hourly store", missing.len());
            let fields = self.fetch_fields(&missing, progress, cancel, &mut computation)?;

            progress.on_stage(Stage::Derive);
            let derived = derive::compute(&fields)?;
            computation.low_confidence = derived.low_confidence();
            let fragment = hourly_fragment(&self.grid, missing.times().to_vec(), &derived, mask.as_deref())?;
            self.store.merge_hourly(guard, &fragment)?;
        }

        progress.on_stage(Stage::Assemble);
        let hourly = self.store.load_hourly()?;
        let (hourly_window, has_data) = window(&hourly, axis);
        let available = available_hours(&has_data);
        if available == 0 {
            return Err(RosError::InsufficientHistory {
                requested: request.duration_hours,
                available,
            });
        }
        let averages = cumulative_average(
            &hourly_window,
            request.duration_hours,
            available,
            self.config.history_policy,
        );
        if let Some(insufficient) = averages.insufficient {
            computation
                .warnings
                .push(RosError::from(insufficient).to_string());
            computation.insufficient = Some(insufficient);
        }

        let start = *axis
            .first()
            .ok_or_else(|| RosError::Config("empty request window".into()))?;
        let statics = match &self.statics {
            Some(layers) => static_fields(layers, &self.grid, start.year(), mask.as_deref())?,
            None => BTreeMap::new(),
        };

        progress.on_stage(Stage::Predict);
        let fragment = table_fragment(
            start,
            request.fire_start_offset,
            &self.grid,
            &averages,
            &statics,
            self.predictor.as_ref(),
            &self.feature_map,
            mask.as_deref(),
        )?;

        progress.on_stage(Stage::Merge);
        computation.merge = Some(self.store.merge_append(guard, &fragment)?);
        Ok(computation)
    }

    /// Fetch every product for the missing hours and harmonize it onto one
    /// snapshot. Optional products that cannot be fetched are skipped.
    fn fetch_fields(
        &self,
        missing: &TimeAxis,
        progress: &dyn ProgressCallback,
        cancel: &CancellationToken,
        computation: &mut Computation,
    ) -> RosResult<FieldSet> {
        let days = missing.by_date();
        let bbox = self.config.grid.bbox;
        let total = DatasetKind::iter().count() * days.len();
        let mut fields = FieldSet::new(self.grid.clone(), missing.times().to_vec());

        let mut done = 0;
        for kind in DatasetKind::iter() {
            let mut parts: Vec<RawSourceDataset> = vec![];
            let mut complete = true;
            progress.on_stage(Stage::Fetch);
            for (date, hours) in &days {
                cancel.check()?;
                progress.on_fetch(kind, *date, done, total);
                done += 1;
                match self.fetcher.fetch(kind, *date, hours, &bbox) {
                    Ok(outcome) => {
                        if !outcome.from_cache {
                            computation.archive_fetches += 1;
                        }
                        computation.warnings.extend(outcome.warnings.iter().cloned());
                        parts.push(self.fetcher.open(&outcome)?);
                    }
                    Err(err) if !kind.is_required() => {
                        warn!("Skipping {}: {}", kind, err);
                        computation.warnings.push(err.to_string());
                        complete = false;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if !complete || parts.is_empty() {
                continue;
            }

            progress.on_stage(Stage::Harmonize);
            let dataset = RawSourceDataset::concat(parts)?;
            let harmonized = harmonize(&dataset, &self.grid, &self.config.harmonize)?;
            for field in align_fields(harmonized, missing.times(), kind.is_daily()) {
                fields.insert(field)?;
            }
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::grid::BoundingBox,
        modules::{
            cache::config::CacheConfig,
            fetch::{client::MirrorArchiveClient, config::FetchConfig},
            predict::models::{Coefficient, LinearModel},
        },
    };
    use chrono::TimeZone;

    fn pipeline(features: &[&str]) -> Pipeline {
        let dir = std::env::temp_dir().join(format!("roscube-pipeline-{}", std::process::id()));
        let config = PipelineConfig::new(
            BoundingBox::new(41.0, -9.0, 40.0, -8.0).unwrap(),
            CacheConfig::new(dir.join("cache")),
            FetchConfig::new(dir.join("sources")),
        );
        let model = LinearModel::new(
            "lm",
            0.0,
            features
                .iter()
                .map(|f| Coefficient {
                    feature: f.to_string(),
                    weight: 1.0,
                })
                .collect(),
        );
        Pipeline::new(config, Arc::new(MirrorArchiveClient::new(dir.join("mirror"))), Arc::new(model)).unwrap()
    }

    #[test]
    fn zero_duration_is_refused() {
        let start = Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap();
        assert!(PredictionRequest::new(start, 0, 0).validate().is_err());
        assert_eq!(PredictionRequest::new(start, 3, 0).durations(), vec![1, 2, 3]);
    }

    #[test]
    fn static_features_need_static_layers() {
        let p = pipeline(&["wv100_k_av", "duration_p", "f_start"]);
        assert!(p.check_features().is_ok());

        let p = pipeline(&["wv100_k_av", "f_load_av", "slope"]);
        match p.check_features().unwrap_err() {
            RosError::FeatureMismatch { missing } => assert_eq!(missing, vec!["f_load_av", "slope"]),
            other => panic!("unexpected error {other}"),
        }
    }
}
