use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use ndarray::{concatenate, Array4, ArrayView4, Axis};
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    constants::COORD_TOLERANCE,
    error::{RosError, RosResult},
    models::grid::normalize_longitude,
};

/// External products the pipeline knows how to request
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumString, Display, Serialize, Deserialize,
)]
pub enum DatasetKind {
    SingleLevels,
    PressureLevels,
    FireIndex,
}

const SINGLE_LEVEL_VARIABLES: [&str; 7] = ["u100", "v100", "cape", "swvl3", "sp", "t2m", "d2m"];
const PRESSURE_LEVEL_VARIABLES: [&str; 4] = ["z", "t", "u", "v"];
const PRESSURE_LEVELS: [u32; 3] = [950, 850, 700];
const FIRE_INDEX_VARIABLES: [&str; 1] = ["fwinx"];

impl DatasetKind {
    /// archive identifier of the product
    pub fn dataset_id(&self) -> &'static str {
        match self {
            DatasetKind::SingleLevels => "reanalysis-era5-single-levels",
            DatasetKind::PressureLevels => "reanalysis-era5-pressure-levels",
            DatasetKind::FireIndex => "cems-fire-historical-v1",
        }
    }

    pub fn file_prefix(&self) -> &'static str {
        match self {
            DatasetKind::SingleLevels => "ERA5_SL",
            DatasetKind::PressureLevels => "ERA5_PL",
            DatasetKind::FireIndex => "CEMS_FWI",
        }
    }

    /// daily products describe a whole day with one value
    pub fn is_daily(&self) -> bool {
        matches!(self, DatasetKind::FireIndex)
    }

    /// the 100 m wind drives the core formula, the request fails without it
    pub fn is_required(&self) -> bool {
        matches!(self, DatasetKind::SingleLevels)
    }

    pub fn variables(&self) -> &'static [&'static str] {
        match self {
            DatasetKind::SingleLevels => &SINGLE_LEVEL_VARIABLES,
            DatasetKind::PressureLevels => &PRESSURE_LEVEL_VARIABLES,
            DatasetKind::FireIndex => &FIRE_INDEX_VARIABLES,
        }
    }

    pub fn levels(&self) -> &'static [u32] {
        match self {
            DatasetKind::PressureLevels => &PRESSURE_LEVELS,
            _ => &[],
        }
    }
}

/// Spatial arrangement of the source points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceLayout {
    /// rows follow `lats`, columns follow `lons`
    Regular { lats: Vec<f32>, lons: Vec<f32> },
    /// one row, one column per point
    Scattered { lats: Vec<f32>, lons: Vec<f32> },
}

fn same_coords(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= COORD_TOLERANCE)
}

impl SourceLayout {
    /// (rows, cols) of the spatial part of the arrays
    pub fn shape(&self) -> (usize, usize) {
        match self {
            SourceLayout::Regular { lats, lons } => (lats.len(), lons.len()),
            SourceLayout::Scattered { lons, .. } => (1, lons.len()),
        }
    }

    pub fn is_scattered(&self) -> bool {
        matches!(self, SourceLayout::Scattered { .. })
    }

    fn same_as(&self, other: &SourceLayout) -> bool {
        match (self, other) {
            (
                SourceLayout::Regular { lats, lons },
                SourceLayout::Regular {
                    lats: lats2,
                    lons: lons2,
                },
            )
            | (
                SourceLayout::Scattered { lats, lons },
                SourceLayout::Scattered {
                    lats: lats2,
                    lons: lons2,
                },
            ) => same_coords(lats, lats2) && same_coords(lons, lons2),
            _ => false,
        }
    }
}

/// A bundle of source fields indexed by (time, level, row, col).
/// Datasets without pressure levels have a level axis of length one.
#[derive(Debug, Clone)]
pub struct RawSourceDataset {
    pub kind: DatasetKind,
    pub times: Vec<DateTime<Utc>>,
    pub levels: Vec<u32>,
    pub layout: SourceLayout,
    pub variables: BTreeMap<String, Array4<f32>>,
}

impl RawSourceDataset {
    pub fn new(
        kind: DatasetKind,
        times: Vec<DateTime<Utc>>,
        levels: Vec<u32>,
        layout: SourceLayout,
        variables: BTreeMap<String, Array4<f32>>,
    ) -> RosResult<Self> {
        let dataset = RawSourceDataset {
            kind,
            times,
            levels,
            layout,
            variables,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// expected (time, level, row, col) shape of every variable
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        let (rows, cols) = self.layout.shape();
        (self.times.len(), self.levels.len().max(1), rows, cols)
    }

    pub fn validate(&self) -> RosResult<()> {
        if let SourceLayout::Scattered { lats, lons } = &self.layout {
            if lats.len() != lons.len() {
                return Err(RosError::format(
                    self.kind.to_string(),
                    "scattered layout needs one latitude per longitude",
                ));
            }
        }
        if !self.times.iter().tuple_windows().all(|(a, b)| b > a) {
            return Err(RosError::format(
                self.kind.to_string(),
                "times must be strictly increasing",
            ));
        }
        let (nt, nl, nr, nc) = self.shape();
        for (name, data) in &self.variables {
            if data.dim() != (nt, nl, nr, nc) {
                return Err(RosError::format(
                    self.kind.to_string(),
                    format!(
                        "variable {} has shape {:?}, expected {:?}",
                        name,
                        data.dim(),
                        (nt, nl, nr, nc)
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Array4<f32>> {
        self.variables.get(name)
    }

    pub fn level_index(&self, level: u32) -> Option<usize> {
        self.levels.iter().position(|l| *l == level)
    }

    /// Move every longitude to the -180..180 range, reordering regular columns
    /// so that they stay ascending.
    pub fn normalize_longitudes(self) -> RosResult<Self> {
        let RawSourceDataset {
            kind,
            times,
            levels,
            layout,
            variables,
        } = self;

        match layout {
            SourceLayout::Scattered { lats, lons } => {
                let lons = lons.into_iter().map(normalize_longitude).collect();
                RawSourceDataset::new(
                    kind,
                    times,
                    levels,
                    SourceLayout::Scattered { lats, lons },
                    variables,
                )
            }
            SourceLayout::Regular { lats, lons } => {
                let normalized: Vec<f32> = lons.iter().copied().map(normalize_longitude).collect();
                let order: Vec<usize> = (0..normalized.len())
                    .sorted_by(|a, b| normalized[*a].total_cmp(&normalized[*b]))
                    .collect();
                let sorted: Vec<f32> = order.iter().map(|i| normalized[*i]).collect();
                if sorted.iter().tuple_windows().any(|(a, b)| (b - a).abs() <= COORD_TOLERANCE) {
                    return Err(RosError::format(
                        kind.to_string(),
                        "longitudes overlap once normalized to -180..180",
                    ));
                }
                let identity = order.iter().enumerate().all(|(i, j)| i == *j);
                let variables = if identity {
                    variables
                } else {
                    variables
                        .into_iter()
                        .map(|(name, data)| (name, data.select(Axis(3), &order)))
                        .collect()
                };
                RawSourceDataset::new(
                    kind,
                    times,
                    levels,
                    SourceLayout::Regular { lats, lons: sorted },
                    variables,
                )
            }
        }
    }

    /// Join datasets of the same product along time.
    /// Times are sorted and, on duplicates, the first dataset in `parts` wins.
    pub fn concat(parts: Vec<RawSourceDataset>) -> RosResult<Self> {
        let first = parts
            .first()
            .ok_or_else(|| RosError::format("dataset", "nothing to concatenate"))?;
        let kind = first.kind;
        let layout = first.layout.clone();
        let levels = first.levels.clone();
        let names: Vec<String> = first.variables.keys().cloned().collect();

        for part in &parts[1..] {
            if part.kind != kind || part.levels != levels || !part.layout.same_as(&layout) {
                return Err(RosError::GridMismatch(format!(
                    "{} files do not share the same layout",
                    kind
                )));
            }
        }

        let picks: Vec<(DateTime<Utc>, usize, usize)> = parts
            .iter()
            .enumerate()
            .flat_map(|(p, part)| part.times.iter().enumerate().map(move |(t, time)| (*time, p, t)))
            .sorted_by_key(|(time, p, _)| (*time, *p))
            .dedup_by(|a, b| a.0 == b.0)
            .collect();
        let times: Vec<DateTime<Utc>> = picks.iter().map(|(time, _, _)| *time).collect();

        let mut variables = BTreeMap::new();
        for name in names {
            if picks.is_empty() {
                // every part is empty: keep the spatial shape with no instants
                let dim = first.variables[&name].dim();
                variables.insert(name, Array4::zeros((0, dim.1, dim.2, dim.3)));
                continue;
            }
            let mut views: Vec<ArrayView4<f32>> = Vec::with_capacity(picks.len());
            for (_, p, t) in &picks {
                let data = parts[*p].variables.get(&name).ok_or_else(|| {
                    RosError::format(kind.to_string(), format!("variable {} missing in one file", name))
                })?;
                views.push(data.slice_axis(Axis(0), (*t..*t + 1).into()));
            }
            let joined = concatenate(Axis(0), &views)
                .map_err(|err| RosError::format(kind.to_string(), err))?;
            variables.insert(name, joined);
        }

        RawSourceDataset::new(kind, times, levels, layout, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ndarray::Array;

    fn regular(lons: Vec<f32>, t0: DateTime<Utc>, hours: usize, offset: f32) -> RawSourceDataset {
        let ncols = lons.len();
        let data = Array::from_shape_fn((hours, 1, 2, ncols), |(t, _, r, c)| {
            offset + (t * 100 + r * 10 + c) as f32
        });
        RawSourceDataset::new(
            DatasetKind::SingleLevels,
            (0..hours as i64).map(|h| t0 + Duration::hours(h)).collect(),
            vec![],
            SourceLayout::Regular {
                lats: vec![41.0, 40.0],
                lons,
            },
            BTreeMap::from([("u100".to_string(), data)]),
        )
        .expect("valid dataset")
    }

    #[test]
    fn normalizing_reorders_columns() {
        let t0 = Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap();
        let ds = regular(vec![170.0, 190.0, 200.0], t0, 1, 0.0)
            .normalize_longitudes()
            .expect("normalized");
        let SourceLayout::Regular { lons, .. } = &ds.layout else {
            panic!("layout changed")
        };
        assert_eq!(lons, &vec![-170.0, -160.0, 170.0]);
        let u = ds.variable("u100").unwrap();
        // former column 1 (190°) is now first
        assert_eq!(u[[0, 0, 0, 0]], 1.0);
        assert_eq!(u[[0, 0, 0, 2]], 0.0);
    }

    #[test]
    fn concat_keeps_first_on_duplicate_times() {
        let t0 = Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap();
        let a = regular(vec![-9.0, -8.0], t0 + Duration::hours(1), 2, 0.0);
        let b = regular(vec![-9.0, -8.0], t0, 2, 1000.0);
        let joined = RawSourceDataset::concat(vec![a, b]).expect("joined");
        assert_eq!(joined.times.len(), 3);
        assert_eq!(joined.times[0], t0);
        let u = joined.variable("u100").unwrap();
        assert_eq!(u[[0, 0, 0, 0]], 1000.0);
        // 01:00 exists in both, the first part wins
        assert_eq!(u[[1, 0, 0, 0]], 0.0);
        assert_eq!(u[[2, 0, 0, 0]], 100.0);
    }

    #[test]
    fn concat_of_empty_files_has_no_times() {
        let t0 = Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap();
        let a = regular(vec![-9.0, -8.0], t0, 0, 0.0);
        let b = regular(vec![-9.0, -8.0], t0, 0, 0.0);
        let joined = RawSourceDataset::concat(vec![a, b]).expect("joined");
        assert!(joined.times.is_empty());
        assert_eq!(joined.variable("u100").unwrap().dim(), (0, 1, 2, 2));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let t0 = Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap();
        let res = RawSourceDataset::new(
            DatasetKind::FireIndex,
            vec![t0],
            vec![],
            SourceLayout::Scattered {
                lats: vec![40.0, 41.0],
                lons: vec![-8.0, -9.0],
            },
            BTreeMap::from([("fwinx".to_string(), Array4::zeros((1, 1, 1, 3)))]),
        );
        assert!(res.is_err());
    }
}
