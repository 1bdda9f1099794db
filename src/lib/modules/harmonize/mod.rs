//! Resampling of heterogeneous source datasets onto the canonical grid.

pub mod config;
pub mod functions;
pub mod scattered;

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use ndarray::{s, Array2, Array3, ArrayView3, Axis};

use crate::{
    error::RosResult,
    models::{
        dataset::{RawSourceDataset, SourceLayout},
        field::{FieldKey, HarmonizedField},
        grid::SpatialGrid,
        time::floor_day,
    },
};

use config::{HarmonizeConfig, TemporalPolicy};
use functions::{align_to_axis, bilinear_regrid};
use scattered::ScatteredInterpolator;

/// (time, row, col) view of a variable at one pressure level.
/// None when the variable or the level is not in the dataset.
pub fn select_level<'a>(
    dataset: &'a RawSourceDataset,
    name: &str,
    level: Option<u32>,
) -> Option<ArrayView3<'a, f32>> {
    let data = dataset.variable(name)?;
    let idx = match level {
        Some(level) => dataset.level_index(level)?,
        None if dataset.levels.is_empty() => 0,
        None => return None,
    };
    Some(data.index_axis(Axis(1), idx))
}

fn regrid_scattered(
    lats: &[f32],
    lons: &[f32],
    values: ArrayView3<f32>,
    grid: &SpatialGrid,
    config: &HarmonizeConfig,
    interpolators: &mut HashMap<Vec<bool>, Arc<ScatteredInterpolator>>,
) -> Array3<f32> {
    let (nt, _, _) = values.dim();
    let (rows, cols) = grid.shape();
    let mut out = Array3::zeros((nt, rows, cols));
    for t in 0..nt {
        let slice: Vec<f32> = values.slice(s![t, 0, ..]).iter().copied().collect();
        let valid: Vec<bool> = slice.iter().map(|v| !v.is_nan()).collect();
        // the triangulation only depends on which points are valid
        let interp = interpolators
            .entry(valid)
            .or_insert_with_key(|valid| Arc::new(ScatteredInterpolator::new(lats, lons, valid)))
            .clone();
        let regridded: Array2<f32> = interp.regrid(&slice, grid, config.scattered_fallback);
        out.index_axis_mut(Axis(0), t).assign(&regridded);
    }
    out
}

/// Resample every variable (and pressure level) of `dataset` onto `grid`.
/// Longitudes are normalized to -180..180 first. The output keeps the source
/// time instants; use [`align_fields`] to put them on the request axis.
pub fn harmonize(
    dataset: &RawSourceDataset,
    grid: &Arc<SpatialGrid>,
    config: &HarmonizeConfig,
) -> RosResult<Vec<HarmonizedField>> {
    let start = Utc::now();
    let dataset = dataset.clone().normalize_longitudes()?;
    let levels: Vec<Option<u32>> = if dataset.levels.is_empty() {
        vec![None]
    } else {
        dataset.levels.iter().map(|l| Some(*l)).collect()
    };

    let mut interpolators = HashMap::new();
    let mut fields = vec![];
    for name in dataset.variables.keys() {
        for level in &levels {
            let Some(values) = select_level(&dataset, name, *level) else {
                continue;
            };
            let data = match &dataset.layout {
                SourceLayout::Regular { lats, lons } => {
                    let (nt, _, _) = values.dim();
                    let (rows, cols) = grid.shape();
                    let mut out = Array3::zeros((nt, rows, cols));
                    for t in 0..nt {
                        let regridded = bilinear_regrid(lats, lons, values.index_axis(Axis(0), t), grid);
                        out.index_axis_mut(Axis(0), t).assign(&regridded);
                    }
                    out
                }
                SourceLayout::Scattered { lats, lons } => {
                    regrid_scattered(lats, lons, values, grid, config, &mut interpolators)
                }
            };
            let key = match level {
                Some(level) => FieldKey::at_level(name, *level),
                None => FieldKey::surface(name),
            };
            trace!("[HARMONIZE] {} {} -> {:?}", dataset.kind, key, data.dim());
            fields.push(HarmonizedField {
                key,
                grid: grid.clone(),
                times: dataset.times.clone(),
                data,
            });
        }
    }
    debug!(
        "[HARMONIZE] {} fields of {} resampled in {} ms",
        fields.len(),
        dataset.kind,
        (Utc::now() - start).num_milliseconds()
    );
    Ok(fields)
}

/// Align harmonized fields to the hourly request axis.
/// Daily products are forward filled from 00:00 UTC of their day, whatever
/// the hour of their stamp; the others are taken at matching hours.
pub fn align_fields(
    fields: Vec<HarmonizedField>,
    target: &[DateTime<Utc>],
    daily: bool,
) -> Vec<HarmonizedField> {
    let policy = if daily {
        TemporalPolicy::ForwardFill
    } else {
        TemporalPolicy::Exact
    };
    fields
        .into_iter()
        .map(|field| {
            let source_times: Vec<DateTime<Utc>> = if daily {
                field.times.iter().map(|t| floor_day(*t)).collect()
            } else {
                field.times.clone()
            };
            let data = align_to_axis(&source_times, &field.data, target, policy);
            HarmonizedField {
                key: field.key,
                grid: field.grid,
                times: target.to_vec(),
                data,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{dataset::DatasetKind, grid::BoundingBox};
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;
    use ndarray::Array4;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap()
    }

    fn target_grid() -> Arc<SpatialGrid> {
        Arc::new(SpatialGrid::new(&BoundingBox::new(41.0, -161.0, 40.0, -159.0).unwrap(), 0.5).unwrap())
    }

    fn regular_source(lons: Vec<f32>) -> RawSourceDataset {
        let lats = vec![41.0, 40.5, 40.0];
        let data = Array4::from_shape_fn((1, 1, 3, lons.len()), |(_, _, r, c)| (r * 10 + c) as f32);
        RawSourceDataset::new(
            DatasetKind::SingleLevels,
            vec![t0()],
            vec![],
            SourceLayout::Regular { lats, lons },
            BTreeMap::from([("t2m".to_string(), data)]),
        )
        .unwrap()
    }

    #[test]
    fn longitude_conventions_give_the_same_field() {
        let grid = target_grid();
        let east = regular_source(vec![199.0, 199.5, 200.0, 200.5, 201.0]);
        let west = regular_source(vec![-161.0, -160.5, -160.0, -159.5, -159.0]);
        let config = HarmonizeConfig::default();
        let a = harmonize(&east, &grid, &config).unwrap();
        let b = harmonize(&west, &grid, &config).unwrap();
        assert_eq!(a[0].data, b[0].data);
        let (r, c) = grid.locate(40.5, 200.0).unwrap();
        assert_abs_diff_eq!(a[0].data[[0, r, c]], 12.0);
    }

    #[test]
    fn pressure_levels_become_separate_fields() {
        let grid = target_grid();
        let lats = vec![41.0, 40.0];
        let lons = vec![-161.0, -159.0];
        let data = Array4::from_shape_fn((1, 2, 2, 2), |(_, l, _, _)| if l == 0 { 850.0 } else { 700.0 });
        let ds = RawSourceDataset::new(
            DatasetKind::PressureLevels,
            vec![t0()],
            vec![850, 700],
            SourceLayout::Regular { lats, lons },
            BTreeMap::from([("t".to_string(), data)]),
        )
        .unwrap();
        assert!(select_level(&ds, "t", Some(950)).is_none());
        let fields = harmonize(&ds, &grid, &HarmonizeConfig::default()).unwrap();
        assert_eq!(fields.len(), 2);
        let f700 = fields.iter().find(|f| f.key == FieldKey::at_level("t", 700)).unwrap();
        assert!(f700.data.iter().all(|v| *v == 700.0));
    }

    #[test]
    fn daily_fields_are_forward_filled() {
        let grid = target_grid();
        let day = Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap();
        let field = HarmonizedField {
            key: FieldKey::surface("fwinx"),
            grid: grid.clone(),
            times: vec![day],
            data: Array3::from_elem((1, 3, 5), 7.0),
        };
        let target: Vec<_> = (0..3).map(|h| t0() + chrono::Duration::hours(h)).collect();
        let aligned = align_fields(vec![field], &target, true);
        assert_eq!(aligned[0].times, target);
        assert!(aligned[0].data.iter().all(|v| *v == 7.0));
    }

    #[test]
    fn daily_stamps_cover_their_whole_day() {
        let grid = target_grid();
        let day = Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap();
        let field = HarmonizedField {
            key: FieldKey::surface("fwinx"),
            grid: grid.clone(),
            times: vec![day + chrono::Duration::hours(12)],
            data: Array3::from_elem((1, 3, 5), 9.0),
        };
        let target: Vec<_> = (0..24).map(|h| day + chrono::Duration::hours(h)).collect();
        let aligned = align_fields(vec![field], &target, true);
        // hours before the 12:00 stamp take the value of their day too
        assert!(aligned[0].data.iter().all(|v| *v == 9.0));
    }
}
