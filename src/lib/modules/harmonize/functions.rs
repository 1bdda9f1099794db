use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};

use crate::{
    constants::{COORD_TOLERANCE, MISSING},
    models::grid::SpatialGrid,
};

use super::config::TemporalPolicy;

/// Locate `x` on a strictly monotonic axis.
/// Returns the bracketing indices and the weight of the second one;
/// a coordinate within tolerance of a node snaps onto it.
pub fn axis_position(axis: &[f32], x: f32) -> Option<(usize, usize, f32)> {
    if let Some(k) = axis.iter().position(|v| (v - x).abs() <= COORD_TOLERANCE) {
        return Some((k, k, 0.0));
    }
    if axis.len() < 2 {
        return None;
    }
    let ascending = axis[1] > axis[0];
    let idx = axis.partition_point(|v| if ascending { *v < x } else { *v > x });
    if idx == 0 || idx == axis.len() {
        return None;
    }
    let (a, b) = (axis[idx - 1], axis[idx]);
    Some((idx - 1, idx, (x - a) / (b - a)))
}

fn terms(i0: usize, i1: usize, w: f32) -> Vec<(usize, f32)> {
    if i0 == i1 {
        vec![(i0, 1.0)]
    } else {
        [(i0, 1.0 - w), (i1, w)]
            .into_iter()
            .filter(|(_, w)| *w > 0.0)
            .collect()
    }
}

/// Bilinear interpolation of a regular source (rows on `src_lats`, cols on
/// `src_lons`) onto `grid`. Targets outside the source extent are missing;
/// a missing corner with non-zero weight makes the target missing.
pub fn bilinear_regrid(
    src_lats: &[f32],
    src_lons: &[f32],
    values: ArrayView2<f32>,
    grid: &SpatialGrid,
) -> Array2<f32> {
    let lat_pos: Vec<Option<Vec<(usize, f32)>>> = grid
        .lats()
        .iter()
        .map(|lat| axis_position(src_lats, *lat).map(|(i0, i1, w)| terms(i0, i1, w)))
        .collect();
    let lon_pos: Vec<Option<Vec<(usize, f32)>>> = grid
        .lons()
        .iter()
        .map(|lon| axis_position(src_lons, *lon).map(|(j0, j1, w)| terms(j0, j1, w)))
        .collect();

    let mut out = Array2::from_elem(grid.shape(), MISSING);
    Zip::indexed(&mut out).par_for_each(|(r, c), target| {
        let (Some(rows), Some(cols)) = (&lat_pos[r], &lon_pos[c]) else {
            return;
        };
        let mut acc = 0.0;
        for (i, wi) in rows {
            for (j, wj) in cols {
                let v = values[[*i, *j]];
                if v.is_nan() {
                    return;
                }
                acc += wi * wj * v;
            }
        }
        *target = acc;
    });
    out
}

/// Put a (time, lat, lon) series on the target axis.
/// Target instants without a matching source instant are missing, except
/// with forward fill where the latest earlier source instant persists.
/// Nothing is ever filled backwards.
pub fn align_to_axis(
    source_times: &[DateTime<Utc>],
    data: &Array3<f32>,
    target: &[DateTime<Utc>],
    policy: TemporalPolicy,
) -> Array3<f32> {
    let (_, rows, cols) = data.dim();
    let mut out = Array3::from_elem((target.len(), rows, cols), MISSING);
    for (t, time) in target.iter().enumerate() {
        let src = match policy {
            TemporalPolicy::Exact => source_times.binary_search(time).ok(),
            TemporalPolicy::ForwardFill => {
                let idx = source_times.partition_point(|s| s <= time);
                idx.checked_sub(1)
            }
        };
        if let Some(s) = src {
            out.index_axis_mut(Axis(0), t)
                .assign(&data.index_axis(Axis(0), s));
        }
    }
    out
}
