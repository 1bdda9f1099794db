//! Cumulative running averages per duration bucket.

use std::collections::BTreeMap;

use log::{debug, warn};
use ndarray::{Array3, ArrayView3, Axis, Zip};
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{constants::MISSING, error::RosError};

/// What to do with buckets longer than the available history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
pub enum HistoryPolicy {
    /// buckets beyond the available hours are absent and reported
    #[default]
    Strict,
    /// buckets beyond the available hours average every available hour
    Truncate,
}

/// Record of buckets that could not be computed from enough hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientHistory {
    pub requested: u32,
    pub available: u32,
}

impl From<InsufficientHistory> for RosError {
    fn from(value: InsufficientHistory) -> Self {
        RosError::InsufficientHistory {
            requested: value.requested,
            available: value.available,
        }
    }
}

/// Averaged fields of one variable, dims (duration, lat, lon).
/// `durations[i]` is the bucket stored at index i.
#[derive(Debug, Clone)]
pub struct CumulativeAverages {
    pub durations: Vec<u32>,
    pub fields: BTreeMap<String, Array3<f32>>,
    pub insufficient: Option<InsufficientHistory>,
}

/// Number of leading hours holding data. Hours are counted from the start of
/// the window and the count stops at the first hour with no data at all.
pub fn available_hours(hour_has_data: &[bool]) -> u32 {
    hour_has_data.iter().take_while(|h| **h).count() as u32
}

/// Mean over the first `k` hours of every cell, skipping missing samples.
/// All samples missing gives a missing value.
pub fn bucket_mean(hourly: ArrayView3<f32>, k: usize) -> ndarray::Array2<f32> {
    let window = hourly.slice_axis(Axis(0), (0..k).into());
    let (_, rows, cols) = hourly.dim();
    let mut out = ndarray::Array2::from_elem((rows, cols), MISSING);
    Zip::from(&mut out)
        .and(window.lanes(Axis(0)))
        .par_for_each(|mean, lane| {
            let (sum, count) = lane
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0_f64, 0_u32), |(s, c), v| (s + *v as f64, c + 1));
            if count > 0 {
                *mean = (sum / count as f64) as f32;
            }
        });
    out
}

/// Cumulative averages for buckets 1..=max_duration of every hourly variable.
///
/// Bucket k is the mean of hours 0..k-1 and is computed directly from the
/// hourly series, so it does not depend on which other buckets are requested.
/// `available` is the number of leading hours that actually hold data.
pub fn cumulative_average(
    hourly: &BTreeMap<String, Array3<f32>>,
    max_duration: u32,
    available: u32,
    policy: HistoryPolicy,
) -> CumulativeAverages {
    let insufficient = (available < max_duration).then_some(InsufficientHistory {
        requested: max_duration,
        available,
    });
    let durations: Vec<u32> = match (policy, insufficient) {
        (HistoryPolicy::Strict, Some(_)) => (1..=available).collect(),
        _ => (1..=max_duration).collect(),
    };
    if let Some(missing) = insufficient {
        warn!(
            "Only {} of {} hours available, {} policy applied",
            missing.available, missing.requested, policy
        );
    }

    let fields = hourly
        .iter()
        .map(|(name, data)| {
            let (_, rows, cols) = data.dim();
            let mut out = Array3::from_elem((durations.len(), rows, cols), MISSING);
            for (idx, duration) in durations.iter().enumerate() {
                let hours = (*duration).min(available) as usize;
                if hours == 0 {
                    continue;
                }
                out.index_axis_mut(Axis(0), idx)
                    .assign(&bucket_mean(data.view(), hours));
            }
            (name.clone(), out)
        })
        .collect();

    debug!(
        "[TEMPORAL] buckets {:?} computed from {} hours",
        durations, available
    );
    CumulativeAverages {
        durations,
        fields,
        insufficient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn series(values: &[f32]) -> BTreeMap<String, Array3<f32>> {
        BTreeMap::from([(
            "wv100_kh".to_string(),
            Array3::from_shape_vec((values.len(), 1, 1), values.to_vec()).unwrap(),
        )])
    }

    #[test]
    fn bucket_k_is_the_mean_of_the_first_k_hours() {
        let hourly = series(&[10.0, 20.0, 60.0]);
        let avg = cumulative_average(&hourly, 3, 3, HistoryPolicy::Strict);
        let data = &avg.fields["wv100_kh"];
        assert_eq!(avg.durations, vec![1, 2, 3]);
        assert_abs_diff_eq!(data[[0, 0, 0]], 10.0);
        assert_abs_diff_eq!(data[[1, 0, 0]], 15.0);
        assert_abs_diff_eq!(data[[2, 0, 0]], 30.0);
        assert!(avg.insufficient.is_none());
    }

    #[test]
    fn shorter_buckets_do_not_change_with_longer_requests() {
        let hourly = series(&[1.3, 2.7, 3.1, 9.9, 0.4]);
        let short = cumulative_average(&hourly, 2, 5, HistoryPolicy::Strict);
        let long = cumulative_average(&hourly, 5, 5, HistoryPolicy::Strict);
        for k in 0..2 {
            assert_eq!(
                short.fields["wv100_kh"][[k, 0, 0]],
                long.fields["wv100_kh"][[k, 0, 0]]
            );
        }
    }

    #[test]
    fn missing_samples_are_skipped_but_never_become_zero() {
        let hourly = series(&[f32::NAN, 4.0, f32::NAN]);
        let avg = cumulative_average(&hourly, 3, 3, HistoryPolicy::Strict);
        let data = &avg.fields["wv100_kh"];
        assert!(data[[0, 0, 0]].is_nan());
        assert_abs_diff_eq!(data[[1, 0, 0]], 4.0);
        assert_abs_diff_eq!(data[[2, 0, 0]], 4.0);
    }

    #[test]
    fn strict_policy_drops_buckets_without_history() {
        let hourly = series(&[1.0, 3.0, f32::NAN]);
        let available = available_hours(&[true, true, false]);
        assert_eq!(available, 2);
        for _ in 0..3 {
            let avg = cumulative_average(&hourly, 3, available, HistoryPolicy::Strict);
            assert_eq!(avg.durations, vec![1, 2]);
            assert_eq!(
                avg.insufficient,
                Some(InsufficientHistory {
                    requested: 3,
                    available: 2
                })
            );
        }
    }

    #[test]
    fn truncate_policy_reuses_the_available_hours() {
        let hourly = series(&[1.0, 3.0, f32::NAN]);
        let avg = cumulative_average(&hourly, 3, 2, HistoryPolicy::Truncate);
        assert_eq!(avg.durations, vec![1, 2, 3]);
        assert_abs_diff_eq!(avg.fields["wv100_kh"][[2, 0, 0]], 2.0);
        assert!(avg.insufficient.is_some());
    }
}
