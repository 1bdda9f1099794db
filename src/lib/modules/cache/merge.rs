use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::warn;
use ndarray::{Array2, Array3, Axis};
use serde_derive::Serialize;

use crate::{
    constants::MISSING,
    error::{RosError, RosResult},
    models::{
        grid::SpatialGrid,
        table::{CacheTable, HourlyStore},
    },
};

use super::config::MergePolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// cells that were missing and received a value
    pub filled: usize,
    /// cells holding a different value in both tables, resolved by the policy
    pub conflicts: usize,
    /// conflicts where the stored value was replaced
    pub overwritten: usize,
}

impl MergeStats {
    fn absorb(&mut self, other: MergeStats) {
        self.filled += other.filled;
        self.conflicts += other.conflicts;
        self.overwritten += other.overwritten;
    }
}

/// sorted union of two sorted axes
pub fn union_axis<T: Ord + Copy>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().merge(b.iter()).dedup().copied().collect()
}

/// index in `axis` of every value; each value must be present
fn positions<T: Ord + std::fmt::Debug>(axis: &[T], values: &[T]) -> RosResult<Vec<usize>> {
    values
        .iter()
        .map(|v| {
            axis.binary_search(v)
                .map_err(|_| RosError::format("merge", format!("{:?} not found on the merged axis", v)))
        })
        .collect()
}

/// write `incoming` into `stored` following the policy
fn resolve(stored: &mut f32, incoming: f32, policy: MergePolicy, stats: &mut MergeStats) {
    if incoming.is_nan() {
        return;
    }
    if stored.is_nan() {
        *stored = incoming;
        stats.filled += 1;
        return;
    }
    if stored.to_bits() == incoming.to_bits() {
        return;
    }
    stats.conflicts += 1;
    if policy == MergePolicy::Overwrite {
        *stored = incoming;
        stats.overwritten += 1;
    }
}

/// Merge a freshly computed fragment into the stored table.
/// Axes are united and sorted; cells found in both are resolved by `policy`,
/// and a missing value never replaces a stored one.
pub fn merge_tables(
    existing: &CacheTable,
    fragment: &CacheTable,
    policy: MergePolicy,
) -> RosResult<(CacheTable, MergeStats)> {
    existing.grid.ensure_same(&fragment.grid)?;
    fragment.validate()?;

    let start_times = union_axis(&existing.start_times, &fragment.start_times);
    let durations = union_axis(&existing.durations, &fragment.durations);
    let offsets = union_axis(&existing.offsets, &fragment.offsets);
    let names: Vec<String> = existing
        .columns
        .keys()
        .chain(fragment.columns.keys())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut merged = CacheTable::filled(start_times, existing.grid.clone(), durations, offsets, &names);
    let mut stats = MergeStats::default();

    // the stored table goes first into an empty table, so it only fills cells
    for (is_fragment, source, source_policy) in [
        (false, existing, MergePolicy::Overwrite),
        (true, fragment, policy),
    ] {
        let s_map = positions(&merged.start_times, &source.start_times)?;
        let d_map = positions(&merged.durations, &source.durations)?;
        let o_map = positions(&merged.offsets, &source.offsets)?;
        let mut part = MergeStats::default();
        for (name, data) in &source.columns {
            let target = merged
                .columns
                .get_mut(name)
                .ok_or_else(|| RosError::format("cache table", format!("column {} lost in merge", name)))?;
            for ((s, r, c, d, o), value) in data.indexed_iter() {
                let cell = &mut target[[s_map[s], r, c, d_map[d], o_map[o]]];
                resolve(cell, *value, source_policy, &mut part);
            }
        }
        if is_fragment {
            stats.absorb(part);
        }
    }

    if stats.conflicts > 0 {
        warn!(
            "{} cells differ from the stored table, {} policy applied ({} overwritten)",
            stats.conflicts, policy, stats.overwritten
        );
    }
    Ok((merged, stats))
}

/// Merge hourly fields along time, same rules as [`merge_tables`].
pub fn merge_hourly(
    existing: &HourlyStore,
    fragment: &HourlyStore,
    policy: MergePolicy,
) -> RosResult<(HourlyStore, MergeStats)> {
    existing.grid.ensure_same(&fragment.grid)?;
    fragment.validate()?;

    let times = union_axis(&existing.times, &fragment.times);
    let names: BTreeSet<&String> = existing.variables.keys().chain(fragment.variables.keys()).collect();
    let (rows, cols) = existing.grid.shape();
    let mut variables: BTreeMap<String, Array3<f32>> = names
        .into_iter()
        .map(|n| (n.clone(), Array3::from_elem((times.len(), rows, cols), MISSING)))
        .collect();

    let mut stats = MergeStats::default();
    for (is_fragment, source, source_policy) in [
        (false, existing, MergePolicy::Overwrite),
        (true, fragment, policy),
    ] {
        let t_map = positions(&times, &source.times)?;
        let mut part = MergeStats::default();
        for (name, data) in &source.variables {
            let Some(target) = variables.get_mut(name) else {
                continue;
            };
            for ((t, r, c), value) in data.indexed_iter() {
                resolve(&mut target[[t_map[t], r, c]], *value, source_policy, &mut part);
            }
        }
        if is_fragment {
            stats.absorb(part);
        }
    }

    Ok((
        HourlyStore {
            times,
            grid: existing.grid.clone(),
            variables,
        },
        stats,
    ))
}

/// Result of the coverage check of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    pub covered: Vec<u32>,
    pub missing: Vec<u32>,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// A duration is covered when at least one tracked column holds a value
/// somewhere at (start, duration, offset). Coordinates whose tracked columns
/// are all missing count as absent.
pub fn check_coverage(
    table: &CacheTable,
    start: &DateTime<Utc>,
    durations: &[u32],
    offset: u32,
    tracked: &[String],
) -> Coverage {
    let s = table.start_index(start);
    let o = table.offset_index(offset);
    let (covered, missing): (Vec<u32>, Vec<u32>) = durations.iter().partition(|duration| {
        let (Some(s), Some(o), Some(d)) = (s, o, table.duration_index(**duration)) else {
            return false;
        };
        tracked.iter().any(|name| {
            table.columns.get(name).is_some_and(|data| {
                data.index_axis(Axis(0), s)
                    .index_axis(Axis(3), o)
                    .index_axis(Axis(2), d)
                    .iter()
                    .any(|v| !v.is_nan())
            })
        })
    });
    Coverage { covered, missing }
}

/// Cells of one (start, offset) pair, every column with dims (lat, lon, duration)
#[derive(Debug, Clone)]
pub struct TableSlice {
    pub start_time: DateTime<Utc>,
    pub offset: u32,
    pub grid: SpatialGrid,
    pub durations: Vec<u32>,
    pub columns: BTreeMap<String, Array3<f32>>,
}

impl TableSlice {
    /// cells where `column` holds a value at `duration`
    pub fn covered_cells(&self, column: &str, duration: u32) -> usize {
        let Some(d) = self.durations.iter().position(|v| *v == duration) else {
            return 0;
        };
        self.columns
            .get(column)
            .map(|data| data.index_axis(Axis(2), d).iter().filter(|v| !v.is_nan()).count())
            .unwrap_or(0)
    }

    pub fn column_at(&self, column: &str, duration: u32) -> Option<Array2<f32>> {
        let d = self.durations.iter().position(|v| *v == duration)?;
        self.columns
            .get(column)
            .map(|data| data.index_axis(Axis(2), d).to_owned())
    }

    /// rows (lat, lon, duration, values in column order) with at least one value
    pub fn rows(&self) -> Vec<(f32, f32, u32, Vec<f32>)> {
        let (nrows, ncols) = self.grid.shape();
        let mut rows = vec![];
        for r in 0..nrows {
            for c in 0..ncols {
                for (d, duration) in self.durations.iter().enumerate() {
                    let values: Vec<f32> = self.columns.values().map(|data| data[[r, c, d]]).collect();
                    if values.iter().any(|v| !v.is_nan()) {
                        rows.push((self.grid.lats()[r], self.grid.lons()[c], *duration, values));
                    }
                }
            }
        }
        rows
    }
}

/// Read the cells of `durations` at (start, offset). Durations absent from the
/// table are left out of the slice.
pub fn read_slice(table: &CacheTable, start: &DateTime<Utc>, durations: &[u32], offset: u32) -> TableSlice {
    let (rows, cols) = table.grid.shape();
    let present: Vec<(u32, usize)> = durations
        .iter()
        .filter_map(|d| table.duration_index(*d).map(|idx| (*d, idx)))
        .collect();
    let s = table.start_index(start);
    let o = table.offset_index(offset);

    let columns = table
        .columns
        .iter()
        .map(|(name, data)| {
            let mut out = Array3::from_elem((rows, cols, present.len()), MISSING);
            if let (Some(s), Some(o)) = (s, o) {
                for (k, (_, d)) in present.iter().enumerate() {
                    out.index_axis_mut(Axis(2), k).assign(
                        &data
                            .index_axis(Axis(0), s)
                            .index_axis(Axis(3), o)
                            .index_axis(Axis(2), *d),
                    );
                }
            }
            (name.clone(), out)
        })
        .collect();

    TableSlice {
        start_time: *start,
        offset,
        grid: table.grid.clone(),
        durations: present.iter().map(|(d, _)| *d).collect(),
        columns,
    }
}
