use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{Array3, Array5};

use crate::{
    constants::MISSING,
    error::{RosError, RosResult},
    models::grid::SpatialGrid,
};

/// Persistent feature/prediction table.
/// Cells are indexed by (start_time, lat, lon, duration_hours, fire_start_offset);
/// every axis is sorted and unique.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTable {
    pub start_times: Vec<DateTime<Utc>>,
    pub grid: SpatialGrid,
    pub durations: Vec<u32>,
    /// minutes since the fire started
    pub offsets: Vec<u32>,
    pub columns: BTreeMap<String, Array5<f32>>,
}

impl CacheTable {
    pub fn empty(grid: SpatialGrid) -> Self {
        CacheTable {
            start_times: vec![],
            grid,
            durations: vec![],
            offsets: vec![],
            columns: BTreeMap::new(),
        }
    }

    /// table with the given axes and all columns missing
    pub fn filled(
        start_times: Vec<DateTime<Utc>>,
        grid: SpatialGrid,
        durations: Vec<u32>,
        offsets: Vec<u32>,
        names: &[String],
    ) -> Self {
        let (rows, cols) = grid.shape();
        let dim = (start_times.len(), rows, cols, durations.len(), offsets.len());
        let columns = names
            .iter()
            .map(|n| (n.clone(), Array5::from_elem(dim, MISSING)))
            .collect();
        CacheTable {
            start_times,
            grid,
            durations,
            offsets,
            columns,
        }
    }

    pub fn dim(&self) -> (usize, usize, usize, usize, usize) {
        let (rows, cols) = self.grid.shape();
        (
            self.start_times.len(),
            rows,
            cols,
            self.durations.len(),
            self.offsets.len(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.start_times.is_empty() || self.durations.is_empty() || self.offsets.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn start_index(&self, time: &DateTime<Utc>) -> Option<usize> {
        self.start_times.binary_search(time).ok()
    }

    pub fn duration_index(&self, duration: u32) -> Option<usize> {
        self.durations.binary_search(&duration).ok()
    }

    pub fn offset_index(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    pub fn validate(&self) -> RosResult<()> {
        fn sorted_unique<T: PartialOrd>(values: &[T]) -> bool {
            values.windows(2).all(|w| w[0] < w[1])
        }
        if !sorted_unique(&self.start_times)
            || !sorted_unique(&self.durations)
            || !sorted_unique(&self.offsets)
        {
            return Err(RosError::format(
                "cache table",
                "axes must be sorted and without duplicates",
            ));
        }
        let dim = self.dim();
        for (name, data) in &self.columns {
            if data.dim() != dim {
                return Err(RosError::format(
                    "cache table",
                    format!("column {} has shape {:?}, expected {:?}", name, data.dim(), dim),
                ));
            }
        }
        Ok(())
    }
}

/// Per-hour harmonized, derived and static variables, dims (time, lat, lon)
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyStore {
    pub times: Vec<DateTime<Utc>>,
    pub grid: SpatialGrid,
    pub variables: BTreeMap<String, Array3<f32>>,
}

impl HourlyStore {
    pub fn empty(grid: SpatialGrid) -> Self {
        HourlyStore {
            times: vec![],
            grid,
            variables: BTreeMap::new(),
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        let (rows, cols) = self.grid.shape();
        (self.times.len(), rows, cols)
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn time_index(&self, time: &DateTime<Utc>) -> Option<usize> {
        self.times.binary_search(time).ok()
    }

    /// whether `variable` holds at least one non-missing value at the hour
    pub fn has_hour(&self, time: &DateTime<Utc>, variable: &str) -> bool {
        let (Some(t), Some(data)) = (self.time_index(time), self.variables.get(variable)) else {
            return false;
        };
        data.index_axis(ndarray::Axis(0), t).iter().any(|v| !v.is_nan())
    }

    pub fn validate(&self) -> RosResult<()> {
        if !self.times.windows(2).all(|w| w[0] < w[1]) {
            return Err(RosError::format(
                "hourly store",
                "times must be sorted and without duplicates",
            ));
        }
        let dim = self.dim();
        for (name, data) in &self.variables {
            if data.dim() != dim {
                return Err(RosError::format(
                    "hourly store",
                    format!("variable {} has shape {:?}, expected {:?}", name, data.dim(), dim),
                ));
            }
        }
        Ok(())
    }
}
