//! Persistent table of features and predictions, merged incrementally.

pub mod config;
pub mod lock;
pub mod merge;

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::{
    error::{RosError, RosResult},
    io::tables::{read_cache_table, read_hourly_store, write_cache_table, write_hourly_store},
    models::{
        grid::SpatialGrid,
        table::{CacheTable, HourlyStore},
    },
};

use config::CacheConfig;
use lock::WriterLock;
use merge::{check_coverage, merge_hourly, merge_tables, read_slice, Coverage, MergeStats, TableSlice};

/// Exclusive write access to the store, within the process and across processes
pub struct WriteGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: WriterLock,
}

/// Cache table and hourly store living in one directory.
/// Reads never block; writes go through a [`WriteGuard`].
pub struct CacheStore {
    config: CacheConfig,
    grid: SpatialGrid,
    writer: Mutex<()>,
}

impl CacheStore {
    pub fn new(config: CacheConfig, grid: SpatialGrid) -> Self {
        CacheStore {
            config,
            grid,
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Stored table, empty when the file does not exist yet
    pub fn load_table(&self) -> RosResult<CacheTable> {
        let path = self.config.table_path();
        if !path.exists() {
            debug!("[CACHE] no table at {}", path.display());
            return Ok(CacheTable::empty(self.grid.clone()));
        }
        let table = read_cache_table(&path)?;
        table.grid.ensure_same(&self.grid)?;
        Ok(table)
    }

    pub fn load_hourly(&self) -> RosResult<HourlyStore> {
        let path = self.config.hourly_path();
        if !path.exists() {
            return Ok(HourlyStore::empty(self.grid.clone()));
        }
        let store = read_hourly_store(&path)?;
        store.grid.ensure_same(&self.grid)?;
        Ok(store)
    }

    /// Durations already computed for (start, offset)
    pub fn check_coverage(&self, start: &DateTime<Utc>, durations: &[u32], offset: u32) -> RosResult<Coverage> {
        let table = self.load_table()?;
        Ok(check_coverage(&table, start, durations, offset, &self.config.tracked_columns))
    }

    pub fn lock(&self) -> RosResult<WriteGuard<'_>> {
        let local = self
            .writer
            .lock()
            .map_err(|_| RosError::CacheLocked(self.config.table_path()))?;
        let file = WriterLock::acquire(
            &self.config.table_path(),
            Duration::from_millis(self.config.lock_timeout_ms),
            Duration::from_secs(self.config.stale_lock_secs),
        )?;
        Ok(WriteGuard {
            _local: local,
            _file: file,
        })
    }

    /// Merge a fragment into the stored table and write it back atomically.
    pub fn merge_append(&self, _guard: &WriteGuard<'_>, fragment: &CacheTable) -> RosResult<MergeStats> {
        let existing = self.load_table()?;
        let (merged, stats) = merge_tables(&existing, fragment, self.config.merge_policy)?;
        write_cache_table(&self.config.table_path(), &merged)?;
        info!(
            "[CACHE] merged fragment {:?}: {} cells filled, {} conflicts; table now {:?}",
            fragment.dim(),
            stats.filled,
            stats.conflicts,
            merged.dim()
        );
        Ok(stats)
    }

    pub fn merge_hourly(&self, _guard: &WriteGuard<'_>, fragment: &HourlyStore) -> RosResult<MergeStats> {
        let existing = self.load_hourly()?;
        let (merged, stats) = merge_hourly(&existing, fragment, self.config.merge_policy)?;
        write_hourly_store(&self.config.hourly_path(), &merged)?;
        debug!("[CACHE] hourly store now holds {} hours", merged.times.len());
        Ok(stats)
    }

    pub fn read_slice(&self, start: &DateTime<Utc>, durations: &[u32], offset: u32) -> RosResult<TableSlice> {
        let table = self.load_table()?;
        Ok(read_slice(&table, start, durations, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::grid::BoundingBox;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn store(name: &str) -> (CacheStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("roscube-store-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        let grid = SpatialGrid::new(&BoundingBox::new(41.0, -9.0, 40.0, -8.0).unwrap(), 1.0).unwrap();
        (CacheStore::new(CacheConfig::new(&dir), grid), dir)
    }

    #[test]
    fn fresh_store_covers_nothing() {
        let (store, _) = store("fresh");
        let start = Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap();
        let coverage = store.check_coverage(&start, &[1, 2, 3], 0).unwrap();
        assert_eq!(coverage.missing, vec![1, 2, 3]);
    }

    #[test]
    fn appended_fragment_is_read_back() {
        let (store, dir) = store("append");
        let start = Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap();
        let mut fragment = CacheTable::filled(
            vec![start],
            store.grid().clone(),
            vec![1, 2],
            vec![0],
            &["predictions".to_string()],
        );
        fragment.columns.get_mut("predictions").unwrap().fill(3.0);

        {
            let guard = store.lock().unwrap();
            let stats = store.merge_append(&guard, &fragment).unwrap();
            assert_eq!(stats.filled, 8);
        }
        assert!(store.check_coverage(&start, &[1, 2], 0).unwrap().is_complete());
        let slice = store.read_slice(&start, &[2], 0).unwrap();
        assert_eq!(slice.covered_cells("predictions", 2), 4);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
