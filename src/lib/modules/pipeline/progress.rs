use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::NaiveDate;
use log::info;
use strum_macros::Display;

use crate::{
    error::{RosError, RosResult},
    models::dataset::DatasetKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    CheckCoverage,
    Fetch,
    Harmonize,
    Derive,
    Assemble,
    Predict,
    Merge,
    ReadSlice,
}

/// Receives the state of a running request
pub trait ProgressCallback: Send + Sync {
    fn on_stage(&self, stage: Stage);

    /// called before each archive fetch, `done` of `total` already handled
    fn on_fetch(&self, _kind: DatasetKind, _date: NaiveDate, _done: usize, _total: usize) {}
}

pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn on_stage(&self, _stage: Stage) {}
}

/// Reports progress through the log
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_stage(&self, stage: Stage) {
        info!("[PIPELINE] {}", stage);
    }

    fn on_fetch(&self, kind: DatasetKind, date: NaiveDate, done: usize, total: usize) {
        info!("[PIPELINE] fetching {} {} ({}/{})", kind, date, done + 1, total);
    }
}

/// Cooperative cancellation flag, shared between the caller and the pipeline
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> RosResult<()> {
        if self.is_cancelled() {
            Err(RosError::Cancelled)
        } else {
            Ok(())
        }
    }
}
