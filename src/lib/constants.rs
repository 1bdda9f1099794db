/// value used for missing cells in every field and table
pub const MISSING: f32 = f32::NAN;

/// canonical grid resolution [°]
pub const GRID_RESOLUTION: f32 = 0.1;

/// tolerance used when comparing grid coordinates [°]
pub const COORD_TOLERANCE: f32 = 1e-4;

/// decimals kept when rounding coordinates of a generated grid
pub const COORD_DECIMALS: i32 = 4;

/// days between a valid time and its availability in the reanalysis archive
pub const ARCHIVE_LATENCY_DAYS: i64 = 5;

/// seconds in one hour
pub const SECONDS_PER_HOUR: i64 = 3600;

#[inline]
pub fn is_missing(value: f32) -> bool {
    !value.is_finite()
}
