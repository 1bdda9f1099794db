pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// on-disk format tag of the cache tables
pub const TABLE_FORMAT: &str = "RCT1";

pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncache table format: RCT1",
    "\nfeature map: v1"
);
