use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Value given to targets outside the convex hull of the valid scattered points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
pub enum ScatteredFallback {
    /// value of the nearest valid source point
    #[default]
    Nearest,
    Zero,
    Missing,
}

/// How a source time series is put on the hourly request axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, Serialize, Deserialize)]
pub enum TemporalPolicy {
    /// only instants present in the source are filled
    Exact,
    /// latest source instant not after the target persists
    ForwardFill,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarmonizeConfig {
    #[serde(default)]
    pub scattered_fallback: ScatteredFallback,
}
