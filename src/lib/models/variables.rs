use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Columns of the feature and prediction tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Display, AsRefStr)]
pub enum Column {
    #[strum(serialize = "fuel_load")]
    FuelLoad,
    #[strum(serialize = "pct_3_8")]
    BurnedPct3To8Years,
    #[strum(serialize = "pct_8p")]
    BurnedPctOver8Years,
    #[strum(serialize = "wv100_kh")]
    WindSpeed100m,
    #[strum(serialize = "wv_850")]
    WindSpeed850,
    #[strum(serialize = "gT_8_7")]
    LapseRate850To700,
    #[strum(serialize = "wdir_950")]
    WindDirection950,
    #[strum(serialize = "rh_2m")]
    RelativeHumidity2m,
    #[strum(serialize = "sW_100")]
    SoilWater100,
    #[strum(serialize = "Cape")]
    Cape,
    #[strum(serialize = "FWI_12h")]
    Fwi,
    #[strum(serialize = "predictions")]
    Predictions,
    #[strum(serialize = "linear_pred")]
    LinearPrediction,
}

impl Column {
    /// columns read from the yearly GIS layers
    pub fn statics() -> [Column; 3] {
        [
            Column::FuelLoad,
            Column::BurnedPct3To8Years,
            Column::BurnedPctOver8Years,
        ]
    }

    /// columns checked by the cache coverage test unless configured otherwise
    pub fn tracked() -> Vec<Column> {
        vec![
            Column::FuelLoad,
            Column::BurnedPct3To8Years,
            Column::BurnedPctOver8Years,
            Column::WindSpeed100m,
            Column::Fwi,
            Column::Predictions,
        ]
    }
}

/// coordinate names of the 5-D cache table, in storage order
pub const START_TIME: &str = "s_time";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const DURATION: &str = "duration_hours";
pub const FIRE_START: &str = "fstart";
