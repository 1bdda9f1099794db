use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use ndarray::Array2;

use crate::{
    error::{RosError, RosResult},
    models::variables::{DURATION, FIRE_START},
};

lazy_static! {
    /// column -> model feature, as the trained models expect them
    static ref FEATURE_MAP_V1: Vec<(&'static str, &'static str)> = vec![
        (DURATION, "duration_p"),
        ("sW_100", "sW_100_av"),
        ("pct_8p", "8_ny_fir_p"),
        ("pct_3_8", "3_8y_fir_p"),
        ("fuel_load", "f_load_av"),
        (FIRE_START, "f_start"),
        ("FWI_12h", "FWI_12h_av"),
        ("wv100_kh", "wv100_k_av"),
        ("rh_2m", "rh_2m_av"),
        ("wdir_950", "wdi_950_av"),
        ("wv_850", "wv_850_av"),
        ("Cape", "Cape_av"),
        ("gT_8_7", "gT_8_7_av"),
    ];
}

pub const LATEST_FEATURE_MAP: u32 = 1;

/// Versioned translation between table columns and model feature names.
/// Columns without an entry keep their name.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    pub version: u32,
    to_feature: HashMap<String, String>,
}

impl FeatureMap {
    pub fn new(version: u32) -> RosResult<Self> {
        let entries: &[(&str, &str)] = match version {
            1 => FEATURE_MAP_V1.as_slice(),
            _ => {
                return Err(RosError::Config(format!(
                    "unknown feature map version {}",
                    version
                )))
            }
        };
        Ok(FeatureMap {
            version,
            to_feature: entries
                .iter()
                .map(|(c, f)| (c.to_string(), f.to_string()))
                .collect(),
        })
    }

    /// replace or add column -> feature entries
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (column, feature) in overrides {
            self.to_feature.insert(column.clone(), feature.clone());
        }
        self
    }

    pub fn feature_for<'a>(&'a self, column: &'a str) -> &'a str {
        self.to_feature
            .get(column)
            .map(|f| f.as_str())
            .unwrap_or(column)
    }
}

impl Default for FeatureMap {
    fn default() -> Self {
        FeatureMap {
            version: LATEST_FEATURE_MAP,
            to_feature: FEATURE_MAP_V1
                .iter()
                .map(|(c, f)| (c.to_string(), f.to_string()))
                .collect(),
        }
    }
}

/// Build the (rows, features) matrix in the exact order of `features`.
/// Every column must have the same number of rows. Fails with the list of
/// features no column maps to.
pub fn assemble_rows(
    columns: &BTreeMap<String, Vec<f32>>,
    map: &FeatureMap,
    features: &[String],
) -> RosResult<Array2<f32>> {
    let by_feature: HashMap<&str, &Vec<f32>> = columns
        .iter()
        .map(|(name, values)| (map.feature_for(name), values))
        .collect();

    let missing: Vec<String> = features
        .iter()
        .filter(|f| !by_feature.contains_key(f.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(RosError::FeatureMismatch { missing });
    }

    let n_rows = columns.values().map(|v| v.len()).max().unwrap_or(0);
    let mut rows = Array2::from_elem((n_rows, features.len()), f32::NAN);
    for (j, feature) in features.iter().enumerate() {
        let values = by_feature[feature.as_str()];
        if values.len() != n_rows {
            return Err(RosError::format(
                "feature rows",
                format!("{} has {} rows, expected {}", feature, values.len(), n_rows),
            ));
        }
        for (i, value) in values.iter().enumerate() {
            rows[[i, j]] = *value;
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_renames_internal_columns() {
        let map = FeatureMap::new(1).unwrap();
        assert_eq!(map.feature_for("wv100_kh"), "wv100_k_av");
        assert_eq!(map.feature_for("duration_hours"), "duration_p");
        assert_eq!(map.feature_for("fstart"), "f_start");
        assert_eq!(map.feature_for("latitude"), "latitude");
        assert_eq!(map.feature_for("pct_8p"), "8_ny_fir_p");
        assert!(FeatureMap::new(7).is_err());
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = BTreeMap::from([("wv100_kh".to_string(), "wind".to_string())]);
        let map = FeatureMap::default().with_overrides(&overrides);
        assert_eq!(map.feature_for("wv100_kh"), "wind");
    }

    #[test]
    fn rows_follow_the_model_order() {
        let columns = BTreeMap::from([
            ("wv100_kh".to_string(), vec![1.0, 2.0]),
            ("duration_hours".to_string(), vec![3.0, 3.0]),
        ]);
        let features = vec!["duration_p".to_string(), "wv100_k_av".to_string()];
        let rows = assemble_rows(&columns, &FeatureMap::default(), &features).unwrap();
        assert_eq!(rows.row(1).to_vec(), vec![3.0, 2.0]);
    }

    #[test]
    fn missing_features_are_listed() {
        let columns = BTreeMap::from([("wv100_kh".to_string(), vec![1.0])]);
        let features = vec![
            "wv100_k_av".to_string(),
            "Cape_av".to_string(),
            "f_start".to_string(),
        ];
        let err = assemble_rows(&columns, &FeatureMap::default(), &features).unwrap_err();
        match err {
            RosError::FeatureMismatch { missing } => {
                assert_eq!(missing, vec!["Cape_av".to_string(), "f_start".to_string()])
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
