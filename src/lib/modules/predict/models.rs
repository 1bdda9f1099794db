use std::{fs, path::Path};

use log::info;
use serde_derive::{Deserialize, Serialize};

use crate::error::{RosError, RosResult};

/// A trained rate-of-spread model, opaque apart from its feature order
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    /// feature names in the order `predict` reads them
    fn feature_names(&self) -> &[String];

    fn predict(&self, row: &[f32]) -> f32;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub feature: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearModelFile {
    name: String,
    intercept: f64,
    coefficients: Vec<Coefficient>,
}

/// Linear regression on the log-scaled rate of spread
#[derive(Debug, Clone)]
pub struct LinearModel {
    name: String,
    intercept: f64,
    features: Vec<String>,
    weights: Vec<f64>,
}

impl LinearModel {
    pub fn new(name: &str, intercept: f64, coefficients: Vec<Coefficient>) -> Self {
        let (features, weights) = coefficients
            .into_iter()
            .map(|c| (c.feature, c.weight))
            .unzip();
        LinearModel {
            name: name.to_string(),
            intercept,
            features,
            weights,
        }
    }

    /// Load from a YAML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> RosResult<Self> {
        if !path.is_file() {
            return Err(RosError::ModelNotFound(path.to_path_buf()));
        }
        let origin = path.display().to_string();
        let text = fs::read_to_string(path)?;
        let file: LinearModelFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|err| RosError::format(&origin, err))?,
            _ => serde_yaml::from_str(&text).map_err(|err| RosError::format(&origin, err))?,
        };
        info!(
            "Loaded model {} with {} features from {}",
            file.name,
            file.coefficients.len(),
            origin
        );
        Ok(LinearModel::new(&file.name, file.intercept, file.coefficients))
    }
}

impl Predictor for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_names(&self) -> &[String] {
        &self.features
    }

    fn predict(&self, row: &[f32]) -> f32 {
        if row.len() != self.weights.len() || row.iter().any(|v| v.is_nan()) {
            return f32::NAN;
        }
        let sum: f64 = row
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| *x as f64 * w)
            .sum();
        (self.intercept + sum) as f32
    }
}
