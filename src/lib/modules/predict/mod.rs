//! Feature rows for the rate-of-spread models and their predictions.

pub mod features;
pub mod functions;
pub mod models;

use std::collections::BTreeMap;

use log::debug;
use ndarray::Axis;
use rayon::prelude::*;

use crate::error::RosResult;

use features::{assemble_rows, FeatureMap};
use functions::back_transform;
use models::Predictor;

/// Model output and back-transformed ROS for each row
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    pub predictions: Vec<f32>,
    pub linear: Vec<f32>,
}

/// Run the model on every row of `columns`, named by table column.
pub fn predict_columns(
    predictor: &dyn Predictor,
    map: &FeatureMap,
    columns: &BTreeMap<String, Vec<f32>>,
) -> RosResult<Predictions> {
    let rows = assemble_rows(columns, map, predictor.feature_names())?;
    debug!(
        "[PREDICT] {} rows through model {}",
        rows.nrows(),
        predictor.name()
    );
    let predictions: Vec<f32> = rows
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| match row.as_slice() {
            Some(values) => predictor.predict(values),
            None => predictor.predict(&row.to_vec()),
        })
        .collect();
    let linear = predictions.iter().map(|p| back_transform(*p)).collect();
    Ok(Predictions {
        predictions,
        linear,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use models::{Coefficient, LinearModel};

    #[test]
    fn predictions_and_ros_are_aligned_with_rows() {
        let model = LinearModel::new(
            "lm",
            0.0,
            vec![Coefficient {
                feature: "wv100_k_av".into(),
                weight: 1.0,
            }],
        );
        let columns = BTreeMap::from([("wv100_kh".to_string(), vec![0.0, 5.0, f32::NAN])]);
        let out = predict_columns(&model, &FeatureMap::default(), &columns).unwrap();
        assert_eq!(out.predictions.len(), 3);
        assert_abs_diff_eq!(out.linear[1], 9.0, epsilon = 1e-5);
        assert!(out.linear[2].is_nan());
    }
}
