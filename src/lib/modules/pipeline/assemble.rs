use std::{collections::BTreeMap, iter};

use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3, Axis};

use crate::{
    constants::MISSING,
    error::{RosError, RosResult},
    io::statics::StaticLayers,
    models::{
        field::DerivedSet,
        grid::SpatialGrid,
        table::{CacheTable, HourlyStore},
        time::TimeAxis,
        variables::{Column, DURATION, FIRE_START},
    },
    modules::{
        harmonize::functions::bilinear_regrid,
        mask::CoverageMask,
        predict::{features::FeatureMap, models::Predictor, predict_columns},
        temporal::CumulativeAverages,
    },
};

fn mask_2d(layer: Array2<f32>, mask: Option<&CoverageMask>) -> RosResult<Array2<f32>> {
    match mask {
        Some(mask) => Ok(mask
            .apply(&layer.insert_axis(Axis(0)))?
            .index_axis_move(Axis(0), 0)),
        None => Ok(layer),
    }
}

/// Hourly store holding the derived variables of the fetched hours, masked
pub fn hourly_fragment(
    grid: &SpatialGrid,
    times: Vec<DateTime<Utc>>,
    derived: &DerivedSet,
    mask: Option<&CoverageMask>,
) -> RosResult<HourlyStore> {
    let mut variables = BTreeMap::new();
    for variable in derived.iter() {
        let data = match mask {
            Some(mask) => mask.apply(&variable.data)?,
            None => variable.data.clone(),
        };
        variables.insert(variable.name.clone(), data);
    }
    let store = HourlyStore {
        times,
        grid: grid.clone(),
        variables,
    };
    store.validate()?;
    Ok(store)
}

/// Values of every stored variable over the window, dims (hour, lat, lon),
/// and for each hour whether the 100 m wind is available.
pub fn window(store: &HourlyStore, axis: &TimeAxis) -> (BTreeMap<String, Array3<f32>>, Vec<bool>) {
    let (rows, cols) = store.grid.shape();
    let fields = store
        .variables
        .iter()
        .map(|(name, data)| {
            let mut out = Array3::from_elem((axis.len(), rows, cols), MISSING);
            for (k, time) in axis.times().iter().enumerate() {
                if let Some(t) = store.time_index(time) {
                    out.index_axis_mut(Axis(0), k).assign(&data.index_axis(Axis(0), t));
                }
            }
            (name.clone(), out)
        })
        .collect();
    let wind = Column::WindSpeed100m.to_string();
    let has_data = axis.times().iter().map(|t| store.has_hour(t, &wind)).collect();
    (fields, has_data)
}

/// Yearly layers of `year` resampled onto the grid and masked
pub fn static_fields(
    layers: &StaticLayers,
    grid: &SpatialGrid,
    year: i32,
    mask: Option<&CoverageMask>,
) -> RosResult<BTreeMap<String, Array2<f32>>> {
    let mut fields = BTreeMap::new();
    for column in Column::statics() {
        let name = column.to_string();
        let Some(layer) = layers.layer(&name, year) else {
            continue;
        };
        let regridded = bilinear_regrid(&layers.lats, &layers.lons, layer, grid);
        fields.insert(name, mask_2d(regridded, mask)?);
    }
    Ok(fields)
}

/// Table fragment of one (start, offset) pair: averaged variables, static
/// layers and predictions for every computed duration.
#[allow(clippy::too_many_arguments)]
pub fn table_fragment(
    start: DateTime<Utc>,
    offset: u32,
    grid: &SpatialGrid,
    averages: &CumulativeAverages,
    statics: &BTreeMap<String, Array2<f32>>,
    predictor: &dyn Predictor,
    map: &FeatureMap,
    mask: Option<&CoverageMask>,
) -> RosResult<CacheTable> {
    let (rows, cols) = grid.shape();
    let durations = &averages.durations;
    let dim = (durations.len(), rows, cols);
    let cells = rows * cols;

    // (duration, lat, lon) blocks of every output column
    let mut blocks: BTreeMap<String, Array3<f32>> = averages.fields.clone();
    for (name, layer) in statics {
        let block = layer
            .broadcast(dim)
            .ok_or_else(|| RosError::GridMismatch(format!("layer {} does not fit the grid", name)))?
            .to_owned();
        blocks.insert(name.clone(), block);
    }

    let mut features: BTreeMap<String, Vec<f32>> = blocks
        .iter()
        .map(|(name, block)| (name.clone(), block.iter().copied().collect()))
        .collect();
    features.insert(
        DURATION.to_string(),
        durations
            .iter()
            .flat_map(|d| iter::repeat(*d as f32).take(cells))
            .collect(),
    );
    features.insert(FIRE_START.to_string(), vec![offset as f32; durations.len() * cells]);

    let predicted = predict_columns(predictor, map, &features)?;
    let to_block = |values: Vec<f32>| -> RosResult<Array3<f32>> {
        let block = Array3::from_shape_vec(dim, values).map_err(|err| RosError::format("predictions", err))?;
        match mask {
            Some(mask) => mask.apply(&block),
            None => Ok(block),
        }
    };
    blocks.insert(Column::Predictions.to_string(), to_block(predicted.predictions)?);
    blocks.insert(Column::LinearPrediction.to_string(), to_block(predicted.linear)?);

    let names: Vec<String> = blocks.keys().cloned().collect();
    let mut table = CacheTable::filled(vec![start], grid.clone(), durations.clone(), vec![offset], &names);
    for (name, block) in blocks {
        if let Some(column) = table.columns.get_mut(&name) {
            column
                .slice_mut(s![0, .., .., .., 0])
                .assign(&block.view().permuted_axes([1, 2, 0]));
        }
    }
    Ok(table)
}
