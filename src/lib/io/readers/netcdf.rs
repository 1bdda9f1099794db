use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use ndarray::Array4;
use netcdf::{extent::Extents, AttributeValue, Variable};

use crate::{
    error::{RosError, RosResult},
    io::helpers::parse_time_units,
    models::dataset::{DatasetKind, RawSourceDataset, SourceLayout},
};

use super::prelude::DatasetReader;

const TIME_NAMES: [&str; 2] = ["valid_time", "time"];
const LEVEL_NAMES: [&str; 2] = ["pressure_level", "level"];
const LAT_NAMES: [&str; 2] = ["latitude", "lat"];
const LON_NAMES: [&str; 2] = ["longitude", "lon"];

fn find_variable<'f>(file: &'f netcdf::File, names: &[&str]) -> Option<Variable<'f>> {
    names.iter().find_map(|name| file.variable(name))
}

fn attribute_f64(var: &Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|v| *v as f64),
        _ => None,
    }
}

fn read_f32(var: &Variable, origin: &str) -> RosResult<Vec<f32>> {
    let values: Vec<f64> = var
        .values::<f64, _>(Extents::All)
        .map_err(|err| RosError::format(origin, err))?
        .into_iter()
        .collect();
    let fill = attribute_f64(var, "_FillValue").or_else(|| attribute_f64(var, "missing_value"));
    let scale = attribute_f64(var, "scale_factor").unwrap_or(1.0);
    let offset = attribute_f64(var, "add_offset").unwrap_or(0.0);
    Ok(values
        .into_iter()
        .map(|v| match fill {
            Some(fill) if v == fill => f32::NAN,
            _ => (v * scale + offset) as f32,
        })
        .collect())
}

fn read_times(var: &Variable, origin: &str) -> RosResult<Vec<DateTime<Utc>>> {
    let units = match var.attribute_value("units") {
        Some(Ok(AttributeValue::Str(units))) => units,
        _ => return Err(RosError::format(origin, "time variable without units")),
    };
    let (step, reference) = parse_time_units(&units)?;
    let seconds = step.num_seconds() as f64;
    let values: Vec<f64> = var
        .values::<f64, _>(Extents::All)
        .map_err(|err| RosError::format(origin, err))?
        .into_iter()
        .collect();
    Ok(values
        .into_iter()
        .map(|v| reference + chrono::Duration::seconds((v * seconds).round() as i64))
        .collect())
}

/// Reader of the NetCDF files delivered by the reanalysis archive.
/// Variables are expected with dims (time[, level], latitude, longitude),
/// or (time, point) with 1-D latitude/longitude for scattered products.
pub struct NetCdfDatasetReader;

impl DatasetReader for NetCdfDatasetReader {
    fn read(&self, path: &Path, kind: DatasetKind) -> RosResult<RawSourceDataset> {
        let origin = path.display().to_string();
        let file = netcdf::open(path).map_err(|err| RosError::format(&origin, err))?;

        let time_var = find_variable(&file, &TIME_NAMES)
            .ok_or_else(|| RosError::format(&origin, "no time variable"))?;
        let lat_var = find_variable(&file, &LAT_NAMES)
            .ok_or_else(|| RosError::format(&origin, "no latitude variable"))?;
        let lon_var = find_variable(&file, &LON_NAMES)
            .ok_or_else(|| RosError::format(&origin, "no longitude variable"))?;

        let times = read_times(&time_var, &origin)?;
        let levels: Vec<u32> = match find_variable(&file, &LEVEL_NAMES) {
            Some(var) => read_f32(&var, &origin)?
                .into_iter()
                .map(|l| l.round() as u32)
                .collect(),
            None => vec![],
        };
        let lats = read_f32(&lat_var, &origin)?;
        let lons = read_f32(&lon_var, &origin)?;

        let lat_dim = lat_var.dimensions().first().map(|d| d.name());
        let lon_dim = lon_var.dimensions().first().map(|d| d.name());
        let layout = if lat_dim.is_some() && lat_dim == lon_dim {
            SourceLayout::Scattered { lats, lons }
        } else {
            SourceLayout::Regular { lats, lons }
        };
        let (rows, cols) = layout.shape();
        let shape = (times.len(), levels.len().max(1), rows, cols);

        let mut variables = BTreeMap::new();
        for name in kind.variables() {
            let Some(var) = file.variable(name) else {
                warn!("[NETCDF] variable {} not found in {}", name, origin);
                continue;
            };
            let values = read_f32(&var, &origin)?;
            let data = Array4::from_shape_vec(shape, values).map_err(|err| {
                RosError::format(&origin, format!("variable {}: {}", name, err))
            })?;
            debug!("[NETCDF] read {} {:?} from {}", name, shape, origin);
            variables.insert(name.to_string(), data);
        }

        RawSourceDataset::new(kind, times, levels, layout, variables)
    }

    fn extension(&self) -> &'static str {
        "nc"
    }
}
