use std::{collections::BTreeMap, fs, io::BufReader, path::Path};

use log::{info, warn};
use ndarray::{Array3, ArrayView2, Axis};
use serde_derive::{Deserialize, Serialize};

use crate::error::{RosError, RosResult};

#[derive(Debug, Serialize, Deserialize)]
struct StaticLayersDocument {
    years: Vec<i32>,
    lats: Vec<f32>,
    lons: Vec<f32>,
    /// values in (year, lat, lon) order, `null` for missing
    variables: BTreeMap<String, Vec<Option<f32>>>,
}

/// Yearly GIS layers (fuel load, burned area percentages) on a regular grid
#[derive(Debug, Clone)]
pub struct StaticLayers {
    pub years: Vec<i32>,
    pub lats: Vec<f32>,
    pub lons: Vec<f32>,
    pub variables: BTreeMap<String, Array3<f32>>,
}

impl StaticLayers {
    pub fn from_file(path: &Path) -> RosResult<Self> {
        let origin = path.display().to_string();
        let file = fs::File::open(path)?;
        let document: StaticLayersDocument = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| RosError::format(&origin, err))?;

        let mut order: Vec<usize> = (0..document.years.len()).collect();
        order.sort_by_key(|i| document.years[*i]);

        let dim = (document.years.len(), document.lats.len(), document.lons.len());
        let mut variables = BTreeMap::new();
        for (name, values) in document.variables {
            let values: Vec<f32> = values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
            let data = Array3::from_shape_vec(dim, values)
                .map_err(|err| RosError::format(&origin, format!("layer {}: {}", name, err)))?;
            variables.insert(name, data.select(Axis(0), &order));
        }
        let years = order.iter().map(|i| document.years[*i]).collect();
        info!(
            "Loaded static layers {:?} from {}",
            variables.keys().collect::<Vec<_>>(),
            origin
        );
        Ok(StaticLayers {
            years,
            lats: document.lats,
            lons: document.lons,
            variables,
        })
    }

    /// Index of the layer describing `year`: the latest one not after it,
    /// or the earliest available when every layer is newer.
    pub fn year_index(&self, year: i32) -> Option<usize> {
        if self.years.is_empty() {
            return None;
        }
        match self.years.iter().rposition(|y| *y <= year) {
            Some(idx) => Some(idx),
            None => {
                warn!(
                    "No static layer for {} or earlier, using {}",
                    year, self.years[0]
                );
                Some(0)
            }
        }
    }

    pub fn layer(&self, name: &str, year: i32) -> Option<ArrayView2<f32>> {
        let idx = self.year_index(year)?;
        self.variables
            .get(name)
            .map(|data| data.index_axis(Axis(0), idx))
    }
}
