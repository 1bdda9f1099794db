use std::{
    collections::BTreeMap,
    fs,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use ndarray::Array4;
use serde_derive::{Deserialize, Serialize};

use crate::{
    error::{RosError, RosResult},
    io::helpers::write_atomically,
    models::dataset::{DatasetKind, RawSourceDataset, SourceLayout},
};

use super::prelude::DatasetReader;

/// JSON form of a source dataset. Values are flattened in
/// (time, level, row, col) order, missing values are `null`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetDocument {
    #[serde(default)]
    pub kind: Option<DatasetKind>,
    pub times: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub levels: Vec<u32>,
    pub layout: SourceLayout,
    pub variables: BTreeMap<String, Vec<Option<f32>>>,
}

impl DatasetDocument {
    pub fn from_dataset(dataset: &RawSourceDataset) -> Self {
        let variables = dataset
            .variables
            .iter()
            .map(|(name, data)| {
                let values = data
                    .iter()
                    .map(|v| if v.is_nan() { None } else { Some(*v) })
                    .collect();
                (name.clone(), values)
            })
            .collect();
        DatasetDocument {
            kind: Some(dataset.kind),
            times: dataset.times.clone(),
            levels: dataset.levels.clone(),
            layout: dataset.layout.clone(),
            variables,
        }
    }

    pub fn into_dataset(self, kind: DatasetKind, origin: &str) -> RosResult<RawSourceDataset> {
        if let Some(declared) = self.kind {
            if declared != kind {
                return Err(RosError::format(
                    origin,
                    format!("file holds {} data, {} expected", declared, kind),
                ));
            }
        }
        let (rows, cols) = self.layout.shape();
        let shape = (self.times.len(), self.levels.len().max(1), rows, cols);

        let mut variables = BTreeMap::new();
        for (name, values) in self.variables {
            let values: Vec<f32> = values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
            let data = Array4::from_shape_vec(shape, values).map_err(|err| {
                RosError::format(origin, format!("variable {}: {}", name, err))
            })?;
            variables.insert(name, data);
        }
        RawSourceDataset::new(kind, self.times, self.levels, self.layout, variables)
    }
}

pub struct JsonDatasetReader;

impl DatasetReader for JsonDatasetReader {
    fn read(&self, path: &Path, kind: DatasetKind) -> RosResult<RawSourceDataset> {
        let origin = path.display().to_string();
        let file = fs::File::open(path)?;
        let document: DatasetDocument = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| RosError::format(&origin, err))?;
        document.into_dataset(kind, &origin)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

/// Store a dataset as a JSON document (used to fill local mirrors)
pub fn write_dataset(path: &Path, dataset: &RawSourceDataset) -> RosResult<()> {
    let document = DatasetDocument::from_dataset(dataset);
    write_atomically(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &document)
            .map_err(|err| RosError::format(path.display().to_string(), err))?;
        writer.flush()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn nulls_become_missing_values() {
        let text = r#"{
            "times": ["2023-08-15T00:00:00Z"],
            "layout": {"type": "scattered", "lats": [40.0, 41.0], "lons": [-8.0, -9.0]},
            "variables": {"fwinx": [12.5, null]}
        }"#;
        let document: DatasetDocument = serde_json::from_str(text).unwrap();
        let dataset = document
            .into_dataset(DatasetKind::FireIndex, "inline")
            .unwrap();
        let fwi = dataset.variable("fwinx").unwrap();
        assert_eq!(fwi.dim(), (1, 1, 1, 2));
        assert_eq!(fwi[[0, 0, 0, 0]], 12.5);
        assert!(fwi[[0, 0, 0, 1]].is_nan());
        assert_eq!(
            dataset.times[0],
            Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn kind_mismatch_is_refused() {
        let text = r#"{
            "kind": "PressureLevels",
            "times": [],
            "layout": {"type": "regular", "lats": [40.0], "lons": [-8.0]},
            "variables": {}
        }"#;
        let document: DatasetDocument = serde_json::from_str(text).unwrap();
        assert!(document
            .into_dataset(DatasetKind::SingleLevels, "inline")
            .is_err());
    }
}
