use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use ndarray::Array3;

use crate::{
    error::{RosError, RosResult},
    models::grid::SpatialGrid,
};

/// name and optional pressure level of a harmonized variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub name: String,
    pub level: Option<u32>,
}

impl FieldKey {
    pub fn surface(name: &str) -> Self {
        FieldKey {
            name: name.to_string(),
            level: None,
        }
    }

    pub fn at_level(name: &str, level: u32) -> Self {
        FieldKey {
            name: name.to_string(),
            level: Some(level),
        }
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            Some(level) => write!(f, "{}@{}hPa", self.name, level),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One variable on the canonical grid, dims (time, lat, lon)
#[derive(Debug, Clone)]
pub struct HarmonizedField {
    pub key: FieldKey,
    pub grid: Arc<SpatialGrid>,
    pub times: Vec<DateTime<Utc>>,
    pub data: Array3<f32>,
}

impl HarmonizedField {
    pub fn check_shape(&self) -> RosResult<()> {
        let (rows, cols) = self.grid.shape();
        if self.data.dim() != (self.times.len(), rows, cols) {
            return Err(RosError::GridMismatch(format!(
                "field {} has shape {:?}, grid is {:?} over {} times",
                self.key,
                self.data.dim(),
                (rows, cols),
                self.times.len()
            )));
        }
        Ok(())
    }
}

/// Harmonized fields sharing one grid and one time axis.
/// Every derived quantity of a request is computed from one such snapshot.
#[derive(Debug, Clone)]
pub struct FieldSet {
    grid: Arc<SpatialGrid>,
    times: Vec<DateTime<Utc>>,
    fields: BTreeMap<FieldKey, Array3<f32>>,
}

impl FieldSet {
    pub fn new(grid: Arc<SpatialGrid>, times: Vec<DateTime<Utc>>) -> Self {
        FieldSet {
            grid,
            times,
            fields: BTreeMap::new(),
        }
    }

    pub fn grid(&self) -> &Arc<SpatialGrid> {
        &self.grid
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        let (rows, cols) = self.grid.shape();
        (self.times.len(), rows, cols)
    }

    /// Add a field; it must live on the same grid and time axis.
    pub fn insert(&mut self, field: HarmonizedField) -> RosResult<()> {
        self.grid.ensure_same(&field.grid)?;
        if field.times != self.times {
            return Err(RosError::GridMismatch(format!(
                "field {} is not aligned to the request time axis",
                field.key
            )));
        }
        field.check_shape()?;
        self.fields.insert(field.key, field.data);
        Ok(())
    }

    pub fn get(&self, key: &FieldKey) -> Option<&Array3<f32>> {
        self.fields.get(key)
    }

    pub fn surface(&self, name: &str) -> Option<&Array3<f32>> {
        self.get(&FieldKey::surface(name))
    }

    pub fn at_level(&self, name: &str, level: u32) -> Option<&Array3<f32>> {
        self.get(&FieldKey::at_level(name, level))
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A named physical quantity computed from harmonized fields
#[derive(Debug, Clone)]
pub struct DerivedVariable {
    pub name: String,
    pub units: &'static str,
    pub formula: &'static str,
    pub data: Array3<f32>,
    /// set when an input was missing and the value is not trustworthy
    pub low_confidence: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DerivedSet {
    pub variables: BTreeMap<String, DerivedVariable>,
}

impl DerivedSet {
    pub fn insert(&mut self, variable: DerivedVariable) {
        self.variables.insert(variable.name.clone(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&DerivedVariable> {
        self.variables.get(name)
    }

    pub fn low_confidence(&self) -> Vec<String> {
        self.variables
            .values()
            .filter(|v| v.low_confidence)
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DerivedVariable> {
        self.variables.values()
    }
}
