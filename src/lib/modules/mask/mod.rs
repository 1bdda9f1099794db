//! Restriction of gridded fields to a region of interest.

pub mod boundary;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use geo::{BoundingRect, Contains, Point, Polygon};
use log::{debug, info};
use ndarray::{Array2, Array3, Axis, Zip};
use rstar::{RTree, RTreeObject, AABB};

use crate::{
    constants::MISSING,
    error::{RosError, RosResult},
    models::grid::SpatialGrid,
};

use boundary::{Boundary, Crs};

struct PolygonEntry {
    envelope: AABB<[f64; 2]>,
    polygon: Polygon<f64>,
}

impl RTreeObject for PolygonEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Cells of a grid whose centre falls inside a boundary
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageMask {
    pub inside: Array2<bool>,
}

impl CoverageMask {
    /// Point-in-polygon test on every cell centre, polygons prefiltered by envelope.
    pub fn build(grid: &SpatialGrid, boundary: &Boundary) -> RosResult<Self> {
        if boundary.crs != Crs::Wgs84 {
            return Err(RosError::CrsMismatch {
                found: boundary.crs.to_string(),
                expected: Crs::Wgs84.to_string(),
            });
        }
        let entries: Vec<PolygonEntry> = boundary
            .polygons
            .iter()
            .filter_map(|polygon| {
                let rect = polygon.bounding_rect()?;
                Some(PolygonEntry {
                    envelope: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                    polygon: polygon.clone(),
                })
            })
            .collect();
        let tree = RTree::bulk_load(entries);

        let lats = grid.lats();
        let lons = grid.lons();
        let mut inside = Array2::from_elem(grid.shape(), false);
        Zip::indexed(&mut inside).par_for_each(|(r, c), cell| {
            let (lon, lat) = (lons[c] as f64, lats[r] as f64);
            let point = Point::new(lon, lat);
            *cell = tree
                .locate_in_envelope_intersecting(&AABB::from_point([lon, lat]))
                .any(|entry| entry.polygon.contains(&point));
        });
        Ok(CoverageMask { inside })
    }

    pub fn covered_cells(&self) -> usize {
        self.inside.iter().filter(|v| **v).count()
    }

    /// Copy of a (time, lat, lon) field with every cell outside set to missing.
    pub fn apply(&self, field: &Array3<f32>) -> RosResult<Array3<f32>> {
        let (_, rows, cols) = field.dim();
        if self.inside.dim() != (rows, cols) {
            return Err(RosError::GridMismatch(format!(
                "mask {:?} does not fit field {:?}",
                self.inside.dim(),
                field.dim()
            )));
        }
        let mut out = field.clone();
        for mut slice in out.axis_iter_mut(Axis(0)) {
            Zip::from(&mut slice).and(&self.inside).for_each(|v, inside| {
                if !inside {
                    *v = MISSING;
                }
            });
        }
        Ok(out)
    }
}

/// Restrict a field to the region: cells outside become missing.
pub fn mask(field: &Array3<f32>, region: &CoverageMask) -> RosResult<Array3<f32>> {
    region.apply(field)
}

/// Coverage masks memoized per (grid, boundary)
#[derive(Default)]
pub struct MaskCache {
    masks: Mutex<HashMap<String, Arc<CoverageMask>>>,
}

fn cache_key(grid: &SpatialGrid, boundary: &Boundary) -> String {
    let bbox = grid.bounding_box();
    format!(
        "{}|{:?}|{}|{}|{}|{}",
        boundary.id,
        grid.shape(),
        bbox.north,
        bbox.west,
        bbox.south,
        bbox.east
    )
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask for the pair, built on first use. The boundary is reprojected
    /// to geographic coordinates when needed.
    pub fn get_or_build(&self, grid: &SpatialGrid, boundary: &Boundary) -> RosResult<Arc<CoverageMask>> {
        let key = cache_key(grid, boundary);
        {
            let masks = self
                .masks
                .lock()
                .map_err(|_| RosError::Config("mask cache poisoned".into()))?;
            if let Some(mask) = masks.get(&key) {
                debug!("[MASK] reusing mask {}", key);
                return Ok(mask.clone());
            }
        }
        let geographic = boundary.to_geographic()?;
        let mask = Arc::new(CoverageMask::build(grid, &geographic)?);
        info!(
            "Built coverage mask for {}: {} of {} cells inside",
            boundary.id,
            mask.covered_cells(),
            grid.len()
        );
        let mut masks = self
            .masks
            .lock()
            .map_err(|_| RosError::Config("mask cache poisoned".into()))?;
        Ok(masks.entry(key).or_insert(mask).clone())
    }

    pub fn len(&self) -> usize {
        self.masks.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
