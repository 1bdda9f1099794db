use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};

use crate::{
    constants::{COORD_DECIMALS, COORD_TOLERANCE},
    error::{RosError, RosResult},
};

/// Map a longitude in any convention (e.g. 0..360) to the -180..180 range.
/// Applying it twice gives the same result as applying it once.
pub fn normalize_longitude(lon: f32) -> f32 {
    let normalized = (lon + 180.0).rem_euclid(360.0) - 180.0;
    // keep the eastern edge of the antimeridian on the east side
    if normalized == -180.0 && lon > 0.0 {
        180.0
    } else {
        normalized
    }
}

fn round_coord(value: f32) -> f32 {
    let factor = 10f32.powi(COORD_DECIMALS);
    (value * factor).round() / factor
}

/// Geographic window, in degrees: [north, west, south, east]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f32,
    pub west: f32,
    pub south: f32,
    pub east: f32,
}

impl BoundingBox {
    pub fn new(north: f32, west: f32, south: f32, east: f32) -> RosResult<Self> {
        if north < south || east < west {
            return Err(RosError::Config(format!(
                "invalid bounding box [{north}, {west}, {south}, {east}]"
            )));
        }
        Ok(BoundingBox {
            north,
            west,
            south,
            east,
        })
    }

    /// archive request area, [north, west, south, east]
    pub fn area(&self) -> [f32; 4] {
        [self.north, self.west, self.south, self.east]
    }

    /// key used in cache file names: coordinates rounded to 2 decimals
    pub fn cache_key(&self) -> String {
        self.area()
            .iter()
            .map(|v| format!("{:.2}", v))
            .join("_")
    }

    pub fn contains(&self, lat: f32, lon: f32) -> bool {
        lat <= self.north + COORD_TOLERANCE
            && lat >= self.south - COORD_TOLERANCE
            && lon >= self.west - COORD_TOLERANCE
            && lon <= self.east + COORD_TOLERANCE
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[N {}, W {}, S {}, E {}]",
            self.north, self.west, self.south, self.east
        )
    }
}

/// Regular lat/lon lattice every harmonized field lives on.
/// Latitudes run north to south, longitudes west to east.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialGrid {
    lats: Vec<f32>,
    lons: Vec<f32>,
}

fn is_strictly_monotonic(values: &[f32]) -> bool {
    if values.len() < 2 {
        return values.iter().all(|v| v.is_finite());
    }
    let ascending = values[1] > values[0];
    values.iter().all(|v| v.is_finite())
        && values
            .iter()
            .tuple_windows()
            .all(|(a, b)| if ascending { b > a } else { b < a })
}

impl SpatialGrid {
    /// Build the lattice covering `bbox` at the given resolution.
    pub fn new(bbox: &BoundingBox, resolution: f32) -> RosResult<Self> {
        if resolution <= 0.0 {
            return Err(RosError::Config(format!(
                "grid resolution must be positive, got {resolution}"
            )));
        }
        let nrows = ((bbox.north - bbox.south) / resolution + COORD_TOLERANCE).floor() as usize + 1;
        let ncols = ((bbox.east - bbox.west) / resolution + COORD_TOLERANCE).floor() as usize + 1;

        let lats = (0..nrows)
            .map(|i| round_coord(bbox.north - i as f32 * resolution))
            .collect();
        let lons = (0..ncols)
            .map(|j| round_coord(bbox.west + j as f32 * resolution))
            .collect();
        Ok(SpatialGrid { lats, lons })
    }

    pub fn from_coords(lats: Vec<f32>, lons: Vec<f32>) -> RosResult<Self> {
        if lats.is_empty() || lons.is_empty() {
            return Err(RosError::GridMismatch("empty coordinate axis".into()));
        }
        if !is_strictly_monotonic(&lats) || !is_strictly_monotonic(&lons) {
            return Err(RosError::GridMismatch(
                "grid coordinates must be strictly monotonic".into(),
            ));
        }
        Ok(SpatialGrid { lats, lons })
    }

    pub fn lats(&self) -> &[f32] {
        &self.lats
    }

    pub fn lons(&self) -> &[f32] {
        &self.lons
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.lats.len(), self.lons.len())
    }

    pub fn len(&self) -> usize {
        self.lats.len() * self.lons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let (south, north) = self
            .lats
            .iter()
            .copied()
            .minmax()
            .into_option()
            .unwrap_or((0.0, 0.0));
        let (west, east) = self
            .lons
            .iter()
            .copied()
            .minmax()
            .into_option()
            .unwrap_or((0.0, 0.0));
        BoundingBox {
            north,
            west,
            south,
            east,
        }
    }

    /// row/col of a coordinate that lies on the lattice
    pub fn locate(&self, lat: f32, lon: f32) -> Option<(usize, usize)> {
        let lon = normalize_longitude(lon);
        let row = self
            .lats
            .iter()
            .position(|v| (v - lat).abs() <= COORD_TOLERANCE)?;
        let col = self
            .lons
            .iter()
            .position(|v| (v - lon).abs() <= COORD_TOLERANCE)?;
        Some((row, col))
    }

    pub fn matches(&self, other: &SpatialGrid) -> bool {
        fn same_axis(a: &[f32], b: &[f32]) -> bool {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|(x, y)| (x - y).abs() <= COORD_TOLERANCE)
        }
        same_axis(&self.lats, &other.lats) && same_axis(&self.lons, &other.lons)
    }

    /// Fails with GridMismatch unless both grids have the same coordinates.
    pub fn ensure_same(&self, other: &SpatialGrid) -> RosResult<()> {
        if self.matches(other) {
            Ok(())
        } else {
            Err(RosError::GridMismatch(format!(
                "grid {:?} {} differs from grid {:?} {}",
                self.shape(),
                self.bounding_box(),
                other.shape(),
                other.bounding_box()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn portugal() -> BoundingBox {
        BoundingBox::new(43.0, -10.0, 36.9, -6.0).expect("valid box")
    }

    #[test]
    fn longitude_normalization_is_idempotent() {
        for lon in [-190.0_f32, -160.0, 0.0, 100.0, 200.0, 350.0, 359.9] {
            let once = normalize_longitude(lon);
            assert_abs_diff_eq!(normalize_longitude(once), once);
            assert!((-180.0..=180.0).contains(&once));
        }
        assert_abs_diff_eq!(normalize_longitude(200.0), -160.0);
        assert_abs_diff_eq!(normalize_longitude(350.0), -10.0);
    }

    #[test]
    fn grid_from_bounds_runs_north_to_south() {
        let grid = SpatialGrid::new(&portugal(), 0.1).expect("grid");
        assert_eq!(grid.shape(), (62, 41));
        assert_abs_diff_eq!(grid.lats()[0], 43.0);
        assert_abs_diff_eq!(grid.lats()[61], 36.9, epsilon = 1e-4);
        assert_abs_diff_eq!(grid.lons()[40], -6.0, epsilon = 1e-4);
        assert_eq!(grid.locate(40.0, -8.0), Some((30, 20)));
        assert_eq!(grid.locate(40.05, -8.0), None);
    }

    #[test]
    fn grid_mismatch_is_reported() {
        let a = SpatialGrid::new(&portugal(), 0.1).expect("grid");
        let b = SpatialGrid::new(&portugal(), 0.25).expect("grid");
        assert!(a.ensure_same(&a.clone()).is_ok());
        let err = a.ensure_same(&b).unwrap_err();
        assert_eq!(err.kind(), "GridMismatch");
    }

    #[test]
    fn non_monotonic_axes_are_rejected() {
        let res = SpatialGrid::from_coords(vec![40.0, 41.0, 40.5], vec![-8.0]);
        assert!(res.is_err());
    }

    #[test]
    fn cache_key_rounds_to_two_decimals() {
        let bbox = BoundingBox::new(43.004, -10.0, 36.0, -6.126).expect("box");
        assert_eq!(bbox.cache_key(), "43.00_-10.00_36.00_-6.13");
    }
}
