use ndarray::{Array2, Zip};
use rstar::{primitives::GeomWithData, RTree, RTreeObject, AABB};

use crate::{constants::MISSING, models::grid::SpatialGrid};

use super::config::ScatteredFallback;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
struct Circle {
    x: f64,
    y: f64,
    r2: f64,
}

fn circumcircle(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> Circle {
    let d = 2.0 * (a[0] * (b[1] - c[1]) + b[0] * (c[1] - a[1]) + c[0] * (a[1] - b[1]));
    if d.abs() < f64::EPSILON {
        // collinear: any point is inside
        return Circle {
            x: 0.0,
            y: 0.0,
            r2: f64::INFINITY,
        };
    }
    let a2 = a[0] * a[0] + a[1] * a[1];
    let b2 = b[0] * b[0] + b[1] * b[1];
    let c2 = c[0] * c[0] + c[1] * c[1];
    let x = (a2 * (b[1] - c[1]) + b2 * (c[1] - a[1]) + c2 * (a[1] - b[1])) / d;
    let y = (a2 * (c[0] - b[0]) + b2 * (a[0] - c[0]) + c2 * (b[0] - a[0])) / d;
    let r2 = (a[0] - x).powi(2) + (a[1] - y).powi(2);
    Circle { x, y, r2 }
}

/// Delaunay triangulation (Bowyer-Watson) of a point set.
/// Triangles reference indices into `points`.
pub fn triangulate(points: &[[f64; 2]]) -> Vec<[usize; 3]> {
    if points.len() < 3 {
        return vec![];
    }
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for p in points {
        min_x = min_x.min(p[0]);
        min_y = min_y.min(p[1]);
        max_x = max_x.max(p[0]);
        max_y = max_y.max(p[1]);
    }
    let span = (max_x - min_x).max(max_y - min_y).max(1.0);
    let (mid_x, mid_y) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);

    let n = points.len();
    let mut vertices: Vec<[f64; 2]> = points.to_vec();
    vertices.push([mid_x - 20.0 * span, mid_y - span]);
    vertices.push([mid_x, mid_y + 20.0 * span]);
    vertices.push([mid_x + 20.0 * span, mid_y - span]);

    let mut triangles: Vec<([usize; 3], Circle)> = vec![(
        [n, n + 1, n + 2],
        circumcircle(vertices[n], vertices[n + 1], vertices[n + 2]),
    )];

    for (idx, p) in points.iter().enumerate() {
        let mut edges: Vec<[usize; 2]> = vec![];
        triangles.retain(|(tri, circle)| {
            let inside = (p[0] - circle.x).powi(2) + (p[1] - circle.y).powi(2) < circle.r2 - EPS;
            if inside {
                edges.push([tri[0], tri[1]]);
                edges.push([tri[1], tri[2]]);
                edges.push([tri[2], tri[0]]);
            }
            !inside
        });
        // keep the edges of the cavity boundary: those not shared by two removed triangles
        let boundary: Vec<[usize; 2]> = edges
            .iter()
            .filter(|e| {
                edges
                    .iter()
                    .filter(|o| (o[0] == e[0] && o[1] == e[1]) || (o[0] == e[1] && o[1] == e[0]))
                    .count()
                    == 1
            })
            .copied()
            .collect();
        for [a, b] in boundary {
            triangles.push((
                [a, b, idx],
                circumcircle(vertices[a], vertices[b], vertices[idx]),
            ));
        }
    }

    triangles
        .into_iter()
        .map(|(tri, _)| tri)
        .filter(|tri| tri.iter().all(|v| *v < n))
        .collect()
}

struct TriangleEntry {
    vertices: [usize; 3],
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for TriangleEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn barycentric(p: [f64; 2], a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> Option<[f64; 3]> {
    let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
    if det.abs() < f64::EPSILON {
        return None;
    }
    let l1 = ((b[1] - c[1]) * (p[0] - c[0]) + (c[0] - b[0]) * (p[1] - c[1])) / det;
    let l2 = ((c[1] - a[1]) * (p[0] - c[0]) + (a[0] - c[0]) * (p[1] - c[1])) / det;
    let l3 = 1.0 - l1 - l2;
    if l1 >= -EPS && l2 >= -EPS && l3 >= -EPS {
        Some([l1, l2, l3])
    } else {
        None
    }
}

/// Piecewise linear interpolator over the valid points of a scattered source
pub struct ScatteredInterpolator {
    points: Vec<[f64; 2]>,
    /// index in the source of every kept point
    source_index: Vec<usize>,
    triangles: RTree<TriangleEntry>,
    nearest: RTree<GeomWithData<[f64; 2], usize>>,
}

impl ScatteredInterpolator {
    /// `valid[i]` tells whether the source point i carries a value.
    /// Invalid points never take part in the triangulation.
    pub fn new(lats: &[f32], lons: &[f32], valid: &[bool]) -> Self {
        let mut points: Vec<[f64; 2]> = vec![];
        let mut source_index = vec![];
        for (i, (lat, lon)) in lats.iter().zip(lons).enumerate() {
            if !valid[i] {
                continue;
            }
            let p = [*lon as f64, *lat as f64];
            // duplicated coordinates: the first occurrence wins
            if points
                .iter()
                .any(|q| (q[0] - p[0]).abs() < 1e-7 && (q[1] - p[1]).abs() < 1e-7)
            {
                continue;
            }
            points.push(p);
            source_index.push(i);
        }

        let entries = triangulate(&points)
            .into_iter()
            .map(|vertices| {
                let [a, b, c] = vertices.map(|v| points[v]);
                let envelope = AABB::from_corners(
                    [a[0].min(b[0]).min(c[0]), a[1].min(b[1]).min(c[1])],
                    [a[0].max(b[0]).max(c[0]), a[1].max(b[1]).max(c[1])],
                );
                TriangleEntry { vertices, envelope }
            })
            .collect();
        let nearest = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(k, p)| GeomWithData::new(*p, k))
                .collect(),
        );

        ScatteredInterpolator {
            points,
            source_index,
            triangles: RTree::bulk_load(entries),
            nearest,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.size()
    }

    fn interpolate(&self, values: &[f32], lat: f32, lon: f32, fallback: ScatteredFallback) -> f32 {
        let p = [lon as f64, lat as f64];
        for entry in self
            .triangles
            .locate_in_envelope_intersecting(&AABB::from_point(p))
        {
            let [a, b, c] = entry.vertices;
            if let Some(l) = barycentric(p, self.points[a], self.points[b], self.points[c]) {
                let v = l[0] * values[self.source_index[a]] as f64
                    + l[1] * values[self.source_index[b]] as f64
                    + l[2] * values[self.source_index[c]] as f64;
                return v as f32;
            }
        }
        match fallback {
            ScatteredFallback::Nearest => self
                .nearest
                .nearest_neighbor(&p)
                .map(|n| values[self.source_index[n.data]])
                .unwrap_or(MISSING),
            ScatteredFallback::Zero => 0.0,
            ScatteredFallback::Missing => MISSING,
        }
    }

    /// Interpolate the source values onto every cell of `grid`.
    pub fn regrid(&self, values: &[f32], grid: &SpatialGrid, fallback: ScatteredFallback) -> Array2<f32> {
        let mut out = Array2::from_elem(grid.shape(), MISSING);
        let lats = grid.lats();
        let lons = grid.lons();
        Zip::indexed(&mut out).par_for_each(|(r, c), target| {
            *target = self.interpolate(values, lats[r], lons[c], fallback);
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::grid::BoundingBox;
    use approx::assert_abs_diff_eq;

    #[test]
    fn square_is_split_in_two_triangles() {
        let points = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        assert_eq!(triangulate(&points).len(), 2);
    }

    #[test]
    fn linear_surface_is_reproduced_inside_the_hull() {
        // f = 2 * lat + lon on an irregular cloud
        let lats = vec![40.0, 40.0, 41.0, 41.0, 40.4, 40.7];
        let lons = vec![-9.0, -8.0, -9.0, -8.0, -8.6, -8.3];
        let values: Vec<f32> = lats.iter().zip(&lons).map(|(la, lo)| 2.0 * la + lo).collect();
        let interp = ScatteredInterpolator::new(&lats, &lons, &[true; 6]);
        assert!(interp.triangle_count() >= 4);

        let grid = SpatialGrid::new(&BoundingBox::new(41.0, -9.0, 40.0, -8.0).unwrap(), 0.25).unwrap();
        let out = interp.regrid(&values, &grid, ScatteredFallback::Missing);
        for (r, lat) in grid.lats().iter().enumerate() {
            for (c, lon) in grid.lons().iter().enumerate() {
                assert_abs_diff_eq!(out[[r, c]], 2.0 * lat + lon, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn invalid_points_are_excluded_and_fallback_applies_outside() {
        let lats = vec![40.0, 40.0, 41.0, 41.0, 45.0];
        let lons = vec![-9.0, -8.0, -9.0, -8.0, -7.0];
        let values = vec![1.0, 1.0, 1.0, 1.0, f32::NAN];
        let valid: Vec<bool> = values.iter().map(|v: &f32| !v.is_nan()).collect();
        let interp = ScatteredInterpolator::new(&lats, &lons, &valid);

        let grid = SpatialGrid::new(&BoundingBox::new(41.5, -9.0, 40.5, -8.5).unwrap(), 0.5).unwrap();
        let nearest = interp.regrid(&values, &grid, ScatteredFallback::Nearest);
        assert!(nearest.iter().all(|v| (*v - 1.0).abs() < 1e-6));

        let zero = interp.regrid(&values, &grid, ScatteredFallback::Zero);
        // 41.5 lies north of every valid point
        assert_eq!(zero[[0, 0]], 0.0);
        assert_abs_diff_eq!(zero[[1, 0]], 1.0, epsilon = 1e-6);

        let missing = interp.regrid(&values, &grid, ScatteredFallback::Missing);
        assert!(missing[[0, 0]].is_nan());
    }
}
