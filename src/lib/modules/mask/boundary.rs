use std::{fmt::Display, fs, path::Path, str::FromStr};

use geo::{BoundingRect, MapCoords, MultiPolygon};
use geojson::{GeoJson, JsonObject};
use log::info;

use crate::error::{RosError, RosResult};

const EARTH_RADIUS: f64 = 6_378_137.0;

/// Coordinate reference system of a boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crs {
    /// geographic lat/lon, the CRS of every grid
    Wgs84,
    /// spherical web mercator (EPSG:3857)
    WebMercator,
    Other(String),
}

impl Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Crs::Wgs84 => write!(f, "EPSG:4326"),
            Crs::WebMercator => write!(f, "EPSG:3857"),
            Crs::Other(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for Crs {
    type Err = RosError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let upper = name.trim().to_uppercase();
        if upper.is_empty() {
            return Err(RosError::Config("empty CRS name".into()));
        }
        let code = upper.rsplit(|c: char| c == ':' || c == '/').next().unwrap_or_default();
        Ok(match code {
            "4326" | "CRS84" => Crs::Wgs84,
            "3857" | "900913" | "3785" => Crs::WebMercator,
            _ => Crs::Other(name.trim().to_string()),
        })
    }
}

/// inverse spherical mercator, metres -> (lon, lat) degrees
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

fn crs_of(members: Option<&JsonObject>) -> RosResult<Option<Crs>> {
    let Some(crs) = members.and_then(|m| m.get("crs")) else {
        return Ok(None);
    };
    let name = crs
        .pointer("/properties/name")
        .or_else(|| crs.get("name"))
        .or(Some(crs))
        .and_then(|v| v.as_str())
        .ok_or_else(|| RosError::Config(format!("unreadable crs member {}", crs)))?;
    Ok(Some(name.parse()?))
}

fn to_multipolygon(geometry: geojson::Geometry, polygons: &mut MultiPolygon<f64>) -> RosResult<()> {
    let geometry: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|err: geojson::Error| RosError::format("boundary", err))?;
    match geometry {
        geo::Geometry::Polygon(p) => polygons.0.push(p),
        geo::Geometry::MultiPolygon(mp) => polygons.0.extend(mp.0),
        geo::Geometry::GeometryCollection(gc) => {
            for g in gc {
                match g {
                    geo::Geometry::Polygon(p) => polygons.0.push(p),
                    geo::Geometry::MultiPolygon(mp) => polygons.0.extend(mp.0),
                    _ => (),
                }
            }
        }
        _ => (),
    }
    Ok(())
}

/// Region of interest: polygons with the CRS they are expressed in
#[derive(Debug, Clone)]
pub struct Boundary {
    /// identifies the boundary in mask caches
    pub id: String,
    pub crs: Crs,
    pub polygons: MultiPolygon<f64>,
}

impl Boundary {
    pub fn new(id: &str, crs: Crs, polygons: MultiPolygon<f64>) -> Self {
        Boundary {
            id: id.to_string(),
            crs,
            polygons,
        }
    }

    /// Parse a GeoJSON Polygon, MultiPolygon, Feature or FeatureCollection.
    /// The CRS comes from the `crs` member and defaults to EPSG:4326.
    pub fn from_geojson(id: &str, text: &str) -> RosResult<Self> {
        let geojson: GeoJson = text.parse().map_err(|err| RosError::format(id, err))?;
        let mut polygons = MultiPolygon::new(vec![]);
        let crs = match geojson {
            GeoJson::Geometry(geometry) => {
                let crs = crs_of(geometry.foreign_members.as_ref())?;
                to_multipolygon(geometry, &mut polygons)?;
                crs
            }
            GeoJson::Feature(feature) => {
                let crs = crs_of(feature.foreign_members.as_ref())?;
                if let Some(geometry) = feature.geometry {
                    to_multipolygon(geometry, &mut polygons)?;
                }
                crs
            }
            GeoJson::FeatureCollection(collection) => {
                let crs = crs_of(collection.foreign_members.as_ref())?;
                for feature in collection.features {
                    if let Some(geometry) = feature.geometry {
                        to_multipolygon(geometry, &mut polygons)?;
                    }
                }
                crs
            }
        };
        if polygons.0.is_empty() {
            return Err(RosError::format(id, "no polygon in boundary"));
        }
        Ok(Boundary::new(id, crs.unwrap_or(Crs::Wgs84), polygons))
    }

    pub fn from_file(path: &Path) -> RosResult<Self> {
        let text = fs::read_to_string(path)?;
        let boundary = Boundary::from_geojson(&path.display().to_string(), &text)?;
        info!(
            "Loaded boundary {} ({} polygons, {})",
            boundary.id,
            boundary.polygons.0.len(),
            boundary.crs
        );
        Ok(boundary)
    }

    /// Express the boundary in geographic coordinates.
    /// Only web mercator can be reprojected, any other CRS is refused.
    pub fn to_geographic(&self) -> RosResult<Boundary> {
        match &self.crs {
            Crs::Wgs84 => Ok(self.clone()),
            Crs::WebMercator => {
                let polygons = self.polygons.map_coords(|c| {
                    let (x, y) = mercator_to_wgs84(c.x, c.y);
                    geo::Coord { x, y }
                });
                Ok(Boundary::new(&self.id, Crs::Wgs84, polygons))
            }
            Crs::Other(name) => Err(RosError::CrsMismatch {
                found: name.clone(),
                expected: Crs::Wgs84.to_string(),
            }),
        }
    }

    /// (min_lon, min_lat, max_lon, max_lat)
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        self.polygons
            .bounding_rect()
            .map(|r| (r.min().x, r.min().y, r.max().x, r.max().y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn crs_names_are_recognized() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!(
            "urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Crs>().unwrap(),
            Crs::Wgs84
        );
        assert_eq!(
            "urn:ogc:def:crs:EPSG::3857".parse::<Crs>().unwrap(),
            Crs::WebMercator
        );
        assert!(matches!("EPSG:3763".parse::<Crs>().unwrap(), Crs::Other(_)));
    }

    #[test]
    fn feature_collection_without_crs_is_geographic() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
             "coordinates": [[[-9.0, 40.0], [-8.0, 40.0], [-8.0, 41.0], [-9.0, 41.0], [-9.0, 40.0]]]}}
        ]}"#;
        let boundary = Boundary::from_geojson("pt", text).unwrap();
        assert_eq!(boundary.crs, Crs::Wgs84);
        assert_eq!(boundary.polygons.0.len(), 1);
    }

    #[test]
    fn mercator_boundary_is_reprojected() {
        let (x, y) = (-1_001_875.417, 4_865_942.28);
        let text = format!(
            r#"{{"type": "Feature", "properties": {{}},
               "crs": {{"type": "name", "properties": {{"name": "EPSG:3857"}}}},
               "geometry": {{"type": "Polygon", "coordinates": [[[{x}, {y}], [0.0, {y}], [0.0, 0.0], [{x}, {y}]]]}}}}"#
        );
        let boundary = Boundary::from_geojson("merc", &text).unwrap();
        assert_eq!(boundary.crs, Crs::WebMercator);
        let geographic = boundary.to_geographic().unwrap();
        let (min_lon, _, _, max_lat) = geographic.extent().unwrap();
        assert_abs_diff_eq!(min_lon, -9.0, epsilon = 1e-3);
        assert_abs_diff_eq!(max_lat, 40.0, epsilon = 1e-3);
    }

    #[test]
    fn projected_crs_is_refused() {
        let text = r#"{"type": "Polygon",
            "crs": {"type": "name", "properties": {"name": "EPSG:3763"}},
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}"#;
        let boundary = Boundary::from_geojson("etrs89", text).unwrap();
        let err = boundary.to_geographic().unwrap_err();
        assert_eq!(err.kind(), "CRSMismatch");
    }
}
