pub mod constants;
pub mod functions;

use log::{debug, warn};
use ndarray::{Array3, Zip};

use crate::{
    constants::MISSING,
    error::{RosError, RosResult},
    models::{
        dataset::DatasetKind,
        field::{DerivedSet, DerivedVariable, FieldSet},
        variables::Column,
    },
};

use functions::*;

fn variable(column: Column, units: &'static str, formula: &'static str, data: Array3<f32>) -> DerivedVariable {
    DerivedVariable {
        name: column.to_string(),
        units,
        formula,
        data,
        low_confidence: false,
    }
}

fn unavailable(
    column: Column,
    units: &'static str,
    formula: &'static str,
    shape: (usize, usize, usize),
    missing: &str,
) -> DerivedVariable {
    warn!("{} flagged as low confidence: {} not available", column, missing);
    DerivedVariable {
        low_confidence: true,
        ..variable(column, units, formula, Array3::from_elem(shape, MISSING))
    }
}

fn copy_of(fields: &FieldSet, source: &str, column: Column, units: &'static str, formula: &'static str) -> DerivedVariable {
    match fields.surface(source) {
        Some(data) => variable(column, units, formula, data.clone()),
        None => unavailable(column, units, formula, fields.shape(), source),
    }
}

/// Compute every derived variable from one snapshot of harmonized fields.
/// Missing optional inputs give low-confidence variables, missing 100 m wind
/// fails the request.
pub fn compute(fields: &FieldSet) -> RosResult<DerivedSet> {
    let shape = fields.shape();
    let mut set = DerivedSet::default();

    // 100 m wind speed
    let (Some(u100), Some(v100)) = (fields.surface("u100"), fields.surface("v100")) else {
        return Err(RosError::SourceUnavailable {
            dataset: DatasetKind::SingleLevels.dataset_id().to_string(),
            reason: "100 m wind components are missing".into(),
        });
    };
    let mut wv100 = Array3::from_elem(shape, MISSING);
    Zip::from(&mut wv100)
        .and(u100)
        .and(v100)
        .par_for_each(|w, u, v| *w = wind_speed_kmh(*u, *v));
    set.insert(variable(Column::WindSpeed100m, "km/h", "sqrt(u100² + v100²) * 3.6", wv100));

    // 850 hPa wind speed
    const WV850: &str = "sqrt(u850² + v850²) * 3.6";
    match (fields.at_level("u", 850), fields.at_level("v", 850)) {
        (Some(u), Some(v)) => {
            let mut out = Array3::from_elem(shape, MISSING);
            Zip::from(&mut out)
                .and(u)
                .and(v)
                .par_for_each(|w, u, v| *w = wind_speed_kmh(*u, *v));
            set.insert(variable(Column::WindSpeed850, "km/h", WV850, out));
        }
        _ => set.insert(unavailable(Column::WindSpeed850, "km/h", WV850, shape, "850 hPa wind")),
    }

    // 850-700 hPa lapse rate, masked by the surface pressure
    const GT87: &str = "(t850 - t700) / ((z700 - z850) / 9.80665 / 1000), where sp > 720 hPa";
    match (
        fields.at_level("t", 850),
        fields.at_level("t", 700),
        fields.at_level("z", 850),
        fields.at_level("z", 700),
    ) {
        (Some(t850), Some(t700), Some(z850), Some(z700)) => {
            let mut out = Array3::from_elem(shape, MISSING);
            Zip::from(&mut out)
                .and(t850)
                .and(t700)
                .and(z850)
                .and(z700)
                .par_for_each(|g, t850, t700, z850, z700| {
                    *g = lapse_rate(*t850, *t700, *z850, *z700);
                });
            let mut lapse = variable(Column::LapseRate850To700, "°C/km", GT87, out);
            match fields.surface("sp") {
                Some(sp) => {
                    Zip::from(&mut lapse.data).and(sp).par_for_each(|g, sp| {
                        if !lapse_rate_is_valid(*sp) {
                            *g = MISSING;
                        }
                    });
                }
                None => {
                    warn!("{} computed without surface pressure mask", Column::LapseRate850To700);
                    lapse.low_confidence = true;
                }
            }
            set.insert(lapse);
        }
        _ => set.insert(unavailable(
            Column::LapseRate850To700,
            "°C/km",
            GT87,
            shape,
            "850/700 hPa temperature and geopotential",
        )),
    }

    // 950 hPa wind direction
    const WDIR: &str = "(270 - atan2(v950, u950) * 180 / pi) mod 360";
    match (fields.at_level("u", 950), fields.at_level("v", 950)) {
        (Some(u), Some(v)) => {
            let mut out = Array3::from_elem(shape, MISSING);
            Zip::from(&mut out)
                .and(u)
                .and(v)
                .par_for_each(|d, u, v| *d = wind_direction(*u, *v));
            set.insert(variable(Column::WindDirection950, "degrees", WDIR, out));
        }
        _ => set.insert(unavailable(Column::WindDirection950, "degrees", WDIR, shape, "950 hPa wind")),
    }

    // 2 m relative humidity
    const RH: &str = "100 * exp(17.67 Td / (Td + 243.5)) / exp(17.67 T / (T + 243.5))";
    match (fields.surface("t2m"), fields.surface("d2m")) {
        (Some(t2m), Some(d2m)) => {
            let mut out = Array3::from_elem(shape, MISSING);
            Zip::from(&mut out)
                .and(t2m)
                .and(d2m)
                .par_for_each(|h, t, r| *h = relative_humidity(*t, *r));
            set.insert(variable(Column::RelativeHumidity2m, "%", RH, out));
        }
        _ => set.insert(unavailable(Column::RelativeHumidity2m, "%", RH, shape, "2 m temperature and dew point")),
    }

    set.insert(copy_of(fields, "swvl3", Column::SoilWater100, "m³/m³", "swvl3"));
    set.insert(copy_of(fields, "cape", Column::Cape, "J/kg", "cape"));
    set.insert(copy_of(fields, "fwinx", Column::Fwi, "-", "fwinx"));

    debug!(
        "[DERIVE] {} variables computed, low confidence: {:?}",
        set.variables.len(),
        set.low_confidence()
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        field::{FieldKey, HarmonizedField},
        grid::{BoundingBox, SpatialGrid},
    };
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn field_set(entries: &[(FieldKey, f32)]) -> FieldSet {
        let grid = Arc::new(SpatialGrid::new(&BoundingBox::new(41.0, -9.0, 40.0, -8.0).unwrap(), 0.5).unwrap());
        let times = vec![Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap()];
        let mut set = FieldSet::new(grid.clone(), times.clone());
        for (key, value) in entries {
            set.insert(HarmonizedField {
                key: key.clone(),
                grid: grid.clone(),
                times: times.clone(),
                data: Array3::from_elem((1, 3, 3), *value),
            })
            .unwrap();
        }
        set
    }

    #[test]
    fn missing_core_wind_fails_the_request() {
        let set = field_set(&[(FieldKey::surface("t2m"), 290.0)]);
        let err = compute(&set).unwrap_err();
        assert_eq!(err.kind(), "SourceUnavailable");
    }

    #[test]
    fn missing_optional_inputs_are_flagged() {
        let set = field_set(&[
            (FieldKey::surface("u100"), 3.0),
            (FieldKey::surface("v100"), 4.0),
        ]);
        let derived = compute(&set).unwrap();
        let wv = derived.get("wv100_kh").unwrap();
        assert!(!wv.low_confidence);
        assert_abs_diff_eq!(wv.data[[0, 1, 1]], 18.0, epsilon = 1e-4);

        let fwi = derived.get("FWI_12h").unwrap();
        assert!(fwi.low_confidence);
        assert!(fwi.data.iter().all(|v| v.is_nan()));
        assert!(derived.low_confidence().contains(&"gT_8_7".to_string()));
    }

    #[test]
    fn lapse_rate_is_masked_by_surface_pressure() {
        let mut entries = vec![
            (FieldKey::surface("u100"), 1.0),
            (FieldKey::surface("v100"), 1.0),
            (FieldKey::at_level("t", 850), 288.15),
            (FieldKey::at_level("t", 700), 279.15),
            (FieldKey::at_level("z", 850), 1500.0 * constants::GRAVITY),
            (FieldKey::at_level("z", 700), 3000.0 * constants::GRAVITY),
        ];
        let unmasked = compute(&field_set(&entries)).unwrap();
        let gt = unmasked.get("gT_8_7").unwrap();
        assert!(gt.low_confidence);
        assert_abs_diff_eq!(gt.data[[0, 0, 0]], 6.0, epsilon = 1e-3);

        entries.push((FieldKey::surface("sp"), 70_000.0));
        let masked = compute(&field_set(&entries)).unwrap();
        let gt = masked.get("gT_8_7").unwrap();
        assert!(!gt.low_confidence);
        assert!(gt.data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn computing_twice_gives_identical_output_and_leaves_inputs_alone() {
        let set = field_set(&[
            (FieldKey::surface("u100"), 2.0),
            (FieldKey::surface("v100"), -1.0),
            (FieldKey::surface("t2m"), 300.0),
            (FieldKey::surface("d2m"), 285.0),
        ]);
        let a = compute(&set).unwrap();
        let b = compute(&set).unwrap();
        assert_eq!(a.get("rh_2m").unwrap().data, b.get("rh_2m").unwrap().data);
        assert_eq!(set.surface("t2m").unwrap()[[0, 0, 0]], 300.0);
        assert_eq!(set.len(), 4);
    }
}
