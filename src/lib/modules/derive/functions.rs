use std::f32::consts::PI;

use super::constants::*;

/// wind speed [km/h] from its components [m/s]
pub fn wind_speed_kmh(u: f32, v: f32) -> f32 {
    f32::sqrt(u * u + v * v) * MS_TO_KMH
}

/// meteorological direction the wind blows from [°, 0..360)
pub fn wind_direction(u: f32, v: f32) -> f32 {
    (270.0 - f32::atan2(v, u) * 180.0 / PI).rem_euclid(360.0)
}

/// temperature gradient between 850 and 700 hPa [°C/km]
pub fn lapse_rate(
    t850: f32, // temperature at 850 hPa [K]
    t700: f32, // temperature at 700 hPa [K]
    z850: f32, // geopotential at 850 hPa [m²/s²]
    z700: f32, // geopotential at 700 hPa [m²/s²]
) -> f32 {
    let t850 = t850 - KELVIN_OFFSET;
    let t700 = t700 - KELVIN_OFFSET;
    // geopotential height difference [km]
    let dz = (z700 - z850) / GRAVITY / 1000.0;
    (t850 - t700) / dz
}

/// relative humidity [%] from temperature and dew point [K] (Magnus formula)
pub fn relative_humidity(t2m: f32, d2m: f32) -> f32 {
    let t = t2m - KELVIN_OFFSET;
    let r = d2m - KELVIN_OFFSET;
    100.0 * (f32::exp((MAGNUS_A * r) / (r + MAGNUS_B)) / f32::exp((MAGNUS_A * t) / (t + MAGNUS_B)))
}

/// whether the lapse rate is kept for a surface pressure [Pa]
pub fn lapse_rate_is_valid(sp: f32) -> bool {
    sp * PA_TO_HPA > MIN_SURFACE_PRESSURE_HPA
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn wind_speed_is_in_kmh() {
        assert_abs_diff_eq!(wind_speed_kmh(3.0, 4.0), 18.0, epsilon = 1e-5);
        assert!(wind_speed_kmh(f32::NAN, 1.0).is_nan());
    }

    #[test]
    fn wind_direction_follows_the_meteorological_convention() {
        // westerly wind blows from 270°
        assert_abs_diff_eq!(wind_direction(1.0, 0.0), 270.0, epsilon = 1e-4);
        // southerly wind blows from 180°
        assert_abs_diff_eq!(wind_direction(0.0, 1.0), 180.0, epsilon = 1e-4);
        assert_abs_diff_eq!(wind_direction(-1.0, 0.0), 90.0, epsilon = 1e-4);
    }

    #[test]
    fn lapse_rate_uses_geopotential_height_in_km() {
        // 1.5 km between the levels, 9 °C colder aloft
        let z850 = 1500.0 * GRAVITY;
        let z700 = 3000.0 * GRAVITY;
        assert_abs_diff_eq!(lapse_rate(288.15, 279.15, z850, z700), 6.0, epsilon = 1e-3);
    }

    #[test]
    fn saturated_air_has_full_humidity() {
        assert_abs_diff_eq!(relative_humidity(293.15, 293.15), 100.0, epsilon = 1e-3);
        let rh = relative_humidity(303.15, 283.15);
        assert!(rh > 25.0 && rh < 32.0);
    }

    #[test]
    fn lapse_rate_mask_threshold() {
        assert!(lapse_rate_is_valid(101_325.0));
        assert!(!lapse_rate_is_valid(70_000.0));
        assert!(!lapse_rate_is_valid(f32::NAN));
    }
}
