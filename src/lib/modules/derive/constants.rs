/// standard gravity [m/s²]
pub const GRAVITY: f32 = 9.80665;
/// m/s -> km/h
pub const MS_TO_KMH: f32 = 3.6;
/// K -> °C
pub const KELVIN_OFFSET: f32 = 273.15;
/// Pa -> hPa
pub const PA_TO_HPA: f32 = 0.01;
/// the 850-700 hPa lapse rate is kept only where the surface pressure exceeds this [hPa]
pub const MIN_SURFACE_PRESSURE_HPA: f32 = 720.0;
/// Magnus formula coefficients
pub const MAGNUS_A: f32 = 17.67;
pub const MAGNUS_B: f32 = 243.5;
