//! Unit conversions between the metric values reported by the station and the
//! imperial values expected by the relay services.

/// Rounds a value to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts a temperature in degrees Celsius to degrees Fahrenheit.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    round2(9.0 / 5.0 * celsius + 32.0)
}

/// Converts a speed in kilometers per hour to miles per hour.
pub fn kmh_to_mph(kmh: f64) -> f64 {
    round2(kmh / 1.60934)
}

/// Converts a length in millimeters to inches.
pub fn mm_to_inch(mm: f64) -> f64 {
    round2(mm / 25.4)
}

/// Computes the dew point in degrees Celsius from the ambient temperature in
/// degrees Celsius and the relative humidity in percent.
///
/// Returns `None` for a relative humidity of zero or below, where the
/// underlying logarithm is undefined.
pub fn dew_point_celsius(t_air_c: f64, rel_humidity_pct: f64) -> Option<f64> {
    const A: f64 = 17.27;
    const B: f64 = 237.7;

    if rel_humidity_pct <= 0.0 {
        return None;
    }
    let alpha = ((A * t_air_c) / (B + t_air_c)) + (rel_humidity_pct / 100.0).ln();
    Some((B * alpha) / (A - alpha))
}
