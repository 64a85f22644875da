//! Module that contains the decoded observation record and the line decoder.
use chrono::{DateTime, Utc};
use std::str::FromStr;
use thiserror::Error;

/// Number of comma-separated fields the station sends per observation line.
pub const FIELD_COUNT: usize = 19;

/// Compass direction reported by the station wind vane.
///
/// `Na` marks an observation window without a usable direction, for example
/// when no wind was measured. It maps to an absent value, never to 0 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindDirection {
    N,
    Ne,
    E,
    Se,
    S,
    Sw,
    W,
    Nw,
    Na,
}

impl WindDirection {
    /// Returns the direction as degrees clockwise from north, or `None` for
    /// `Na`.
    pub fn degrees(self) -> Option<u16> {
        match self {
            WindDirection::N => Some(0),
            WindDirection::Ne => Some(45),
            WindDirection::E => Some(90),
            WindDirection::Se => Some(135),
            WindDirection::S => Some(180),
            WindDirection::Sw => Some(225),
            WindDirection::W => Some(270),
            WindDirection::Nw => Some(315),
            WindDirection::Na => None,
        }
    }
}

impl FromStr for WindDirection {
    type Err = ();

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "N" => Ok(WindDirection::N),
            "NE" => Ok(WindDirection::Ne),
            "E" => Ok(WindDirection::E),
            "SE" => Ok(WindDirection::Se),
            "S" => Ok(WindDirection::S),
            "SW" => Ok(WindDirection::Sw),
            "W" => Ok(WindDirection::W),
            "NW" => Ok(WindDirection::Nw),
            "NA" => Ok(WindDirection::Na),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Struct representing one decoded observation from the weather station.
pub struct WeatherRecord {
    /// Start of the observation window as device-reported epoch seconds.
    pub start: i64,
    /// Length of the observation window in seconds.
    pub duration_s: f64,
    /// Mean air temperature in degrees Celsius.
    pub temperature_mean_c: f64,
    /// Minimum air temperature in degrees Celsius.
    pub temperature_min_c: f64,
    /// Maximum air temperature in degrees Celsius.
    pub temperature_max_c: f64,
    /// Mean relative humidity in percent, clamped to 0-100.
    pub humidity_mean_pct: f64,
    /// Minimum relative humidity in percent, clamped to 0-100.
    pub humidity_min_pct: f64,
    /// Maximum relative humidity in percent, clamped to 0-100.
    pub humidity_max_pct: f64,
    /// Rainfall during the observation window in millimeters.
    pub rain_mm: f64,
    /// Cumulative rainfall since midnight in millimeters.
    pub rain_mm_sum: f64,
    /// Mean wind speed in kilometers per hour.
    pub wind_mean_kmh: f64,
    /// Minimum wind speed in kilometers per hour.
    pub wind_min_kmh: f64,
    /// Maximum wind speed (gust) in kilometers per hour.
    pub wind_max_kmh: f64,
    /// Prevailing wind direction during the window.
    pub wind_dir_mean: WindDirection,
    /// Wind direction at the time of the gust.
    pub wind_dir_max: WindDirection,
    /// Mean solar irradiance in watts per square meter.
    pub solar_mean_wm2: f64,
    /// Device uptime in seconds.
    pub runtime_s: f64,
    /// Barometric pressure in millibars.
    pub pressure_mbar: f64,
    /// Soil temperature in degrees Celsius.
    pub soil_temperature_c: f64,
    /// Wall-clock receipt time, assigned once at decode. Not device time.
    pub server_timestamp: DateTime<Utc>,
}

/// Reasons a raw line does not decode into a [`WeatherRecord`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected {expected} comma-separated fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("field '{name}' is not a finite number: '{value}'")]
    NumericField { name: &'static str, value: String },
    #[error("field '{name}' is not a compass direction: '{value}'")]
    WindDirection { name: &'static str, value: String },
}

fn numeric_field(token: &str, name: &'static str) -> Result<f64, DecodeError> {
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DecodeError::NumericField {
            name,
            value: token.to_string(),
        }),
    }
}

fn direction_field(token: &str, name: &'static str) -> Result<WindDirection, DecodeError> {
    WindDirection::from_str(token).map_err(|_| DecodeError::WindDirection {
        name,
        value: token.to_string(),
    })
}

fn clamp_humidity(value: f64) -> f64 {
    value.max(0.0).min(100.0)
}

/// Decodes one terminator-stripped observation line into a [`WeatherRecord`].
///
/// The line must carry exactly [`FIELD_COUNT`] comma-separated fields in the
/// fixed order sent by the station. Every field except the two wind
/// directions must parse as a finite float. The receipt timestamp is taken
/// from the wall clock, not from the device-reported window start.
pub fn decode_line(line: &str) -> Result<WeatherRecord, DecodeError> {
    let tokens: Vec<&str> = line.trim_end().split(',').collect();

    if tokens.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount {
            expected: FIELD_COUNT,
            actual: tokens.len(),
        });
    }

    Ok(WeatherRecord {
        start: numeric_field(tokens[0], "start")? as i64,
        duration_s: numeric_field(tokens[1], "duration")?,
        temperature_mean_c: numeric_field(tokens[2], "T_mean")?,
        temperature_min_c: numeric_field(tokens[3], "T_min")?,
        temperature_max_c: numeric_field(tokens[4], "T_max")?,
        humidity_mean_pct: clamp_humidity(numeric_field(tokens[5], "RH_mean")?),
        humidity_min_pct: clamp_humidity(numeric_field(tokens[6], "RH_min")?),
        humidity_max_pct: clamp_humidity(numeric_field(tokens[7], "RH_max")?),
        rain_mm: numeric_field(tokens[8], "rain_mm")?,
        rain_mm_sum: numeric_field(tokens[9], "rain_mm_sum")?,
        wind_mean_kmh: numeric_field(tokens[10], "wind_mean")?,
        wind_min_kmh: numeric_field(tokens[11], "wind_min")?,
        wind_max_kmh: numeric_field(tokens[12], "wind_max")?,
        wind_dir_mean: direction_field(tokens[13], "winddir_mean")?,
        wind_dir_max: direction_field(tokens[14], "winddir_max")?,
        solar_mean_wm2: numeric_field(tokens[15], "I_mean")?,
        runtime_s: numeric_field(tokens[16], "runtime_s")?,
        pressure_mbar: numeric_field(tokens[17], "pressure_mbar")?,
        soil_temperature_c: numeric_field(tokens[18], "T_soil")?,
        server_timestamp: Utc::now(),
    })
}
