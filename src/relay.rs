//! Module for building and delivering the two outbound relay payloads.
//!
//! Every accepted observation is forwarded to a Weather-Underground-style
//! service as an HTTP GET and to a CWOP/APRS server as one positional text
//! line over a short-lived TCP session. Neither delivery is retried; a
//! failure is reported per record and the connection pipeline moves on.
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::WeatherRecord;
use crate::units;

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for both outbound relay services.
pub struct RelayParameters {
    /// Parameters for the Weather Underground HTTP relay.
    pub wunderground: WundergroundParameters,
    /// Parameters for the CWOP/APRS TCP relay.
    pub cwop: CwopParameters,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the Weather Underground update endpoint.
pub struct WundergroundParameters {
    /// Full URL of the update endpoint.
    pub endpoint: String,
    /// Station identifier.
    pub station_id: String,
    /// Station upload password.
    pub password: String,
    /// Timeout for the complete HTTP request in seconds.
    pub timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the CWOP/APRS server connection.
pub struct CwopParameters {
    /// Hostname of the APRS-IS server.
    pub hostname: String,
    /// Port of the APRS-IS server.
    pub port: u32,
    /// CWOP station identifier.
    pub station_id: String,
    /// CWOP passcode, "-1" for receive-only registered stations.
    pub passcode: String,
    /// Fixed station position in APRS format, degrees and decimal minutes.
    pub position: String,
    /// Software tag sent in the login line and at the end of each frame.
    pub client_tag: String,
    /// Timeout for connect and write operations in seconds.
    pub timeout_secs: u64,
}

/// Reasons a relay payload cannot be built or delivered.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("dew point is undefined at {humidity} % relative humidity")]
    DewPointUndefined { humidity: f64 },
    #[error("invalid relay endpoint: {0}")]
    Endpoint(String),
    #[error("update request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("update rejected with HTTP status {0}")]
    HttpStatus(u16),
    #[error("aprs server address '{0}' did not resolve")]
    Resolve(String),
    #[error("aprs session failed: {0}")]
    Aprs(#[from] std::io::Error),
}

/// Formats a float the way the station's numbers appear in the update URL,
/// with at least one decimal place: `55.0`, not `55`.
fn decimal_string(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Builds the Weather Underground update URL for one observation.
///
/// The gust direction parameter is omitted entirely when the station reported
/// no direction. The receiving service treats a missing field as unknown and
/// a present-but-wrong value as bad data, so absence must stay absence. The
/// same rule is applied to the mean wind direction.
pub fn build_wunderground_url(
    params: &WundergroundParameters,
    record: &WeatherRecord,
) -> Result<Url, RelayError> {
    let dew_point_c = units::dew_point_celsius(record.temperature_mean_c, record.humidity_mean_pct)
        .ok_or(RelayError::DewPointUndefined {
            humidity: record.humidity_mean_pct,
        })?;

    let mut url =
        Url::parse(params.endpoint.as_str()).map_err(|err| RelayError::Endpoint(err.to_string()))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("ID", params.station_id.as_str());
        query.append_pair("PASSWORD", params.password.as_str());
        query.append_pair(
            "dateutc",
            record
                .server_timestamp
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .as_str(),
        );
        query.append_pair(
            "tempf",
            decimal_string(units::celsius_to_fahrenheit(record.temperature_mean_c)).as_str(),
        );
        query.append_pair("humidity", decimal_string(record.humidity_mean_pct).as_str());
        query.append_pair(
            "dewptf",
            decimal_string(units::celsius_to_fahrenheit(dew_point_c)).as_str(),
        );
        query.append_pair(
            "dailyrainin",
            decimal_string(units::mm_to_inch(record.rain_mm_sum)).as_str(),
        );
        query.append_pair(
            "windspeedmph",
            decimal_string(units::kmh_to_mph(record.wind_mean_kmh)).as_str(),
        );
        if let Some(degrees) = record.wind_dir_mean.degrees() {
            query.append_pair("winddir", degrees.to_string().as_str());
        }
        query.append_pair(
            "windgustmph",
            decimal_string(units::kmh_to_mph(record.wind_max_kmh)).as_str(),
        );
        if let Some(degrees) = record.wind_dir_max.degrees() {
            query.append_pair("windgustdir", degrees.to_string().as_str());
        }
    }

    Ok(url)
}

/// Values of one APRS weather block. Absent values render as dot filler so
/// the receiver can tell "not reported" from zero.
pub struct AprsValues {
    pub wind_dir_degrees: Option<i64>,
    pub wind_speed_mph: Option<i64>,
    pub wind_gust_mph: Option<i64>,
    pub temperature_f: Option<i64>,
    pub rain_last_hour_in100: Option<i64>,
    pub rain_last_24h_in100: Option<i64>,
    pub rain_since_midnight_in100: Option<i64>,
    pub humidity_pct: Option<i64>,
    pub pressure_tenth_mbar: Option<i64>,
}

/// Zero-pads a value to the field width, or fills the field with dots when
/// the value is absent.
fn str_or_dots(value: Option<i64>, width: usize) -> String {
    match value {
        Some(number) => format!("{:0width$}", number, width = width),
        None => ".".repeat(width),
    }
}

/// Assembles the fixed-width APRS weather block.
pub fn make_aprs_block(values: &AprsValues) -> String {
    format!(
        "{}/{}g{}t{}r{}p{}P{}h{}b{}",
        str_or_dots(values.wind_dir_degrees, 3),
        str_or_dots(values.wind_speed_mph, 3),
        str_or_dots(values.wind_gust_mph, 3),
        str_or_dots(values.temperature_f, 3),
        str_or_dots(values.rain_last_hour_in100, 3),
        str_or_dots(values.rain_last_24h_in100, 3),
        str_or_dots(values.rain_since_midnight_in100, 3),
        str_or_dots(values.humidity_pct, 2),
        str_or_dots(values.pressure_tenth_mbar, 5),
    )
}

/// Builds the complete APRS frame for one observation: station and path
/// header, UTC day-hour-minute timestamp, the fixed position, the weather
/// block, and the trailing client tag.
pub fn build_aprs_frame(params: &CwopParameters, record: &WeatherRecord) -> String {
    // The station has no per-hour rain counters. Humidity is clamped below
    // 100 and truncated, the field is two digits wide.
    let values = AprsValues {
        wind_dir_degrees: record.wind_dir_max.degrees().map(i64::from),
        wind_speed_mph: Some(units::kmh_to_mph(record.wind_mean_kmh).round() as i64),
        wind_gust_mph: Some(units::kmh_to_mph(record.wind_max_kmh).round() as i64),
        temperature_f: Some(units::celsius_to_fahrenheit(record.temperature_mean_c).round() as i64),
        rain_last_hour_in100: None,
        rain_last_24h_in100: None,
        rain_since_midnight_in100: Some(
            (units::mm_to_inch(record.rain_mm_sum) * 100.0).round() as i64,
        ),
        humidity_pct: Some(record.humidity_mean_pct.min(99.9) as i64),
        pressure_tenth_mbar: Some((record.pressure_mbar * 10.0).round() as i64),
    };

    format!(
        "{}>APRS,TCPIP*:@{}z{}{}{}",
        params.station_id,
        record.server_timestamp.format("%d%H%M"),
        params.position,
        make_aprs_block(&values),
        params.client_tag,
    )
}

/// Delivers one update URL with a single GET request. The response body is
/// discarded; a transport error or a non-success status fails the record.
pub fn deliver_http(client: &reqwest::blocking::Client, url: Url) -> Result<(), RelayError> {
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::HttpStatus(status.as_u16()));
    }
    Ok(())
}

/// Delivers one APRS frame over a short-lived TCP session: connect, log in,
/// send the frame, shut the connection down in order.
pub fn deliver_cwop(params: &CwopParameters, frame: &str) -> Result<(), RelayError> {
    let server = format!("{}:{}", params.hostname, params.port);
    let address = server
        .as_str()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| RelayError::Resolve(server.clone()))?;

    let timeout = time::Duration::from_secs(params.timeout_secs);
    let mut stream = TcpStream::connect_timeout(&address, timeout)?;
    stream.set_write_timeout(Some(timeout))?;

    let login = format!(
        "user {} pass {} vers {}\n",
        params.station_id, params.passcode, params.client_tag
    );
    stream.write_all(login.as_bytes())?;
    stream.write_all(frame.as_bytes())?;
    stream.write_all(b"\n")?;

    stream.shutdown(Shutdown::Both)?;
    Ok(())
}
