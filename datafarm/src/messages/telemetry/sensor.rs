use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Layout of the timestamp expected by the farm server.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Round to a number of decimal places for the wire.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Aggregated sensor state published once per soil sampling cycle.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Latest soil moisture percentage.
    #[serde(rename = "soilMoisture")]
    pub soil_pct: f64,
    /// Latest reservoir level percentage.
    #[serde(rename = "waterLevel")]
    pub water_pct: f64,
    /// Ring buffer average temperature, two decimals.
    #[serde(rename = "temperature")]
    pub temp_avg: f64,
    /// Ring buffer average humidity, two decimals.
    #[serde(rename = "humidity")]
    pub humidity_avg: f64,
    /// Id of the controller the readings came from.
    #[serde(rename = "raspberryId")]
    pub device_id: String,
    /// Local time of the publish cycle.
    pub timestamp: String,
}

impl TelemetryRecord {
    /// Build a record, rounding the averages for the wire.
    ///
    /// * `soil_pct`: soil moisture percentage.
    /// * `water_pct`: reservoir level percentage.
    /// * `temp_avg`: average temperature.
    /// * `humidity_avg`: average humidity.
    /// * `device_id`: controller id.
    /// * `at`: time of the cycle.
    pub fn new<Tz>(
        soil_pct: f64,
        water_pct: f64,
        temp_avg: f64,
        humidity_avg: f64,
        device_id: &str,
        at: DateTime<Tz>,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        Self {
            soil_pct,
            water_pct,
            temp_avg: round_to(temp_avg, 2),
            humidity_avg: round_to(humidity_avg, 2),
            device_id: String::from(device_id),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}
