use crate::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One temperature / relative humidity sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClimateReading {
    /// Degrees celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

/// Sensor measuring the air around the grow bed.
#[async_trait]
pub trait EnvironmentSensor: Send + Sync {
    /// Take one reading.
    async fn read(&self) -> Result<ClimateReading, AgentError>;
}

/// Configuration of the SHT3x sensor bound to the kernel driver.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct ClimateSensorConfig {
    /// Hwmon directory of the bound driver, such as
    /// `/sys/bus/i2c/devices/1-0044/hwmon/hwmon2`.
    pub hwmon_dir: PathBuf,
}

/// SHT3x read through the linux hwmon interface. The kernel driver handles
/// the i2c transaction and crc checking, values are exposed in milli units.
pub struct HwmonSht3x {
    hwmon_dir: PathBuf,
}

impl HwmonSht3x {
    /// Create the sensor by consuming its config.
    ///
    /// * `config`: `ClimateSensorConfig`
    pub fn new(config: ClimateSensorConfig) -> Self {
        Self {
            hwmon_dir: config.hwmon_dir,
        }
    }
}

/// Read a hwmon attribute holding a milli unit integer.
async fn read_milli(path: &Path) -> Result<f64, AgentError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AgentError::SensorRead {
            sensor: "climate",
            reason: format!("{}: {e}", path.display()),
        })?;
    parse_milli(&raw)
}

fn parse_milli(raw: &str) -> Result<f64, AgentError> {
    raw.trim()
        .parse::<i64>()
        .map(|v| v as f64 / 1000.0)
        .map_err(|e| AgentError::SensorRead {
            sensor: "climate",
            reason: format!("unexpected value {raw:?}: {e}"),
        })
}

#[async_trait]
impl EnvironmentSensor for HwmonSht3x {
    async fn read(&self) -> Result<ClimateReading, AgentError> {
        let temperature = read_milli(&self.hwmon_dir.join("temp1_input")).await?;
        let humidity = read_milli(&self.hwmon_dir.join("humidity1_input")).await?;
        Ok(ClimateReading {
            temperature,
            humidity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("23450\n", 23.45)]
    #[case("-1200", -1.2)]
    #[case("0", 0.0)]
    fn test_parse_milli_units(#[case] raw: &str, #[case] expected: f64) {
        let value = parse_milli(raw).unwrap();
        assert!((value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_parse_garbage_is_a_sensor_miss() {
        assert!(matches!(
            parse_milli("nan"),
            Err(AgentError::SensorRead { sensor: "climate", .. })
        ));
    }

    #[tokio::test]
    async fn test_read_from_hwmon_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("temp1_input"), "21500\n").unwrap();
        std::fs::write(dir.path().join("humidity1_input"), "55250\n").unwrap();
        let sensor = HwmonSht3x::new(ClimateSensorConfig {
            hwmon_dir: dir.path().to_path_buf(),
        });

        let reading = sensor.read().await.unwrap();

        assert_eq!(
            reading,
            ClimateReading {
                temperature: 21.5,
                humidity: 55.25
            }
        );
    }

    #[tokio::test]
    async fn test_missing_driver_is_a_sensor_miss() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = HwmonSht3x::new(ClimateSensorConfig {
            hwmon_dir: dir.path().join("hwmon9"),
        });

        assert!(matches!(
            sensor.read().await,
            Err(AgentError::SensorRead { .. })
        ));
    }
}
