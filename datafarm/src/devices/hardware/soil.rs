use crate::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::{
    io::{BufRead, BufReader, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Request byte understood by the sensor controller firmware.
const REQUEST: &[u8] = b"S";

/// One soil moisture / reservoir level sample, already in percent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SoilReading {
    /// Soil moisture percentage.
    pub soil_pct: f64,
    /// Reservoir water level percentage.
    pub water_pct: f64,
}

/// Sensor controller that answers soil and water readings on request.
#[async_trait]
pub trait ExternalSensor: Send + Sync {
    /// Request and read one sample.
    async fn read(&self) -> Result<SoilReading, AgentError>;
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_water_scale() -> f64 {
    2.0
}

/// Configuration for the microcontroller attached over usb serial.
#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
pub struct SoilSensorConfig {
    /// Device node, i.e. `/dev/ttyACM0`.
    pub port: String,
    /// Line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// The level probe reports half scale, the raw value is multiplied by this.
    #[serde(default = "default_water_scale")]
    pub water_scale: f64,
}

/// Parse a `soil,water` response line from the controller.
///
/// * `line`: raw line without framing.
/// * `water_scale`: multiplier for the water probe.
pub fn parse_reading(line: &str, water_scale: f64) -> Result<SoilReading, AgentError> {
    let format_err = |reason: String| AgentError::SensorRead {
        sensor: "soil",
        reason,
    };
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() != 2 {
        return Err(format_err(format!("expected `soil,water`, got {line:?}")));
    }
    let soil_raw = fields[0]
        .trim()
        .parse::<f64>()
        .map_err(|e| format_err(format!("soil field {:?}: {e}", fields[0])))?;
    let water_raw = fields[1]
        .trim()
        .parse::<f64>()
        .map_err(|e| format_err(format!("water field {:?}: {e}", fields[1])))?;

    Ok(SoilReading {
        soil_pct: soil_raw,
        water_pct: water_raw * water_scale,
    })
}

/// Sensor controller on a serial line. The port is opened once and
/// kept for the lifetime of the agent, reads happen on the blocking pool.
pub struct SerialSensorController {
    port: Arc<Mutex<BufReader<Box<dyn SerialPort>>>>,
    water_scale: f64,
}

impl SerialSensorController {
    /// Open the serial port described by the config.
    ///
    /// * `config`: `SoilSensorConfig`
    /// * `timeout`: how long a single response may take.
    pub fn open(config: &SoilSensorConfig, timeout: Duration) -> Result<Self, AgentError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| AgentError::Config(format!("serial port {}: {e}", config.port)))?;
        Ok(Self {
            port: Arc::new(Mutex::new(BufReader::new(port))),
            water_scale: config.water_scale,
        })
    }
}

#[async_trait]
impl ExternalSensor for SerialSensorController {
    async fn read(&self) -> Result<SoilReading, AgentError> {
        let port = self.port.clone();
        let water_scale = self.water_scale;
        let serial_err = |reason: String| AgentError::SensorRead {
            sensor: "soil",
            reason,
        };

        let line = tokio::task::spawn_blocking(move || {
            let mut port = port
                .lock()
                .map_err(|_| serial_err("serial port lock poisoned".into()))?;
            port.get_mut()
                .write_all(REQUEST)
                .map_err(|e| serial_err(e.to_string()))?;
            let mut line = String::new();
            port.read_line(&mut line)
                .map_err(|e| serial_err(e.to_string()))?;
            Ok::<_, AgentError>(line)
        })
        .await
        .map_err(|e| AgentError::SensorRead {
            sensor: "soil",
            reason: e.to_string(),
        })??;

        tracing::debug!(raw = %line.trim(), "sensor controller response");
        parse_reading(&line, water_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("41.0,30.5\r\n", 2.0, 41.0, 61.0)]
    #[case(" 12 , 7 ", 1.0, 12.0, 7.0)]
    #[case("0,0", 2.0, 0.0, 0.0)]
    fn test_parse_controller_line(
        #[case] line: &str,
        #[case] scale: f64,
        #[case] soil: f64,
        #[case] water: f64,
    ) {
        let reading = parse_reading(line, scale).unwrap();
        assert_eq!(
            reading,
            SoilReading {
                soil_pct: soil,
                water_pct: water
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("41.0")]
    #[case("41.0,30.5,1")]
    #[case("wet,dry")]
    fn test_reject_malformed_line(#[case] line: &str) {
        assert!(matches!(
            parse_reading(line, 2.0),
            Err(AgentError::SensorRead { sensor: "soil", .. })
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config: SoilSensorConfig = serde_yaml::from_str("port: /dev/ttyACM0").unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.water_scale, 2.0);
    }
}
