use crate::{
    devices::software::bus::Publisher, error::AgentError,
    messages::telemetry::sensor::TelemetryRecord,
};
use chrono::Local;
use std::sync::Arc;
use tracing::{info, warn};

/// Formats the aggregated sensor state and publishes it on the sensor topic.
pub struct TelemetryPublisher {
    publisher: Arc<dyn Publisher>,
    topic: String,
    device_id: String,
}

impl TelemetryPublisher {
    /// * `publisher`: bus the record is sent over.
    /// * `topic`: sensor topic, i.e. `datafarm/sensor_data`.
    /// * `device_id`: id reported as `raspberryId`.
    pub fn new(publisher: Arc<dyn Publisher>, topic: &str, device_id: &str) -> Self {
        Self {
            publisher,
            topic: String::from(topic),
            device_id: String::from(device_id),
        }
    }

    /// Publish one telemetry cycle. A failed publish is logged and not
    /// retried, the next cycle carries fresh values anyway.
    ///
    /// * `soil_pct`: latest soil moisture.
    /// * `water_pct`: latest reservoir level.
    /// * `temp_avg`: ring average temperature.
    /// * `humidity_avg`: ring average humidity.
    pub async fn publish(
        &self,
        soil_pct: f64,
        water_pct: f64,
        temp_avg: f64,
        humidity_avg: f64,
    ) -> Result<TelemetryRecord, AgentError> {
        let record = TelemetryRecord::new(
            soil_pct,
            water_pct,
            temp_avg,
            humidity_avg,
            &self.device_id,
            Local::now(),
        );
        let payload = serde_json::to_vec(&record).map_err(|e| AgentError::Publish {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })?;

        match self.publisher.publish(&self.topic, payload).await {
            Ok(()) => {
                info!(
                    topic = %self.topic,
                    soil = record.soil_pct,
                    water = record.water_pct,
                    temperature = record.temp_avg,
                    humidity = record.humidity_avg,
                    "telemetry published"
                );
                Ok(record)
            }
            Err(e) => {
                warn!("telemetry dropped: {e}");
                Err(e)
            }
        }
    }
}
