use crate::{
    components::grow_bed::{reporting::telemetry::TelemetryPublisher, sensing::ring::SampleRing},
    devices::hardware::{
        climate::{ClimateReading, EnvironmentSensor},
        soil::ExternalSensor,
    },
    error::AgentError,
    messages::telemetry::sensor::TelemetryRecord,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use strum_macros::{Display, IntoStaticStr};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

fn default_environment_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_soil_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_ring_capacity() -> usize {
    6
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Sampling cadence and aggregation window.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct SamplingConfig {
    /// Period of the temperature / humidity loop, seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_environment_interval")]
    pub environment_interval: Duration,
    /// Period of the soil / water loop, which also publishes telemetry.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_soil_interval")]
    pub soil_interval: Duration,
    /// Number of environmental samples averaged.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Upper bound on a single sensor read.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_read_timeout")]
    pub read_timeout: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            environment_interval: default_environment_interval(),
            soil_interval: default_soil_interval(),
            ring_capacity: default_ring_capacity(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.environment_interval.is_zero() || self.soil_interval.is_zero() {
            return Err(AgentError::Config(String::from(
                "sampling intervals must be greater than zero",
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(AgentError::Config(String::from(
                "sensor read timeout must be greater than zero",
            )));
        }
        if self.ring_capacity == 0 {
            return Err(AgentError::Config(String::from(
                "ring capacity must be at least one",
            )));
        }
        Ok(())
    }
}

/// Quantity a sample measures.
#[derive(Display, IntoStaticStr, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum SampleKind {
    Temperature,
    Humidity,
    Soil,
    Water,
}

/// One timestamped measurement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorSample {
    pub kind: SampleKind,
    pub value: f64,
    pub timestamp: DateTime<Local>,
}

impl SensorSample {
    fn now(kind: SampleKind, value: f64) -> Self {
        Self {
            kind,
            value,
            timestamp: Local::now(),
        }
    }
}

/// Temperature and humidity windows. Both are written together so their
/// cursors never drift apart.
pub struct ClimateRings {
    temperature: SampleRing,
    humidity: SampleRing,
}

impl ClimateRings {
    /// * `capacity`: window length shared by both rings.
    pub fn new(capacity: usize) -> Result<Self, AgentError> {
        Ok(Self {
            temperature: SampleRing::new(capacity)?,
            humidity: SampleRing::new(capacity)?,
        })
    }

    /// Write one reading at the shared cursor.
    pub fn record(&mut self, reading: ClimateReading) {
        self.temperature.push(reading.temperature);
        self.humidity.push(reading.humidity);
    }

    /// Current `(temperature, humidity)` averages.
    pub fn averages(&self) -> (f64, f64) {
        (self.temperature.average(), self.humidity.average())
    }

    pub fn cursor(&self) -> usize {
        self.temperature.cursor()
    }
}

/// Bound a sensor read by the configured timeout.
async fn bounded<T, F>(operation: &'static str, after: Duration, read: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    tokio::time::timeout(after, read)
        .await
        .map_err(|_| AgentError::Timeout { operation, after })?
}

/// Environmental and soil sampling. The fast loop feeds the climate rings,
/// the slow loop reads the soil controller and publishes a telemetry cycle
/// from the latest ring averages.
pub struct SensorSampler {
    config: SamplingConfig,
    climate: Arc<dyn EnvironmentSensor>,
    soil: Arc<dyn ExternalSensor>,
    rings: Mutex<ClimateRings>,
    telemetry: TelemetryPublisher,
}

impl SensorSampler {
    /// * `config`: `SamplingConfig`
    /// * `climate`: temperature / humidity sensor.
    /// * `soil`: soil / water sensor controller.
    /// * `telemetry`: where the slow loop reports.
    pub fn new(
        config: SamplingConfig,
        climate: Arc<dyn EnvironmentSensor>,
        soil: Arc<dyn ExternalSensor>,
        telemetry: TelemetryPublisher,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            rings: Mutex::new(ClimateRings::new(config.ring_capacity)?),
            config,
            climate,
            soil,
            telemetry,
        })
    }

    /// Current `(temperature, humidity)` averages.
    pub fn averages(&self) -> (f64, f64) {
        self.rings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .averages()
    }

    /// One fast loop tick. Nothing is written when the read fails.
    pub async fn sample_climate(&self) -> Result<[SensorSample; 2], AgentError> {
        let reading = bounded(
            "climate read",
            self.config.read_timeout,
            self.climate.read(),
        )
        .await?;
        let cursor = {
            let mut rings = self.rings.lock().unwrap_or_else(PoisonError::into_inner);
            rings.record(reading);
            rings.cursor()
        };
        debug!(
            temperature = reading.temperature,
            humidity = reading.humidity,
            cursor,
            "climate sampled"
        );
        Ok([
            SensorSample::now(SampleKind::Temperature, reading.temperature),
            SensorSample::now(SampleKind::Humidity, reading.humidity),
        ])
    }

    /// One slow loop tick. Telemetry is only published when the soil
    /// controller answered.
    pub async fn sample_soil(&self) -> Result<TelemetryRecord, AgentError> {
        let reading = bounded("soil read", self.config.read_timeout, self.soil.read()).await?;
        let soil = SensorSample::now(SampleKind::Soil, reading.soil_pct);
        let water = SensorSample::now(SampleKind::Water, reading.water_pct);
        debug!(soil = soil.value, water = water.value, "soil sampled");

        let (temp_avg, humidity_avg) = self.averages();
        self.telemetry
            .publish(soil.value, water.value, temp_avg, humidity_avg)
            .await
    }
}

/// Unit struct for adding the periodic behaviour to the sampler.
pub struct SensorSamplerController;

impl SensorSamplerController {
    /// Spawn the fast and slow loops. Each loop waits one full period before
    /// its first read and awaits its own tick before asking for the next one.
    /// Missed ticks are skipped rather than bunched.
    ///
    /// * `sampler`: shared sampler.
    pub fn start(sampler: Arc<SensorSampler>) -> [JoinHandle<()>; 2] {
        let fast = sampler.clone();
        let environment = tokio::spawn(async move {
            let period = fast.config.environment_interval;
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = fast.sample_climate().await {
                    warn!("skipping climate sample: {e}");
                }
            }
        });

        let slow = sampler;
        let soil = tokio::spawn(async move {
            let period = slow.config.soil_interval;
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = slow.sample_soil().await {
                    warn!("skipping telemetry cycle: {e}");
                }
            }
        });

        [environment, soil]
    }
}
