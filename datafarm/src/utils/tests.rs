use crate::{
    components::grow_bed::actuating::registry::{ActuatorConfig, RelayBoardConfig},
    devices::{
        hardware::{
            camera::Camera,
            climate::{ClimateReading, EnvironmentSensor},
            gpio::{Level, OutputLines},
            soil::{ExternalSensor, SoilReading},
        },
        software::{analysis::Analyzer, bus::Publisher, storage::ObjectStore},
    },
    error::{AgentError, CaptureStep},
};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::Instant;

/// Macro that checks a file shipped with the crate exists at compile time
/// and expands to its absolute path.
#[macro_export]
macro_rules! test_file_path {
    ($arg1:expr) => {{
        let _ = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), $arg1));
        concat!(env!("CARGO_MANIFEST_DIR"), $arg1)
    }};
}

/// Shared record of collaborator calls, in call order.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// Relay board wired the way the grow bed controller is.
pub fn relay_config() -> RelayBoardConfig {
    RelayBoardConfig::new(vec![
        ActuatorConfig::new("coolerA", 26),
        ActuatorConfig::new("coolerB", 19),
        ActuatorConfig::new("heater", 13).with_auto_off(Duration::from_secs(60)),
        ActuatorConfig::new("waterPump", 5).with_auto_off(Duration::from_secs(3)),
        ActuatorConfig::new("led", 6),
    ])
}

/// Output lines that remember every write and when it happened.
#[derive(Default)]
pub struct RecordingLines {
    configured: Mutex<Vec<u8>>,
    writes: Mutex<Vec<(u8, Level, Instant)>>,
    failing: Mutex<Option<u8>>,
}

impl RecordingLines {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later write to `line` fail.
    pub fn fail_on(&self, line: u8) {
        *self.failing.lock().unwrap() = Some(line);
    }

    pub fn configured(&self) -> usize {
        self.configured.lock().unwrap().len()
    }

    pub fn writes(&self) -> Vec<(u8, Level)> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(line, level, _)| (*line, *level))
            .collect()
    }

    pub fn timed_writes(&self, line: u8) -> Vec<(Level, Instant)> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _, _)| *l == line)
            .map(|(_, level, at)| (*level, *at))
            .collect()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }
}

impl OutputLines for RecordingLines {
    fn configure(&self, line: u8) -> Result<(), AgentError> {
        self.configured.lock().unwrap().push(line);
        Ok(())
    }

    fn write(&self, line: u8, level: Level) -> Result<(), AgentError> {
        if *self.failing.lock().unwrap() == Some(line) {
            return Err(AgentError::Line {
                line,
                reason: String::from("line stuck"),
            });
        }
        self.writes
            .lock()
            .unwrap()
            .push((line, level, Instant::now()));
        Ok(())
    }
}

/// Bus that keeps every published message.
#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
    failing: Mutex<bool>,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Payloads published on `topic`, as text.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for RecordingBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), AgentError> {
        if *self.failing.lock().unwrap() {
            return Err(AgentError::Publish {
                topic: String::from(topic),
                reason: String::from("broker unreachable"),
            });
        }
        self.messages
            .lock()
            .unwrap()
            .push((String::from(topic), payload));
        Ok(())
    }
}

/// Climate sensor that replays a script, `None` entries are read failures.
/// Once the script is exhausted the last entry repeats.
pub struct ScriptedClimate {
    script: Mutex<VecDeque<Option<ClimateReading>>>,
    last: Mutex<Option<ClimateReading>>,
}

impl ScriptedClimate {
    pub fn new(script: Vec<Option<(f64, f64)>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| {
                        r.map(|(temperature, humidity)| ClimateReading {
                            temperature,
                            humidity,
                        })
                    })
                    .collect(),
            ),
            last: Mutex::new(None),
        })
    }
}

#[async_trait]
impl EnvironmentSensor for ScriptedClimate {
    async fn read(&self) -> Result<ClimateReading, AgentError> {
        let next = self.script.lock().unwrap().pop_front();
        let reading = match next {
            Some(r) => {
                *self.last.lock().unwrap() = r;
                r
            }
            None => *self.last.lock().unwrap(),
        };
        reading.ok_or(AgentError::SensorRead {
            sensor: "climate",
            reason: String::from("no answer"),
        })
    }
}

/// Soil controller that replays a script, `None` entries are read failures.
pub struct ScriptedSoil {
    script: Mutex<VecDeque<Option<SoilReading>>>,
}

impl ScriptedSoil {
    pub fn new(script: Vec<Option<(f64, f64)>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(|(soil_pct, water_pct)| SoilReading { soil_pct, water_pct }))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl ExternalSensor for ScriptedSoil {
    async fn read(&self) -> Result<SoilReading, AgentError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or(AgentError::SensorRead {
                sensor: "soil",
                reason: String::from("no answer"),
            })
    }
}

/// Camera that writes a small magenta and green png in place of a photo.
pub struct FakeCamera {
    calls: CallLog,
    delay: Duration,
}

impl FakeCamera {
    pub fn new(calls: CallLog) -> Arc<Self> {
        Self::slow(calls, Duration::ZERO)
    }

    /// Camera that takes `delay` to return.
    pub fn slow(calls: CallLog, delay: Duration) -> Arc<Self> {
        Arc::new(Self { calls, delay })
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn capture(&self, path: &Path) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push("capture");
        tokio::time::sleep(self.delay).await;
        let image = image::RgbImage::from_fn(4, 4, |x, _| {
            if x == 0 {
                image::Rgb([255, 0, 255])
            } else {
                image::Rgb([20, 160, 20])
            }
        });
        image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| AgentError::collaborator(CaptureStep::Capture, e))
    }
}

/// Object store that either accepts everything or nothing.
pub struct FakeStore {
    calls: CallLog,
    fail: bool,
}

impl FakeStore {
    pub fn new(calls: CallLog, fail: bool) -> Arc<Self> {
        Arc::new(Self { calls, fail })
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn upload(&self, path: &Path, name: &str) -> Result<String, AgentError> {
        self.calls.lock().unwrap().push("upload");
        if self.fail || !path.exists() {
            return Err(AgentError::collaborator(
                CaptureStep::Upload,
                "bucket refused the object",
            ));
        }
        Ok(format!("test-bucket/{name}"))
    }
}

/// Analyser that reports a fixed ratio.
pub struct FakeAnalyzer {
    calls: CallLog,
    ratio: f64,
}

impl FakeAnalyzer {
    pub fn new(calls: CallLog, ratio: f64) -> Arc<Self> {
        Arc::new(Self { calls, ratio })
    }
}

impl Analyzer for FakeAnalyzer {
    fn analyze(&self, path: &Path) -> Result<f64, AgentError> {
        self.calls.lock().unwrap().push("analyze");
        if !path.exists() {
            return Err(AgentError::collaborator(CaptureStep::Analyze, "no photo"));
        }
        Ok(self.ratio)
    }
}
