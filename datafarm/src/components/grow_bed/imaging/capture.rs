use crate::{
    components::grow_bed::actuating::{
        registry::{ActuatorRegistry, ActuatorState},
        safety::SafetyTimer,
    },
    devices::{
        hardware::camera::Camera,
        software::{analysis::Analyzer, bus::Publisher, storage::ObjectStore},
    },
    error::{AgentError, CaptureStep},
    messages::telemetry::analysis::AnalysisResult,
    utils::persist::{PhotoCounter, ResultLog},
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::{
    future::Future,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use strum_macros::Display;
use tokio::{
    sync::OwnedMutexGuard,
    task::{AbortHandle, JoinHandle},
};
use tracing::{error, info, warn};

fn default_farm_id() -> String {
    String::from("farm01")
}

fn default_camera_id() -> String {
    String::from("cam01")
}

fn default_illumination() -> String {
    String::from("led")
}

fn default_illumination_duration() -> Duration {
    Duration::from_secs(60)
}

fn default_pre_capture_delay() -> Duration {
    Duration::from_secs(20)
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_counter_file() -> PathBuf {
    PathBuf::from("picture_id.txt")
}

fn default_result_log() -> PathBuf {
    PathBuf::from("brightness_result.txt")
}

/// Photo workflow configuration.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct CaptureConfig {
    /// Farm id, first part of every photo name.
    #[serde(default = "default_farm_id")]
    pub farm_id: String,
    /// Camera id, second part of every photo name.
    #[serde(default = "default_camera_id")]
    pub camera_id: String,
    /// Actuator lighting the bed for the photo.
    #[serde(default = "default_illumination")]
    pub illumination: String,
    /// The light is forced off this long after it was switched on.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_illumination_duration")]
    pub illumination_duration: Duration,
    /// Time the light is left to settle before the photo.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_pre_capture_delay")]
    pub pre_capture_delay: Duration,
    /// Upper bound on each camera, storage and analysis call.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_step_timeout")]
    pub step_timeout: Duration,
    /// Where photos are written.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// Photo counter file.
    #[serde(default = "default_counter_file")]
    pub counter_file: PathBuf,
    /// Analysis result log.
    #[serde(default = "default_result_log")]
    pub result_log: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            farm_id: default_farm_id(),
            camera_id: default_camera_id(),
            illumination: default_illumination(),
            illumination_duration: default_illumination_duration(),
            pre_capture_delay: default_pre_capture_delay(),
            step_timeout: default_step_timeout(),
            image_dir: default_image_dir(),
            counter_file: default_counter_file(),
            result_log: default_result_log(),
        }
    }
}

impl CaptureConfig {
    /// The photo has to be taken while the light is still on.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.pre_capture_delay >= self.illumination_duration {
            return Err(AgentError::Config(format!(
                "pre capture delay {:?} must be shorter than the illumination duration {:?}",
                self.pre_capture_delay, self.illumination_duration
            )));
        }
        if self.step_timeout.is_zero() {
            return Err(AgentError::Config(String::from(
                "capture step timeout must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Photo name, i.e. `farm01_cam01_7_20240506_141503.jpg`.
    ///
    /// * `id`: photo counter value.
    /// * `at`: time of the capture.
    pub fn photo_name(&self, id: u64, at: DateTime<Local>) -> String {
        format!(
            "{}_{}_{id}_{}.jpg",
            self.farm_id,
            self.camera_id,
            at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Where the workflow is at. Anything but `Idle` means a session holds the
/// capture lock.
#[derive(Display, Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Illuminating,
    Capturing,
    Uploading,
    Analyzing,
}

/// What a completed workflow produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    /// Photo name.
    pub file_name: String,
    /// Photo location on disk.
    pub path: PathBuf,
    /// Storage reference, `None` when the upload failed.
    pub reference: Option<String>,
    /// Coverage ratio, four decimals.
    pub ratio: f64,
}

/// Camera, storage and analysis collaborators of the workflow.
#[derive(Clone)]
pub struct ImagingDevices {
    pub camera: Arc<dyn Camera>,
    pub store: Arc<dyn ObjectStore>,
    pub analyzer: Arc<dyn Analyzer>,
}

/// Topics the workflow reports on.
#[derive(Clone, Debug)]
pub struct CaptureTopics {
    /// Storage reference of the uploaded photo.
    pub photo: String,
    /// Analysis result.
    pub analysis: String,
}

/// Holds the capture lock for one session. Dropping it puts the session
/// back to `Idle` and then releases the lock, whatever way the workflow
/// ended.
struct SessionGuard {
    state: Arc<Mutex<CaptureState>>,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = CaptureState::Idle;
    }
}

/// Illuminate, capture, upload, analyse and publish. Only one session runs
/// at a time, a request while busy is turned away rather than queued.
pub struct CaptureSequencer {
    config: CaptureConfig,
    registry: Arc<ActuatorRegistry>,
    safety: Arc<SafetyTimer>,
    devices: ImagingDevices,
    publisher: Arc<dyn Publisher>,
    topics: CaptureTopics,
    counter: PhotoCounter,
    results: ResultLog,
    session: Arc<tokio::sync::Mutex<()>>,
    state: Arc<Mutex<CaptureState>>,
    running: Mutex<Running>,
}

/// Latest session task, and whether new sessions are still accepted.
#[derive(Default)]
struct Running {
    stopped: bool,
    task: Option<AbortHandle>,
}

impl CaptureSequencer {
    /// * `config`: `CaptureConfig`
    /// * `registry`: actuators, the light is switched through it.
    /// * `safety`: forces the light off.
    /// * `devices`: camera, storage and analyser.
    /// * `publisher`: bus the results go out on.
    /// * `topics`: `CaptureTopics`
    pub fn new(
        config: CaptureConfig,
        registry: Arc<ActuatorRegistry>,
        safety: Arc<SafetyTimer>,
        devices: ImagingDevices,
        publisher: Arc<dyn Publisher>,
        topics: CaptureTopics,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        if !registry.contains(&config.illumination) {
            return Err(AgentError::Config(format!(
                "illumination actuator {} is not on the relay board",
                config.illumination
            )));
        }
        Ok(Self {
            counter: PhotoCounter::new(&config.counter_file),
            results: ResultLog::new(&config.result_log),
            config,
            registry,
            safety,
            devices,
            publisher,
            topics,
            session: Arc::new(tokio::sync::Mutex::new(())),
            state: Arc::new(Mutex::new(CaptureState::Idle)),
            running: Mutex::new(Running::default()),
        })
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: CaptureState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        info!(%state, "capture session");
    }

    /// Start a session in the background without waiting for it. Fails
    /// with `CaptureBusy` when a session is already running, leaving that
    /// session untouched, and once `stop` has been called.
    pub fn trigger(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<CaptureReport, AgentError>>, AgentError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.stopped {
            return Err(AgentError::CaptureBusy);
        }
        let permit = self
            .session
            .clone()
            .try_lock_owned()
            .map_err(|_| AgentError::CaptureBusy)?;
        let guard = SessionGuard {
            state: self.state.clone(),
            _permit: permit,
        };
        self.transition(CaptureState::Illuminating);

        let sequencer = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let result = sequencer.run().await;
            match &result {
                Ok(report) => info!(
                    file = %report.file_name,
                    ratio = report.ratio,
                    uploaded = report.reference.is_some(),
                    "capture session complete"
                ),
                Err(e) => error!("capture session aborted: {e}"),
            }
            result
        });
        running.task = Some(handle.abort_handle());
        Ok(handle)
    }

    /// Refuse further sessions, abort the one in flight and wait until it
    /// has released the session. The illumination is left as the aborted
    /// session had it.
    pub async fn stop(&self) {
        let task = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            running.stopped = true;
            running.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        drop(self.session.lock().await);
        info!("capture sessions stopped");
    }

    async fn bounded<T, F>(&self, step: CaptureStep, call: F) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>>,
    {
        let after = self.config.step_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| AgentError::Timeout {
                operation: step.into(),
                after,
            })?
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) {
        if let Err(e) = self.publisher.publish(topic, payload).await {
            warn!("{e}");
        }
    }

    /// The workflow itself, the caller holds the session lock.
    async fn run(&self) -> Result<CaptureReport, AgentError> {
        let light = self.config.illumination.as_str();
        self.safety
            .arm(light, self.config.illumination_duration)
            .and_then(|()| self.registry.set(light, ActuatorState::On))
            .map_err(|e| AgentError::collaborator(CaptureStep::Illuminate, e))?;
        tokio::time::sleep(self.config.pre_capture_delay).await;

        self.transition(CaptureState::Capturing);
        let id = self.counter.next().await?;
        let file_name = self.config.photo_name(id, Local::now());
        tokio::fs::create_dir_all(&self.config.image_dir).await?;
        let path = self.config.image_dir.join(&file_name);
        self.bounded(CaptureStep::Capture, self.devices.camera.capture(&path))
            .await?;
        info!(file = %file_name, "photo taken");

        self.transition(CaptureState::Uploading);
        let reference = match self
            .bounded(
                CaptureStep::Upload,
                self.devices.store.upload(&path, &file_name),
            )
            .await
        {
            Ok(reference) => {
                self.publish(&self.topics.photo, reference.clone().into_bytes())
                    .await;
                Some(reference)
            }
            Err(e) => {
                warn!(file = %file_name, "keeping photo local only: {e}");
                None
            }
        };

        self.transition(CaptureState::Analyzing);
        let analyzer = self.devices.analyzer.clone();
        let photo = path.clone();
        let ratio = self
            .bounded(CaptureStep::Analyze, async move {
                tokio::task::spawn_blocking(move || analyzer.analyze(&photo))
                    .await
                    .map_err(|e| AgentError::collaborator(CaptureStep::Analyze, e))?
            })
            .await?;
        if !(0.0..=100.0).contains(&ratio) {
            return Err(AgentError::collaborator(
                CaptureStep::Analyze,
                format!("ratio {ratio} out of range"),
            ));
        }

        let result = AnalysisResult::new(&file_name, ratio);
        if let Err(e) = self.results.append(&result).await {
            warn!("{}", AgentError::collaborator(CaptureStep::Record, e));
        }
        match serde_json::to_vec(&result) {
            Ok(payload) => self.publish(&self.topics.analysis, payload).await,
            Err(e) => warn!("analysis result not serialisable: {e}"),
        }

        Ok(CaptureReport {
            file_name,
            path,
            reference,
            ratio: result.brightness_ratio,
        })
    }
}

static_assertions::assert_impl_all!(CaptureSequencer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        devices::{
            hardware::gpio::Level,
            software::analysis::{CoverageConfig, HueCoverage},
        },
        utils::tests::{
            relay_config, CallLog, FakeAnalyzer, FakeCamera, FakeStore, RecordingBus,
            RecordingLines,
        },
    };
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const PHOTO_TOPIC: &str = "photo/uploaded";
    const ANALYSIS_TOPIC: &str = "analysis/result";

    struct Bench {
        sequencer: Arc<CaptureSequencer>,
        registry: Arc<ActuatorRegistry>,
        lines: Arc<RecordingLines>,
        bus: Arc<RecordingBus>,
        calls: CallLog,
        dir: TempDir,
    }

    fn config(dir: &TempDir) -> CaptureConfig {
        CaptureConfig {
            image_dir: dir.path().join("images"),
            counter_file: dir.path().join("picture_id.txt"),
            result_log: dir.path().join("brightness_result.txt"),
            ..CaptureConfig::default()
        }
    }

    fn bench(devices: impl FnOnce(CallLog) -> ImagingDevices) -> Bench {
        let dir = tempfile::tempdir().unwrap();
        let lines = RecordingLines::new();
        let registry = Arc::new(ActuatorRegistry::new(&relay_config(), lines.clone()).unwrap());
        lines.clear();
        let (safety, _) = SafetyTimer::start(registry.clone());
        let bus = RecordingBus::new();
        let calls = CallLog::default();
        let sequencer = CaptureSequencer::new(
            config(&dir),
            registry.clone(),
            Arc::new(safety),
            devices(calls.clone()),
            bus.clone(),
            CaptureTopics {
                photo: String::from(PHOTO_TOPIC),
                analysis: String::from(ANALYSIS_TOPIC),
            },
        )
        .unwrap();
        Bench {
            sequencer: Arc::new(sequencer),
            registry,
            lines,
            bus,
            calls,
            dir,
        }
    }

    fn fakes(upload_fails: bool) -> impl FnOnce(CallLog) -> ImagingDevices {
        move |calls| ImagingDevices {
            camera: FakeCamera::new(calls.clone()),
            store: FakeStore::new(calls.clone(), upload_fails),
            analyzer: FakeAnalyzer::new(calls, 37.123_456),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_workflow() {
        let bench = bench(fakes(false));
        let start = Instant::now();

        let handle = bench.sequencer.trigger().unwrap();

        // Light on, nothing else yet.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(bench.registry.get("led").unwrap(), ActuatorState::On);
        assert!(bench.calls.lock().unwrap().is_empty());

        let report = handle.await.unwrap().unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(20));
        assert_eq!(*bench.calls.lock().unwrap(), vec!["capture", "upload", "analyze"]);
        assert!(report.file_name.starts_with("farm01_cam01_1_"));
        assert!(report.path.exists());
        assert_eq!(report.ratio, 37.1235);
        assert_eq!(bench.sequencer.state(), CaptureState::Idle);

        let reference = format!("test-bucket/{}", report.file_name);
        assert_eq!(report.reference.as_deref(), Some(reference.as_str()));
        assert_eq!(bench.bus.published(PHOTO_TOPIC), vec![reference]);

        let published = bench.bus.published(ANALYSIS_TOPIC);
        assert_eq!(published.len(), 1);
        let result: AnalysisResult = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(result.file_name, report.file_name);
        assert!((0.0..=100.0).contains(&result.brightness_ratio));

        let log = std::fs::read_to_string(bench.dir.path().join("brightness_result.txt")).unwrap();
        assert_eq!(log, format!("{}:37.1235%\n", report.file_name));

        // The light goes off with its safety timer, a minute after it came on.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(bench.registry.get("led").unwrap(), ActuatorState::Off);
        let led = bench.lines.timed_writes(6);
        assert_eq!(led.len(), 2);
        assert_eq!(led[1].0, Level::Low);
        assert!(led[1].1 - led[0].1 >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_request_is_rejected() {
        let bench = bench(fakes(false));

        let handle = bench.sequencer.trigger().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bench.sequencer.state(), CaptureState::Illuminating);

        assert!(matches!(
            bench.sequencer.trigger(),
            Err(AgentError::CaptureBusy)
        ));
        assert_eq!(bench.sequencer.state(), CaptureState::Illuminating);

        handle.await.unwrap().unwrap();
        assert_eq!(*bench.calls.lock().unwrap(), vec!["capture", "upload", "analyze"]);

        // The lock is free again once the session ended.
        let second = bench.sequencer.trigger().unwrap().await.unwrap().unwrap();
        assert!(second.file_name.starts_with("farm01_cam01_2_"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_session_and_refuses_new() {
        // Nothing in flight.
        let idle = bench(fakes(false));
        idle.sequencer.stop().await;
        assert!(matches!(
            idle.sequencer.trigger(),
            Err(AgentError::CaptureBusy)
        ));

        let bench = bench(fakes(false));
        let handle = bench.sequencer.trigger().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bench.registry.get("led").unwrap(), ActuatorState::On);

        bench.sequencer.stop().await;

        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(bench.sequencer.state(), CaptureState::Idle);
        assert!(bench.calls.lock().unwrap().is_empty());
        assert!(matches!(
            bench.sequencer.trigger(),
            Err(AgentError::CaptureBusy)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_still_publishes_analysis() {
        let bench = bench(fakes(true));

        let report = bench.sequencer.trigger().unwrap().await.unwrap().unwrap();

        assert_eq!(report.reference, None);
        assert_eq!(*bench.calls.lock().unwrap(), vec!["capture", "upload", "analyze"]);
        assert!(bench.bus.published(PHOTO_TOPIC).is_empty());
        assert_eq!(bench.bus.published(ANALYSIS_TOPIC).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_camera_times_out_and_releases_session() {
        let bench = bench(|calls| ImagingDevices {
            camera: FakeCamera::slow(calls.clone(), Duration::from_secs(120)),
            store: FakeStore::new(calls.clone(), false),
            analyzer: FakeAnalyzer::new(calls, 10.0),
        });

        let result = bench.sequencer.trigger().unwrap().await.unwrap();

        assert!(matches!(
            result,
            Err(AgentError::Timeout {
                operation: "capture",
                ..
            })
        ));
        assert_eq!(*bench.calls.lock().unwrap(), vec!["capture"]);
        assert_eq!(bench.sequencer.state(), CaptureState::Idle);
        assert!(bench.bus.published(ANALYSIS_TOPIC).is_empty());
        assert!(bench.sequencer.trigger().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_with_coverage_analysis() {
        let bench = bench(|calls| ImagingDevices {
            camera: FakeCamera::new(calls.clone()),
            store: FakeStore::new(calls, false),
            analyzer: Arc::new(HueCoverage::new(CoverageConfig::default())),
        });

        let report = bench.sequencer.trigger().unwrap().await.unwrap().unwrap();

        // One magenta column out of four.
        assert_eq!(report.ratio, 25.0);
    }

    #[test]
    fn test_photo_name() {
        let at = Local.with_ymd_and_hms(2024, 5, 6, 14, 15, 3).unwrap();
        assert_eq!(
            CaptureConfig::default().photo_name(7, at),
            "farm01_cam01_7_20240506_141503.jpg"
        );
    }

    #[test]
    fn test_delay_must_fit_in_illumination() {
        let config = CaptureConfig {
            pre_capture_delay: Duration::from_secs(60),
            ..CaptureConfig::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
        assert!(CaptureConfig::default().validate().is_ok());
    }
}
