use crate::{
    components::grow_bed::{
        actuating::{
            registry::{ActuatorRegistry, RelayBoardConfig},
            safety::SafetyTimer,
        },
        control::dispatcher::CommandDispatcher,
        imaging::capture::{CaptureConfig, CaptureSequencer, CaptureTopics, ImagingDevices},
        reporting::telemetry::TelemetryPublisher,
        sensing::sampler::{SamplingConfig, SensorSampler, SensorSamplerController},
    },
    devices::{
        hardware::{
            camera::{StillCamera, StillCameraConfig},
            climate::{ClimateSensorConfig, EnvironmentSensor, HwmonSht3x},
            gpio::{OutputLines, SysfsGpio},
            soil::{ExternalSensor, SerialSensorController, SoilSensorConfig},
        },
        software::{
            analysis::{CoverageConfig, HueCoverage},
            bus::{BusConfig, MqttBus, Publisher},
            storage::{CloudBucket, StorageConfig},
        },
    },
    error::AgentError,
};
use rumqttc::{Event, EventLoop, Packet};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path, sync::Arc, time::Duration};
use tokio::{
    signal::unix::{signal, SignalKind},
    task::JoinHandle,
};
use tracing::{error, info, warn};

/// Pause before polling the bus again after a connection error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Everything needed to build the agent for one grow bed controller.
#[derive(Deserialize, Serialize, Clone, PartialEq, Debug)]
pub struct AgentConfig {
    /// Controller id, reported as `raspberryId` in telemetry.
    pub device_id: String,
    /// Broker and topics.
    pub bus: BusConfig,
    /// Relay board wiring.
    pub relays: RelayBoardConfig,
    /// Photo workflow.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Sensor loops.
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Temperature / humidity sensor.
    pub climate: ClimateSensorConfig,
    /// Soil / water sensor controller.
    pub soil: SoilSensorConfig,
    /// Still camera.
    pub camera: StillCameraConfig,
    /// Photo bucket.
    pub storage: StorageConfig,
    /// Coverage band.
    #[serde(default)]
    pub coverage: CoverageConfig,
}

impl AgentConfig {
    /// Read and validate a YAML config file.
    ///
    /// * `filepath`: path to the config file.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, AgentError> {
        let file = Path::new(&filepath);
        if !file.is_file() {
            return Err(AgentError::Config(format!(
                "could not locate the config file {}",
                file.display()
            )));
        }
        let config = config::Config::builder()
            .add_source(config::File::new(
                &file.to_string_lossy(),
                config::FileFormat::Yaml,
            ))
            .build()?
            .try_deserialize::<AgentConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Cross checks that a well formed file can still get wrong.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.device_id.is_empty() {
            return Err(AgentError::Config(String::from("device id is empty")));
        }
        self.relays.validate()?;
        self.sampling.validate()?;
        self.capture.validate()?;
        if !self
            .relays
            .actuators
            .iter()
            .any(|a| a.name == self.capture.illumination)
        {
            return Err(AgentError::Config(format!(
                "illumination actuator {} is not on the relay board",
                self.capture.illumination
            )));
        }
        Ok(())
    }
}

/// External collaborators the agent is built from.
pub struct Collaborators {
    pub lines: Arc<dyn OutputLines>,
    pub climate: Arc<dyn EnvironmentSensor>,
    pub soil: Arc<dyn ExternalSensor>,
    pub imaging: ImagingDevices,
    pub publisher: Arc<dyn Publisher>,
}

impl Collaborators {
    /// The linux implementations configured in `config`. Opening the soil
    /// controller port is the only step that touches hardware.
    ///
    /// * `config`: `AgentConfig`
    /// * `publisher`: connected bus.
    pub fn from_config(
        config: &AgentConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            lines: Arc::new(SysfsGpio::new(&config.relays.gpio_root)),
            climate: Arc::new(HwmonSht3x::new(config.climate.clone())),
            soil: Arc::new(SerialSensorController::open(
                &config.soil,
                config.sampling.read_timeout,
            )?),
            imaging: ImagingDevices {
                camera: Arc::new(StillCamera::new(config.camera.clone())),
                store: Arc::new(CloudBucket::new(config.storage.clone())),
                analyzer: Arc::new(HueCoverage::new(config.coverage.clone())),
            },
            publisher,
        })
    }
}

/// The agent context. Built once at startup and shared by every task.
pub struct GrowBedAgent {
    pub config: AgentConfig,
    pub registry: Arc<ActuatorRegistry>,
    pub safety: Arc<SafetyTimer>,
    pub sampler: Arc<SensorSampler>,
    pub capture: Arc<CaptureSequencer>,
    pub dispatcher: CommandDispatcher,
    safety_task: JoinHandle<()>,
}

impl GrowBedAgent {
    /// Wire the components together. Every actuator is driven off and the
    /// safety scheduler is spawned, so this has to run inside the runtime.
    ///
    /// * `config`: validated `AgentConfig`
    /// * `collaborators`: `Collaborators`
    pub fn new(config: AgentConfig, collaborators: Collaborators) -> Result<Self, AgentError> {
        config.validate()?;
        let registry = Arc::new(ActuatorRegistry::new(&config.relays, collaborators.lines)?);
        let (safety, safety_task) = SafetyTimer::start(registry.clone());
        let safety = Arc::new(safety);

        let telemetry = TelemetryPublisher::new(
            collaborators.publisher.clone(),
            &config.bus.sensor_topic,
            &config.device_id,
        );
        let sampler = Arc::new(SensorSampler::new(
            config.sampling.clone(),
            collaborators.climate,
            collaborators.soil,
            telemetry,
        )?);
        let capture = Arc::new(CaptureSequencer::new(
            config.capture.clone(),
            registry.clone(),
            safety.clone(),
            collaborators.imaging,
            collaborators.publisher,
            CaptureTopics {
                photo: config.bus.photo_topic.clone(),
                analysis: config.bus.analysis_topic.clone(),
            },
        )?);
        let dispatcher =
            CommandDispatcher::new(&config.bus, registry.clone(), safety.clone(), capture.clone());

        info!(
            device = %config.device_id,
            actuators = ?registry.names().collect::<Vec<_>>(),
            "grow bed agent ready"
        );
        Ok(Self {
            config,
            registry,
            safety,
            sampler,
            capture,
            dispatcher,
            safety_task,
        })
    }

    /// Inbound message from the bus.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        self.dispatcher.dispatch(topic, payload);
    }

    /// Stop the capture sessions, then drive everything off and stop the
    /// timers. Any deadline still pending is moot once the actuators are off.
    pub async fn shutdown(&self) {
        self.capture.stop().await;
        self.safety_task.abort();
        self.registry.all_off();
        info!(state = ?self.registry.snapshot(), "actuators released");
    }
}

/// Unit struct for adding the run loop to the agent.
pub struct GrowBedAgentController;

impl GrowBedAgentController {
    /// Build the agent from a config file and run it until a shutdown
    /// signal arrives.
    ///
    /// * `config`: `AgentConfig`
    pub async fn start(config: AgentConfig) -> Result<(), AgentError> {
        let (bus, eventloop) = MqttBus::connect(&config.bus);
        let collaborators = Collaborators::from_config(&config, Arc::new(bus.clone()))?;
        let agent = Arc::new(GrowBedAgent::new(config, collaborators)?);
        Self::run(agent, bus, eventloop).await
    }

    /// Drive the bus event loop and the sampling loops. The subscriptions
    /// are issued again on every connection, the broker may have dropped
    /// the session. All actuators are off when this returns.
    ///
    /// * `agent`: shared agent context.
    /// * `bus`: client side of the bus.
    /// * `eventloop`: receive side of the bus.
    pub async fn run(
        agent: Arc<GrowBedAgent>,
        bus: MqttBus,
        mut eventloop: EventLoop,
    ) -> Result<(), AgentError> {
        let samplers = SensorSamplerController::start(agent.sampler.clone());
        let subscriptions = agent.config.bus.subscriptions();

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut sigterm = signal(SignalKind::terminate())?;

        let reason = loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        agent.on_message(&publish.topic, &publish.payload);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(host = %agent.config.bus.host, "bus connected");
                        if let Err(e) = bus.subscribe(&subscriptions).await {
                            error!("subscribe failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => warn!("bus disconnected"),
                    Ok(_) => {}
                    Err(e) => {
                        error!("bus connection error: {e}");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                },
                _ = &mut ctrl_c => break "SIGINT",
                _ = sigterm.recv() => break "SIGTERM",
            }
        };

        warn!(signal = reason, "shutting down, switching all actuators off");
        for sampler in &samplers {
            sampler.abort();
        }
        // The loops are stopped before the lines are released.
        futures::future::join_all(samplers).await;
        agent.shutdown().await;
        bus.disconnect().await;
        info!("shutdown complete");
        Ok(())
    }
}

static_assertions::assert_impl_all!(GrowBedAgent: Send, Sync);
