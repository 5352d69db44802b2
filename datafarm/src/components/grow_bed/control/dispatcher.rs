use crate::{
    components::grow_bed::{
        actuating::{
            registry::{ActuatorRegistry, ActuatorState},
            safety::SafetyTimer,
        },
        imaging::capture::CaptureSequencer,
    },
    devices::software::bus::BusConfig,
    error::AgentError,
    messages::control::module::{Action, Command},
};
use std::sync::Arc;
use tracing::{info, warn};

/// Routes inbound bus messages. Switching is handled in place, captures
/// are handed off to the sequencer so the bus loop never waits on them.
pub struct CommandDispatcher {
    registry: Arc<ActuatorRegistry>,
    safety: Arc<SafetyTimer>,
    capture: Arc<CaptureSequencer>,
    capture_topic: String,
    capture_token: String,
}

impl CommandDispatcher {
    /// * `bus`: capture topic and token are taken from here.
    /// * `registry`: actuators commands switch.
    /// * `safety`: timers armed on switch on.
    /// * `capture`: photo workflow.
    pub fn new(
        bus: &BusConfig,
        registry: Arc<ActuatorRegistry>,
        safety: Arc<SafetyTimer>,
        capture: Arc<CaptureSequencer>,
    ) -> Self {
        Self {
            registry,
            safety,
            capture,
            capture_topic: bus.capture_topic.clone(),
            capture_token: bus.capture_token.clone(),
        }
    }

    /// Handle one inbound message. Failures are logged and the message is
    /// dropped, nothing here stops the bus loop.
    ///
    /// * `topic`: topic the message arrived on.
    /// * `payload`: raw body.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        match self.handle(topic, payload) {
            Ok(command) => info!(
                topic,
                module = %command.module,
                action = %command.action,
                "command handled"
            ),
            Err(e @ (AgentError::UnknownActuator(_) | AgentError::CaptureBusy)) => {
                info!(topic, "command discarded: {e}");
            }
            Err(e) => warn!(topic, "command discarded: {e}"),
        }
    }

    /// Parse and apply one message.
    ///
    /// * `topic`: topic the message arrived on.
    /// * `payload`: raw body.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> Result<Command, AgentError> {
        let command = Command::parse(topic, payload, &self.capture_topic, &self.capture_token)?;
        match command.action {
            Action::Capture => {
                // The session reports its own outcome.
                drop(self.capture.trigger()?);
            }
            Action::On => {
                if let Some(duration) = self.registry.auto_off(&command.module)? {
                    self.safety.arm(&command.module, duration)?;
                }
                self.registry.set(&command.module, ActuatorState::On)?;
            }
            Action::Off => {
                self.registry.set(&command.module, ActuatorState::Off)?;
                if self.registry.auto_off(&command.module)?.is_some() {
                    self.safety.cancel(&command.module)?;
                }
            }
        }
        Ok(command)
    }
}
