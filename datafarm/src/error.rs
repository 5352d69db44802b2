use std::time::Duration;
use strum_macros::{Display, IntoStaticStr};
use thiserror::Error;

/// Steps of the capture workflow, used to tag collaborator failures.
#[derive(Display, IntoStaticStr, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum CaptureStep {
    /// Switching on the grow light before the photo.
    Illuminate,
    /// Taking the photo.
    Capture,
    /// Sending the photo to object storage.
    Upload,
    /// Computing the coverage ratio.
    Analyze,
    /// Appending the ratio to the local result log.
    Record,
}

/// Every failure the agent can contain. None of these stop the agent once
/// it is running, the caller logs and carries on with the next command,
/// tick or capture. `Config` is the only variant raised at startup.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Command target is not in the registry built at startup.
    #[error("unknown actuator `{0}`")]
    UnknownActuator(String),
    /// Payload could not be parsed.
    #[error("malformed message on `{topic}`: {reason}")]
    MalformedMessage { topic: String, reason: String },
    /// Payload parsed, but the command value is neither on nor off.
    #[error("unknown command `{command}` for `{module}`")]
    UnknownCommand { module: String, command: String },
    /// Transient sensor miss, retried naturally on the next tick.
    #[error("{sensor} read failed: {reason}")]
    SensorRead {
        sensor: &'static str,
        reason: String,
    },
    /// A capture was requested while another one is in flight.
    #[error("capture already in progress")]
    CaptureBusy,
    /// A capture collaborator failed.
    #[error("capture step `{step}` failed: {reason}")]
    Collaborator { step: CaptureStep, reason: String },
    /// An external call did not return in time.
    #[error("`{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// Bus rejected the message or the transport failed.
    #[error("publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },
    /// Output line could not be driven.
    #[error("output line {line} failed: {reason}")]
    Line { line: u8, reason: String },
    /// Configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Helper for tagging a collaborator failure with its workflow step.
    pub fn collaborator(step: CaptureStep, reason: impl ToString) -> Self {
        Self::Collaborator {
            step,
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
