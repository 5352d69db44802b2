use crate::error::{AgentError, CaptureStep};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// A camera that writes a single still to disk when asked.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture one image into `path`.
    async fn capture(&self, path: &Path) -> Result<(), AgentError>;
}

fn default_command() -> String {
    String::from("rpicam-still")
}

fn default_warmup_ms() -> u64 {
    2000
}

/// Still capture settings. The default resolution is the full sensor
/// of the HQ camera module.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct StillCameraConfig {
    /// Capture program, `rpicam-still` or the older `libcamera-still`.
    #[serde(default = "default_command")]
    pub command: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Time given to the sensor to settle exposure before the shot.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
}

/// Camera driven by the libcamera still capture application.
pub struct StillCamera {
    config: StillCameraConfig,
}

impl StillCamera {
    /// Create a new still camera by consuming a config.
    ///
    /// * `config`: `StillCameraConfig`
    pub fn new(config: StillCameraConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the capture program.
    fn arguments(&self, path: &Path) -> Vec<String> {
        vec![
            String::from("--nopreview"),
            String::from("--width"),
            self.config.width.to_string(),
            String::from("--height"),
            self.config.height.to_string(),
            String::from("--timeout"),
            self.config.warmup_ms.to_string(),
            String::from("--output"),
            path.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Camera for StillCamera {
    async fn capture(&self, path: &Path) -> Result<(), AgentError> {
        let arguments = self.arguments(path);
        debug!(command = %self.config.command, ?arguments, "running still capture");
        let output = Command::new(&self.config.command)
            .args(&arguments)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AgentError::collaborator(CaptureStep::Capture, e))?;

        if !output.status.success() {
            return Err(AgentError::collaborator(
                CaptureStep::Capture,
                format!(
                    "{} exited with {}: {}",
                    self.config.command,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        if !path.is_file() {
            return Err(AgentError::collaborator(
                CaptureStep::Capture,
                format!("no image written to {}", path.display()),
            ));
        }
        Ok(())
    }
}
