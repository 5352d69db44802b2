use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Electrical level of an output line.
#[derive(EnumString, Display, Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    /// Line pulled to ground.
    Low,
    /// Line driven to the supply rail.
    High,
}

/// Physical output lines that the relay board is wired to. The registry is
/// the only caller, so implementations do not need to guard against
/// concurrent writes to the same line.
pub trait OutputLines: Send + Sync {
    /// Prepare the line to be driven as an output.
    fn configure(&self, line: u8) -> Result<(), AgentError>;
    /// Drive the line to a level.
    fn write(&self, line: u8, level: Level) -> Result<(), AgentError>;
}

/// Output lines driven through the linux sysfs gpio interface, i.e. the
/// BCM numbered pins of the raspberry pi header.
pub struct SysfsGpio {
    /// Usually `/sys/class/gpio`.
    root: PathBuf,
}

impl SysfsGpio {
    /// Create the driver rooted at a sysfs gpio directory.
    ///
    /// * `root`: path to the gpio class directory.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn line_dir(&self, line: u8) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }
}

impl OutputLines for SysfsGpio {
    fn configure(&self, line: u8) -> Result<(), AgentError> {
        let line_err = |e: std::io::Error| AgentError::Line {
            line,
            reason: e.to_string(),
        };
        if !self.line_dir(line).is_dir() {
            debug!(line, "exporting gpio line");
            fs::write(self.root.join("export"), line.to_string()).map_err(line_err)?;
        }
        fs::write(self.line_dir(line).join("direction"), "out").map_err(line_err)
    }

    fn write(&self, line: u8, level: Level) -> Result<(), AgentError> {
        let value = match level {
            Level::High => "1",
            Level::Low => "0",
        };
        fs::write(self.line_dir(line).join("value"), value).map_err(|e| AgentError::Line {
            line,
            reason: e.to_string(),
        })
    }
}
