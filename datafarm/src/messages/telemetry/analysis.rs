use super::sensor::round_to;
use serde::{Deserialize, Serialize};

/// Result of analysing one photo, keyed by the file name the farm server
/// stored when the upload notification arrived.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Photo file name.
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// Coverage percentage, four decimals.
    #[serde(rename = "brightnessRatio")]
    pub brightness_ratio: f64,
}

impl AnalysisResult {
    /// Build a result, rounding the ratio for the wire.
    ///
    /// * `file_name`: name of the analysed photo.
    /// * `ratio`: coverage in percent.
    pub fn new(file_name: &str, ratio: f64) -> Self {
        Self {
            file_name: String::from(file_name),
            brightness_ratio: round_to(ratio, 4),
        }
    }

    /// Line appended to the local result log.
    pub fn log_line(&self) -> String {
        format!("{}:{:.4}%\n", self.file_name, self.brightness_ratio)
    }
}
