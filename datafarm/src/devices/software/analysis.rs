use crate::error::{AgentError, CaptureStep};
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Computes the coverage ratio of a photo, in percent.
pub trait Analyzer: Send + Sync {
    /// Analyse the image at `path`, returning a value within `[0, 100]`.
    fn analyze(&self, path: &Path) -> Result<f64, AgentError>;
}

fn default_lower() -> [u8; 3] {
    [140, 50, 50]
}

fn default_upper() -> [u8; 3] {
    [180, 255, 255]
}

/// Hue band to measure. Values use the 8 bit hsv convention where hue
/// is halved into `[0, 180]` and saturation / value span `[0, 255]`.
/// The default band picks up the magenta of the grow light reflected
/// by the leaves.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct CoverageConfig {
    /// Inclusive lower hsv bound.
    #[serde(default = "default_lower")]
    pub lower: [u8; 3],
    /// Inclusive upper hsv bound.
    #[serde(default = "default_upper")]
    pub upper: [u8; 3],
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            lower: default_lower(),
            upper: default_upper(),
        }
    }
}

/// Convert a pixel to 8 bit hsv.
// All three channels are bounded to [0, 255] by construction.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(f64::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max == 0.0 { 0.0 } else { 255.0 * delta / max };
    let mut hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    [
        (hue / 2.0).round() as u8,
        saturation.round() as u8,
        max as u8,
    ]
}

/// Share of the photo that falls inside the configured hue band.
pub struct HueCoverage {
    config: CoverageConfig,
}

impl HueCoverage {
    /// Create the analyser by consuming a config.
    ///
    /// * `config`: `CoverageConfig`
    pub fn new(config: CoverageConfig) -> Self {
        Self { config }
    }

    fn in_band(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| (self.config.lower[i]..=self.config.upper[i]).contains(&hsv[i]))
    }
}

impl Analyzer for HueCoverage {
    fn analyze(&self, path: &Path) -> Result<f64, AgentError> {
        // Decoded from the content, the camera may not honour the extension.
        let image = image::io::Reader::open(path)
            .and_then(image::io::Reader::with_guessed_format)
            .map_err(|e| AgentError::collaborator(CaptureStep::Analyze, e))?
            .decode()
            .map_err(|e| AgentError::collaborator(CaptureStep::Analyze, e))?
            .to_rgb8();
        let total = u64::from(image.width()) * u64::from(image.height());
        if total == 0 {
            return Err(AgentError::collaborator(
                CaptureStep::Analyze,
                "image has no pixels",
            ));
        }
        let covered = image
            .pixels()
            .filter(|pixel| self.in_band(to_hsv(pixel)))
            .count();

        Ok(covered as f64 / total as f64 * 100.0)
    }
}
