//! Processing parameters of the visualization pipeline.
//!
//! `VisualizationConfig` is the single parameterized pipeline: every choice
//! that used to be a separate code path (palette, percentile range, smoothing,
//! feather width, denoise threshold) is a field here. It deserializes from
//! partial TOML or JSON, filling the rest from `Default`.

use crate::colormap::Palette;
use crate::error::{CamError, Result};
use serde::{Deserialize, Serialize};

/// Upscaling filter for the raw saliency map. Nearest and bilinear are not
/// offered: both produce blocky artifacts that read as false lesions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Bicubic,
    Lanczos,
}

impl Interpolation {
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Bicubic => "bicubic",
            Interpolation::Lanczos => "lanczos",
        }
    }

    pub fn filter(&self) -> image::imageops::FilterType {
        match self {
            Interpolation::Bicubic => image::imageops::FilterType::CatmullRom,
            Interpolation::Lanczos => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl std::str::FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bicubic" | "cubic" => Ok(Interpolation::Bicubic),
            "lanczos" | "lanczos3" => Ok(Interpolation::Lanczos),
            _ => Err(format!("Unknown interpolation: {s} (expected bicubic or lanczos)")),
        }
    }
}

/// Smoothing applied after percentile normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Smoothing {
    /// Gaussian blur with sigma = kernel / 6.
    Gaussian { kernel: usize },
    /// Bilateral filter; sigmas are in 8-bit intensity units and pixels.
    Bilateral {
        diameter: usize,
        sigma_color: f32,
        sigma_space: f32,
    },
}

impl Smoothing {
    pub fn gaussian() -> Self {
        Smoothing::Gaussian { kernel: 7 }
    }

    pub fn bilateral() -> Self {
        Smoothing::Bilateral {
            diameter: 9,
            sigma_color: 80.0,
            sigma_space: 80.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Smoothing::Gaussian { .. } => "gaussian",
            Smoothing::Bilateral { .. } => "bilateral",
        }
    }
}

impl std::str::FromStr for Smoothing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gaussian" => Ok(Smoothing::gaussian()),
            "bilateral" => Ok(Smoothing::bilateral()),
            _ => Err(format!("Unknown smoothing: {s} (expected gaussian or bilateral)")),
        }
    }
}

/// Every tunable of the visualization pipeline. Echoed verbatim into the
/// metadata record of each bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    /// Side length of every exported raster.
    pub target_size: u32,
    pub interpolation: Interpolation,
    /// (low, high) percentiles, in percent, over non-background values.
    pub percentile_range: (f64, f64),
    pub smoothing: Smoothing,
    /// Half-width of the soft mask boundary, in output pixels.
    pub feather_px: f32,
    /// Gaussian kernel applied to the mask itself; 0 disables.
    pub mask_blur_kernel: usize,
    /// Values below this fraction of full scale are zeroed.
    pub denoise_threshold: f32,
    /// Elliptical opening element size; 0 disables.
    pub opening_kernel: usize,
    pub palette: Palette,
    /// Optional `x^gamma` applied to the color lookup only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f32>,
    pub base_opacity: f32,
    pub alpha_max: f32,
    /// Blend strength of the flattened overlay.
    pub overlay_alpha: f32,
    /// Explicit target layer; auto-selected when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            interpolation: Interpolation::Lanczos,
            percentile_range: (0.5, 99.5),
            smoothing: Smoothing::bilateral(),
            feather_px: 20.0,
            mask_blur_kernel: 5,
            denoise_threshold: 0.02,
            opening_kernel: 2,
            palette: Palette::Inferno,
            gamma: None,
            base_opacity: 0.8,
            alpha_max: 0.85,
            overlay_alpha: 0.35,
            layer_name: None,
        }
    }
}

impl VisualizationConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(CamError::InvalidConfig(msg));
        if self.target_size < 16 {
            return fail(format!("target_size must be at least 16, got {}", self.target_size));
        }
        let (lo, hi) = self.percentile_range;
        if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo > hi {
            return fail(format!("percentile_range must satisfy 0 <= low <= high <= 100, got ({lo}, {hi})"));
        }
        match self.smoothing {
            Smoothing::Gaussian { kernel } if kernel == 0 => {
                return fail("gaussian kernel must be positive".to_string());
            }
            Smoothing::Bilateral {
                diameter,
                sigma_color,
                sigma_space,
            } if diameter == 0 || sigma_color <= 0.0 || sigma_space <= 0.0 => {
                return fail("bilateral diameter and sigmas must be positive".to_string());
            }
            _ => {}
        }
        if self.feather_px.is_nan() || self.feather_px < 0.0 {
            return fail(format!("feather_px must be non-negative, got {}", self.feather_px));
        }
        if !(0.0..1.0).contains(&self.denoise_threshold) {
            return fail(format!("denoise_threshold must be in [0, 1), got {}", self.denoise_threshold));
        }
        if self.opening_kernel > 7 {
            return fail(format!("opening_kernel must be at most 7, got {}", self.opening_kernel));
        }
        if let Some(gamma) = self.gamma {
            if !(gamma > 0.0 && gamma.is_finite()) {
                return fail(format!("gamma must be positive, got {gamma}"));
            }
        }
        for (name, v) in [
            ("base_opacity", self.base_opacity),
            ("alpha_max", self.alpha_max),
            ("overlay_alpha", self.overlay_alpha),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return fail(format!("{name} must be in [0, 1], got {v}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_visualization_config_is_valid() {
        let config = VisualizationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_size, 512);
        assert_eq!(config.percentile_range, (0.5, 99.5));
        assert_eq!(config.smoothing.name(), "bilateral");
        assert_eq!(config.palette, Palette::Inferno);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = VisualizationConfig {
            percentile_range: (99.0, 1.0),
            ..VisualizationConfig::default()
        };
        assert!(matches!(config.validate(), Err(CamError::InvalidConfig(_))));

        config.percentile_range = (1.0, 99.0);
        config.alpha_max = 1.5;
        assert!(config.validate().is_err());

        config.alpha_max = 0.85;
        config.gamma = Some(0.0);
        assert!(config.validate().is_err());

        config.gamma = Some(0.7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_smoothing_serde_tagged() {
        let json = serde_json::to_string(&Smoothing::gaussian()).unwrap();
        assert_eq!(json, r#"{"method":"gaussian","kernel":7}"#);
        let back: Smoothing = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Smoothing::gaussian());
    }
}
