//! Reproducibility metadata.
//!
//! `VisualizationMetadata` is the flat record returned inside every bundle; it
//! echoes each parameter used so a rendering can be rebuilt from the record
//! plus the raw saliency map. Persisting it is up to the caller.

use crate::config::{Smoothing, VisualizationConfig};
use crate::error::{CamError, Result};
use crate::postprocess::ProcessedSaliencyMap;
use crate::retina_detection::RetinaRegion;
use crate::saliency::{LayerSelection, RawSaliencyMap};
use serde::{Deserialize, Serialize};

/// Flat key-value record of every processing choice behind one bundle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VisualizationMetadata {
    pub generator_version: String,
    pub output_size: u32,
    pub raw_height: usize,
    pub raw_width: usize,
    pub interpolation: String,

    pub percentile_low: f64,
    pub percentile_high: f64,
    pub percentile_low_value: f64,
    pub percentile_high_value: f64,
    pub percentile_range_degenerate: bool,

    pub smoothing_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing_kernel: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing_sigma: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing_diameter: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing_sigma_color: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing_sigma_space: Option<f32>,

    pub feather_px: f32,
    pub mask_blur_kernel: usize,
    pub region_center_x: u32,
    pub region_center_y: u32,
    pub region_radius: u32,
    pub region_confidence: f32,
    pub region_fallback: bool,

    pub denoise_threshold: f32,
    pub opening_kernel: usize,

    pub palette: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f32>,
    pub base_opacity: f32,
    pub alpha_max: f32,
    pub overlay_alpha: f32,

    pub saliency_degenerate: bool,
    pub output_empty: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_resolution: Option<usize>,
    pub layer_below_floor: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_class: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_probability: Option<f32>,

    pub image_format: String,
    pub legend_format: String,
}

impl VisualizationMetadata {
    pub fn new(
        config: &VisualizationConfig,
        raw: &RawSaliencyMap,
        processed: &ProcessedSaliencyMap,
    ) -> Self {
        let (raw_height, raw_width) = raw.dim();
        let norm = &processed.normalization;
        let region: &RetinaRegion = &processed.region;

        let (kernel, sigma, diameter, sigma_color, sigma_space) = match config.smoothing {
            Smoothing::Gaussian { kernel } => (Some(kernel), Some(kernel as f32 / 6.0), None, None, None),
            Smoothing::Bilateral {
                diameter,
                sigma_color,
                sigma_space,
            } => (None, None, Some(diameter), Some(sigma_color), Some(sigma_space)),
        };

        Self {
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            output_size: processed.size(),
            raw_height,
            raw_width,
            interpolation: config.interpolation.name().to_string(),
            percentile_low: norm.p_low,
            percentile_high: norm.p_high,
            percentile_low_value: norm.low_value,
            percentile_high_value: norm.high_value,
            percentile_range_degenerate: norm.degenerate_range,
            smoothing_method: config.smoothing.name().to_string(),
            smoothing_kernel: kernel,
            smoothing_sigma: sigma,
            smoothing_diameter: diameter,
            smoothing_sigma_color: sigma_color,
            smoothing_sigma_space: sigma_space,
            feather_px: processed.feather_px,
            mask_blur_kernel: config.mask_blur_kernel,
            region_center_x: region.center.0,
            region_center_y: region.center.1,
            region_radius: region.radius,
            region_confidence: region.confidence,
            region_fallback: region.fallback,
            denoise_threshold: processed.threshold,
            opening_kernel: config.opening_kernel,
            palette: config.palette.name().to_string(),
            gamma: config.gamma,
            base_opacity: config.base_opacity,
            alpha_max: config.alpha_max,
            overlay_alpha: config.overlay_alpha,
            saliency_degenerate: raw.degenerate,
            output_empty: processed.empty,
            layer_name: None,
            layer_resolution: None,
            layer_below_floor: false,
            target_class: None,
            target_class_name: None,
            target_probability: None,
            image_format: "png".to_string(),
            legend_format: "svg".to_string(),
        }
    }

    pub fn with_layer(mut self, layer: &LayerSelection) -> Self {
        self.layer_name = Some(layer.name.clone());
        self.layer_resolution = Some(layer.resolution);
        self.layer_below_floor = layer.below_floor;
        self
    }

    pub fn with_target(mut self, class: usize, name: Option<&str>, probability: Option<f32>) -> Self {
        self.target_class = Some(class);
        self.target_class_name = name.map(str::to_string);
        self.target_probability = probability;
        self
    }

    /// The record as a flat JSON object, for audit logging.
    pub fn to_flat_map(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(CamError::Serialization(format!(
                "metadata serialized to non-object {other}"
            ))),
            Err(e) => Err(CamError::Serialization(e.to_string())),
        }
    }
}
