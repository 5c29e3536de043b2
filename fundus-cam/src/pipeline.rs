//! End-to-end entry points.
//!
//! `VisualizationRenderer` turns a raw saliency map plus the source image
//! into a bundle and needs no model. `VisualizationPipeline` adds the model
//! side: preprocessing, class selection, layer selection and Grad-CAM++.

use crate::colormap::{ClinicalColorizer, Palette};
use crate::config::VisualizationConfig;
use crate::error::{CamError, Result};
use crate::export::{VisualizationBundle, VisualizationExporter};
use crate::metadata::VisualizationMetadata;
use crate::model::{preprocess_image, ModelRegistry};
use crate::postprocess::SaliencyPostProcessor;
use crate::retina_detection::{RetinaDetectorConfig, RetinaRegionDetector};
use crate::saliency::{select_layer, LayerSelection, RawSaliencyMap, SaliencyExtractor};
use image::{imageops, RgbImage};
use log::{debug, info, warn};
use ndarray::Array4;
use serde::Serialize;
use std::time::Instant;

/// Model-side facts recorded alongside a rendering.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub layer: Option<LayerSelection>,
    pub target_class: Option<usize>,
    pub target_class_name: Option<String>,
    pub target_probability: Option<f32>,
}

/// Region detection, post-processing, colorization and export.
#[derive(Debug, Clone)]
pub struct VisualizationRenderer {
    pub config: VisualizationConfig,
    pub detector: RetinaRegionDetector,
}

impl VisualizationRenderer {
    pub fn new(config: VisualizationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            detector: RetinaRegionDetector::default(),
        })
    }

    pub fn with_detector_config(mut self, config: RetinaDetectorConfig) -> Self {
        self.detector = RetinaRegionDetector::new(config);
        self
    }

    pub fn render(
        &self,
        image: &RgbImage,
        raw: &RawSaliencyMap,
        palette: Palette,
        context: &RenderContext,
    ) -> Result<VisualizationBundle> {
        let start = Instant::now();
        let size = self.config.target_size;
        let original = if image.dimensions() == (size, size) {
            image.clone()
        } else {
            imageops::resize(image, size, size, imageops::FilterType::Lanczos3)
        };

        let region = self.detector.detect(&original);
        let processed = SaliencyPostProcessor::from_config(&self.config).process(raw, &region, size)?;

        let colorizer = ClinicalColorizer {
            base_opacity: self.config.base_opacity,
            alpha_max: self.config.alpha_max,
            gamma: self.config.gamma,
        };
        let colorized = colorizer.colorize(&processed, palette)?;

        let effective = VisualizationConfig {
            palette,
            ..self.config.clone()
        };
        let mut metadata = VisualizationMetadata::new(&effective, raw, &processed);
        if let Some(layer) = &context.layer {
            metadata = metadata.with_layer(layer);
        }
        if let Some(class) = context.target_class {
            metadata = metadata.with_target(
                class,
                context.target_class_name.as_deref(),
                context.target_probability,
            );
        }

        let exporter = VisualizationExporter {
            overlay_alpha: self.config.overlay_alpha,
        };
        let bundle = exporter.export(&colorized, &original, metadata)?;
        debug!(
            "Rendered {palette} visualization at {size}x{size} in {:.1}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(bundle)
    }
}

/// Classification plus visualization. A failed visualization never hides the
/// classification result.
#[derive(Debug, Serialize)]
pub struct Diagnosis {
    pub probabilities: Vec<f32>,
    pub predicted_class: usize,
    pub class_name: String,
    pub confidence: f32,
    #[serde(skip)]
    pub visualization: std::result::Result<VisualizationBundle, CamError>,
}

/// Index of the largest probability; ties go to the lower index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |b| v > values[b]) {
            best = Some(i);
        }
    }
    best
}

pub struct VisualizationPipeline {
    pub registry: ModelRegistry,
    pub renderer: VisualizationRenderer,
    pub extractor: SaliencyExtractor,
}

impl VisualizationPipeline {
    pub fn new(registry: ModelRegistry, config: VisualizationConfig) -> Result<Self> {
        Ok(Self {
            registry,
            renderer: VisualizationRenderer::new(config)?,
            extractor: SaliencyExtractor::default(),
        })
    }

    pub fn config(&self) -> &VisualizationConfig {
        &self.renderer.config
    }

    fn probabilities(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let probabilities = self.registry.classifier().predict(input)?;
        if probabilities.len() != self.registry.num_classes() {
            return Err(CamError::shape_mismatch(
                "class probabilities",
                &[self.registry.num_classes()],
                &[probabilities.len()],
            ));
        }
        Ok(probabilities)
    }

    fn layer(&self) -> Result<LayerSelection> {
        let layers = self.registry.classifier().conv_layers();
        if let Some(name) = &self.config().layer_name {
            return layers
                .iter()
                .enumerate()
                .find(|(_, l)| &l.name == name)
                .map(|(index, l)| LayerSelection {
                    index,
                    name: l.name.clone(),
                    resolution: l.resolution(),
                    below_floor: l.resolution() < crate::saliency::LAYER_RESOLUTION_FLOOR,
                })
                .ok_or_else(|| CamError::ModelUnavailable(format!("layer '{name}' not found")));
        }
        select_layer(&layers)
            .ok_or_else(|| CamError::ModelUnavailable("model exposes no convolutional layers".to_string()))
    }

    fn visualize_tensor(
        &self,
        image: &RgbImage,
        input: &Array4<f32>,
        target_class: usize,
        target_probability: Option<f32>,
        palette: Palette,
    ) -> Result<VisualizationBundle> {
        let layer = self.layer()?;
        let raw = {
            let pair = self
                .registry
                .classifier()
                .activations_and_gradients(input, target_class, &layer.name)?;
            self.extractor.compute_pair(&pair)?
        };

        let context = RenderContext {
            target_class: Some(target_class),
            target_class_name: self.registry.class_name(target_class).map(str::to_string),
            target_probability,
            layer: Some(layer),
        };
        self.renderer.render(image, &raw, palette, &context)
    }

    /// Saliency visualization for `target_class`, or for the predicted class
    /// when `None`. An unknown `palette` name fails before any model call.
    pub fn generate_visualization(
        &self,
        image: &RgbImage,
        target_class: Option<usize>,
        palette: &str,
    ) -> Result<VisualizationBundle> {
        let palette: Palette = palette.parse()?;
        let input = preprocess_image(image, self.registry.classifier().input_size());

        let (class, probability) = match target_class {
            Some(class) if class >= self.registry.num_classes() => {
                return Err(CamError::InvalidTargetClass {
                    class,
                    num_classes: self.registry.num_classes(),
                });
            }
            Some(class) => (class, None),
            None => {
                let probabilities = self.probabilities(&input)?;
                let class = argmax(&probabilities).unwrap_or(0);
                (class, Some(probabilities[class]))
            }
        };

        self.visualize_tensor(image, &input, class, probability, palette)
    }

    /// Classify and visualize the predicted class with the configured
    /// palette. Only a classification failure is an error here.
    pub fn diagnose(&self, image: &RgbImage) -> Result<Diagnosis> {
        let start = Instant::now();
        let input = preprocess_image(image, self.registry.classifier().input_size());
        let probabilities = self.probabilities(&input)?;
        let predicted_class = argmax(&probabilities).unwrap_or(0);
        let confidence = probabilities[predicted_class];
        let class_name = self
            .registry
            .class_name(predicted_class)
            .unwrap_or("unknown")
            .to_string();

        let visualization = self.visualize_tensor(
            image,
            &input,
            predicted_class,
            Some(confidence),
            self.config().palette,
        );
        if let Err(e) = &visualization {
            warn!("Visualization unavailable for this image: {e}");
        }

        info!(
            "Diagnosis: {class_name} ({:.1}%) in {:.1}ms",
            confidence * 100.0,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Diagnosis {
            probabilities,
            predicted_class,
            class_name,
            confidence,
            visualization,
        })
    }
}
