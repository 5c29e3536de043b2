//! Grad-CAM++ saliency and clinical visualization for diabetic-retinopathy
//! fundus images.
//!
//! Data flows one way: activations and gradients become a [`RawSaliencyMap`],
//! the map is upscaled, normalized and masked to the detected retina
//! ([`ProcessedSaliencyMap`]), colorized with a clinical palette
//! ([`ColorizedMap`]) and exported as a [`VisualizationBundle`].

pub mod colormap;
pub mod config;
pub mod error;
pub mod export;
pub mod filters;
pub mod legend;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod retina_detection;
pub mod saliency;

pub use colormap::{apply_colormap, ClinicalColorizer, ColorizedMap, Palette};
pub use config::{Interpolation, Smoothing, VisualizationConfig};
pub use error::{CamError, Result, Stage};
pub use export::{VisualizationBundle, VisualizationExporter};
pub use metadata::VisualizationMetadata;
pub use model::{Classifier, ModelRegistry};
pub use pipeline::{Diagnosis, RenderContext, VisualizationPipeline, VisualizationRenderer};
pub use postprocess::{ProcessedSaliencyMap, SaliencyPostProcessor};
pub use retina_detection::{RetinaDetectorConfig, RetinaRegion, RetinaRegionDetector};
pub use saliency::{ActivationGradientPair, LayerInfo, RawSaliencyMap, SaliencyExtractor};
