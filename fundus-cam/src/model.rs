//! Classifier collaborator interface and the registry that owns it.
//!
//! Model loading and warm-up happen outside this crate, once, before any
//! image is submitted. A classifier that cannot produce activations reports
//! `CamError::ModelUnavailable`; the pipeline never retries.

use crate::error::{CamError, Result};
use crate::saliency::{ActivationGradientPair, LayerInfo};
use image::{imageops, RgbImage};
use ndarray::Array4;
use std::sync::Arc;

/// Severity grades of the standard five-class screening model.
pub const DEFAULT_CLASS_NAMES: [&str; 5] = ["No DR", "Mild", "Moderate", "Severe", "PDR"];

/// Opaque trained classifier. Inputs are `[1, S, S, 3]` tensors in [0, 1]
/// as produced by [`preprocess_image`].
pub trait Classifier: Send + Sync {
    /// Side length `S` of the model input.
    fn input_size(&self) -> u32;

    /// Convolutional layers in network depth order.
    fn conv_layers(&self) -> Vec<LayerInfo>;

    /// Per-class probabilities.
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>>;

    /// Activations of `layer` and the gradient of the `target_class` score
    /// with respect to them.
    fn activations_and_gradients(
        &self,
        input: &Array4<f32>,
        target_class: usize,
        layer: &str,
    ) -> Result<ActivationGradientPair>;
}

/// Explicitly constructed model state, passed into the pipeline instead of
/// living in globals.
#[derive(Clone)]
pub struct ModelRegistry {
    classifier: Arc<dyn Classifier>,
    class_names: Vec<String>,
    version: String,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("class_names", &self.class_names)
            .field("version", &self.version)
            .field("input_size", &self.classifier.input_size())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            version: "unversioned".to_string(),
        }
    }

    pub fn with_class_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(CamError::InvalidConfig("class names must not be empty".to_string()));
        }
        self.class_names = names;
        Ok(self)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn class_name(&self, class: usize) -> Option<&str> {
        self.class_names.get(class).map(String::as_str)
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Resize to the model input with Lanczos3 and scale to [0, 1], NHWC.
pub fn preprocess_image(img: &RgbImage, size: u32) -> Array4<f32> {
    let resized = imageops::resize(img, size, size, imageops::FilterType::Lanczos3);
    let mut array = Array4::<f32>::zeros((1, size as usize, size as usize, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            array[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }
    log::debug!("Preprocessed image to tensor with shape: {:?}", array.shape());
    array
}
