//! Grad-CAM++ saliency extraction and target layer selection.

use crate::error::{CamError, Result, Stage};
use log::{debug, warn};
use ndarray::{Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Floor applied to every Grad-CAM++ denominator.
pub const WEIGHT_EPSILON: f32 = 1e-7;

/// Minimum spatial side length preferred for the target layer.
pub const LAYER_RESOLUTION_FLOOR: usize = 12;

/// Activations of one convolutional layer and the gradients of one class score
/// with respect to them, laid out `[H, W, C]`.
///
/// Second- and third-order gradients are optional; when missing they are
/// derived from the first-order gradient assuming an exponential class score.
#[derive(Debug, Clone)]
pub struct ActivationGradientPair {
    activation: Array3<f32>,
    gradient: Array3<f32>,
    second_order: Option<Array3<f32>>,
    third_order: Option<Array3<f32>>,
}

impl ActivationGradientPair {
    pub fn new(activation: Array3<f32>, gradient: Array3<f32>) -> Result<Self> {
        if activation.shape() != gradient.shape() {
            return Err(CamError::shape_mismatch(
                "gradient",
                activation.shape(),
                gradient.shape(),
            ));
        }
        Ok(Self {
            activation,
            gradient,
            second_order: None,
            third_order: None,
        })
    }

    /// Attach explicit higher-order gradients.
    pub fn with_higher_order(mut self, second: Array3<f32>, third: Array3<f32>) -> Result<Self> {
        if second.shape() != self.activation.shape() {
            return Err(CamError::shape_mismatch(
                "second-order gradient",
                self.activation.shape(),
                second.shape(),
            ));
        }
        if third.shape() != self.activation.shape() {
            return Err(CamError::shape_mismatch(
                "third-order gradient",
                self.activation.shape(),
                third.shape(),
            ));
        }
        self.second_order = Some(second);
        self.third_order = Some(third);
        Ok(self)
    }

    /// `(height, width, channels)`
    pub fn dim(&self) -> (usize, usize, usize) {
        self.activation.dim()
    }

    pub fn activation(&self) -> ArrayView3<'_, f32> {
        self.activation.view()
    }

    pub fn gradient(&self) -> ArrayView3<'_, f32> {
        self.gradient.view()
    }

    pub fn has_higher_order(&self) -> bool {
        self.second_order.is_some() && self.third_order.is_some()
    }
}

/// Rectified saliency at the layer's native resolution, scaled so the
/// maximum is 1 (or all zeros when nothing activated).
#[derive(Debug, Clone)]
pub struct RawSaliencyMap {
    pub values: Array2<f32>,
    /// True when the map is all zeros. Not an error; the caller renders an
    /// empty overlay.
    pub degenerate: bool,
}

impl RawSaliencyMap {
    /// Wrap a precomputed map, rectifying negatives and rescaling by the max.
    pub fn from_values(values: Array2<f32>) -> Result<Self> {
        check_finite(&values, Stage::Extraction)?;
        Ok(normalize_by_max(values.mapv(|v| v.max(0.0))))
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }
}

fn check_finite(values: &Array2<f32>, stage: Stage) -> Result<()> {
    if let Some(((row, col), &value)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(CamError::NonFiniteOutput {
            stage,
            row,
            col,
            value,
        });
    }
    Ok(())
}

fn normalize_by_max(mut values: Array2<f32>) -> RawSaliencyMap {
    let max = values.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        values.mapv_inplace(|v| v / max);
        RawSaliencyMap {
            values,
            degenerate: false,
        }
    } else {
        values.fill(0.0);
        RawSaliencyMap {
            values,
            degenerate: true,
        }
    }
}

/// Computes Grad-CAM++ maps from activation/gradient pairs.
#[derive(Debug, Clone, Copy)]
pub struct SaliencyExtractor {
    pub epsilon: f32,
}

impl Default for SaliencyExtractor {
    fn default() -> Self {
        Self {
            epsilon: WEIGHT_EPSILON,
        }
    }
}

impl SaliencyExtractor {
    /// Raw map from bare activation and gradient tensors.
    pub fn compute(
        &self,
        activation: ArrayView3<'_, f32>,
        gradient: ArrayView3<'_, f32>,
    ) -> Result<RawSaliencyMap> {
        if activation.shape() != gradient.shape() {
            return Err(CamError::shape_mismatch(
                "gradient",
                activation.shape(),
                gradient.shape(),
            ));
        }
        let g2 = gradient.mapv(|g| g * g);
        let g3 = gradient.mapv(|g| g * g * g);
        self.weighted_map(activation, gradient, g2.view(), g3.view())
    }

    pub fn compute_pair(&self, pair: &ActivationGradientPair) -> Result<RawSaliencyMap> {
        match (&pair.second_order, &pair.third_order) {
            (Some(second), Some(third)) => self.weighted_map(
                pair.activation.view(),
                pair.gradient.view(),
                second.view(),
                third.view(),
            ),
            _ => self.compute(pair.activation.view(), pair.gradient.view()),
        }
    }

    fn weighted_map(
        &self,
        activation: ArrayView3<'_, f32>,
        gradient: ArrayView3<'_, f32>,
        second: ArrayView3<'_, f32>,
        third: ArrayView3<'_, f32>,
    ) -> Result<RawSaliencyMap> {
        let (height, width, channels) = activation.dim();
        let mut cam = Array2::<f32>::zeros((height, width));

        for c in 0..channels {
            let a = activation.index_axis(Axis(2), c);
            let g = gradient.index_axis(Axis(2), c);
            let g2 = second.index_axis(Axis(2), c);
            let g3 = third.index_axis(Axis(2), c);

            let activation_sum: f64 = a.iter().map(|&v| v as f64).sum();
            let third_term: f64 = activation_sum * g3.iter().map(|&v| v as f64).sum::<f64>();

            // alpha_ij = g2_ij / (2 g2_ij + S_c * sum(g3)), denominator floored at epsilon
            let mut alpha = Array2::<f64>::zeros((height, width));
            for ((i, j), out) in alpha.indexed_iter_mut() {
                let num = g2[[i, j]] as f64;
                let denom = 2.0 * num + third_term;
                *out = num / denom.max(self.epsilon as f64);
            }
            let alpha_sum = alpha.sum() + self.epsilon as f64;

            let weight: f64 = alpha
                .iter()
                .zip(g.iter())
                .map(|(&al, &gr)| (al / alpha_sum) * (gr.max(0.0) as f64))
                .sum();

            if weight != 0.0 {
                cam.scaled_add(weight as f32, &a);
            }
        }

        check_finite(&cam, Stage::Extraction)?;
        cam.mapv_inplace(|v| v.max(0.0));
        let map = normalize_by_max(cam);
        if map.degenerate {
            warn!("Saliency map is all zero ({height}x{width}x{channels}); no salient region");
        } else {
            debug!("Grad-CAM++ map computed at {height}x{width} from {channels} channels");
        }
        Ok(map)
    }
}

/// Shape of one convolutional layer, in network depth order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, height: usize, width: usize, channels: usize) -> Self {
        Self {
            name: name.into(),
            height,
            width,
            channels,
        }
    }

    pub fn resolution(&self) -> usize {
        self.height.min(self.width)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSelection {
    pub index: usize,
    pub name: String,
    pub resolution: usize,
    /// No layer met the resolution floor; the highest-resolution one was used.
    pub below_floor: bool,
}

/// Pick the target layer: among layers at or above the resolution floor,
/// maximize `0.7 * resolution + 0.3 * depth_rank` where depth_rank is the
/// 1-based position in `layers` (deeper is larger). Ties go to the
/// shallower layer. Returns `None` for an empty list.
pub fn select_layer(layers: &[LayerInfo]) -> Option<LayerSelection> {
    let mut best: Option<(usize, f64)> = None;
    for (i, layer) in layers.iter().enumerate() {
        if layer.resolution() < LAYER_RESOLUTION_FLOOR {
            continue;
        }
        let score = 0.7 * layer.resolution() as f64 + 0.3 * (i + 1) as f64;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }

    if let Some((index, _)) = best {
        let layer = &layers[index];
        return Some(LayerSelection {
            index,
            name: layer.name.clone(),
            resolution: layer.resolution(),
            below_floor: false,
        });
    }

    let mut fallback: Option<usize> = None;
    for (i, layer) in layers.iter().enumerate() {
        if fallback.map_or(true, |f| layer.resolution() > layers[f].resolution()) {
            fallback = Some(i);
        }
    }
    fallback.map(|index| {
        let layer = &layers[index];
        warn!(
            "No layer reaches {LAYER_RESOLUTION_FLOOR}x{LAYER_RESOLUTION_FLOOR}; using '{}' at {}",
            layer.name,
            layer.resolution()
        );
        LayerSelection {
            index,
            name: layer.name.clone(),
            resolution: layer.resolution(),
            below_floor: true,
        }
    })
}
