//! Saliency post-processing: upscale, percentile normalization, smoothing,
//! feathered anatomical masking, then threshold and opening.
//!
//! The stage order is fixed. Every stage takes its input by reference and
//! returns a new buffer.

use crate::config::{Interpolation, Smoothing, VisualizationConfig};
use crate::error::{CamError, Result, Stage};
use crate::filters;
use crate::retina_detection::RetinaRegion;
use crate::saliency::RawSaliencyMap;
use image::{imageops, ImageBuffer, Luma};
use log::{debug, warn};
use ndarray::Array2;
use serde::Serialize;
use std::time::Instant;

/// Values at or below this count as background for percentile estimation.
pub const NEAR_ZERO: f32 = 1e-6;

/// Added to the high percentile when the range collapses.
pub const RANGE_EPSILON: f64 = 1e-8;

/// Percentile range actually applied during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizationStats {
    pub p_low: f64,
    pub p_high: f64,
    pub low_value: f64,
    pub high_value: f64,
    /// `high_value` was raised by `RANGE_EPSILON` because the range collapsed.
    pub degenerate_range: bool,
    /// Number of non-background samples the percentiles were taken over.
    pub support: usize,
}

/// Normalized, masked saliency at output resolution. Every value is in
/// [0, 1] and exactly 0 beyond `region.radius + feather_px`.
#[derive(Debug, Clone)]
pub struct ProcessedSaliencyMap {
    pub values: Array2<f32>,
    pub region: RetinaRegion,
    pub normalization: NormalizationStats,
    pub feather_px: f32,
    pub threshold: f32,
    /// Nothing survived processing; the rendered overlay is fully transparent.
    pub empty: bool,
}

impl ProcessedSaliencyMap {
    pub fn size(&self) -> u32 {
        self.values.nrows() as u32
    }

    pub fn max(&self) -> f32 {
        self.values.iter().cloned().fold(0.0, f32::max)
    }
}

/// Runs the fixed post-processing pipeline with parameters taken from a
/// `VisualizationConfig`.
#[derive(Debug, Clone)]
pub struct SaliencyPostProcessor {
    pub interpolation: Interpolation,
    pub percentile_range: (f64, f64),
    pub smoothing: Smoothing,
    pub feather_px: f32,
    pub mask_blur_kernel: usize,
    pub denoise_threshold: f32,
    pub opening_kernel: usize,
}

impl Default for SaliencyPostProcessor {
    fn default() -> Self {
        Self::from_config(&VisualizationConfig::default())
    }
}

impl SaliencyPostProcessor {
    pub fn from_config(config: &VisualizationConfig) -> Self {
        Self {
            interpolation: config.interpolation,
            percentile_range: config.percentile_range,
            smoothing: config.smoothing,
            feather_px: config.feather_px,
            mask_blur_kernel: config.mask_blur_kernel,
            denoise_threshold: config.denoise_threshold,
            opening_kernel: config.opening_kernel,
        }
    }

    /// Process `raw` into a `target_size` square map masked to `region`.
    /// `region` must be expressed in output pixel coordinates.
    pub fn process(
        &self,
        raw: &RawSaliencyMap,
        region: &RetinaRegion,
        target_size: u32,
    ) -> Result<ProcessedSaliencyMap> {
        let start = Instant::now();

        let upscaled = upscale(&raw.values, target_size, self.interpolation);
        let (normalized, normalization) = percentile_normalize(&upscaled, self.percentile_range);
        let smoothed = smooth(&normalized, &self.smoothing);
        let mask = feathered_mask(
            target_size as usize,
            region,
            self.feather_px,
            self.mask_blur_kernel,
        );
        let masked = &smoothed * &mask;
        let values = denoise(&masked, self.denoise_threshold, self.opening_kernel);

        if let Some(((row, col), &value)) = values
            .indexed_iter()
            .find(|(_, v)| !(v.is_finite() && (0.0..=1.0).contains(*v)))
        {
            return Err(CamError::NonFiniteOutput {
                stage: Stage::PostProcessing,
                row,
                col,
                value,
            });
        }

        let empty = values.iter().all(|&v| v == 0.0);
        if empty && !raw.degenerate {
            warn!("No saliency survived post-processing; overlay will be transparent");
        }
        debug!(
            "Post-processed {:?} -> {}x{} (p{}={:.4}, p{}={:.4}, {}) in {:.1}ms",
            raw.dim(),
            target_size,
            target_size,
            normalization.p_low,
            normalization.low_value,
            normalization.p_high,
            normalization.high_value,
            self.smoothing.name(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(ProcessedSaliencyMap {
            values,
            region: *region,
            normalization,
            feather_px: self.feather_px,
            threshold: self.denoise_threshold,
            empty,
        })
    }
}

/// Resize to `size`×`size`. The map is first scaled into [0, 1] by its max
/// so the float resampler's clamping never clips real signal.
pub fn upscale(values: &Array2<f32>, size: u32, interpolation: Interpolation) -> Array2<f32> {
    let (rows, cols) = values.dim();
    let max = values.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 || rows == 0 || cols == 0 {
        return Array2::zeros((size as usize, size as usize));
    }

    let src: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([(values[[y as usize, x as usize]] / max).max(0.0)])
        });
    let resized = imageops::resize(&src, size, size, interpolation.filter());

    Array2::from_shape_fn((size as usize, size as usize), |(r, c)| {
        let v = resized.get_pixel(c as u32, r as u32)[0];
        if v.is_finite() {
            v.clamp(0.0, 1.0)
        } else {
            0.0
        }
    })
}

/// Clip to the (p_low, p_high) percentiles of the non-background values and
/// rescale to [0, 1]. Computed in f64.
pub fn percentile_normalize(
    values: &Array2<f32>,
    (p_low, p_high): (f64, f64),
) -> (Array2<f32>, NormalizationStats) {
    let mut samples: Vec<f64> = values
        .iter()
        .filter(|&&v| v > NEAR_ZERO)
        .map(|&v| v as f64)
        .collect();

    if samples.is_empty() {
        let stats = NormalizationStats {
            p_low,
            p_high,
            low_value: 0.0,
            high_value: RANGE_EPSILON,
            degenerate_range: true,
            support: 0,
        };
        return (Array2::zeros(values.raw_dim()), stats);
    }

    samples.sort_by(|a, b| a.total_cmp(b));
    let low = filters::percentile_sorted(&samples, p_low);
    let mut high = filters::percentile_sorted(&samples, p_high);
    let degenerate_range = high <= low;
    if degenerate_range {
        high = low + RANGE_EPSILON;
    }

    let span = high - low;
    let normalized = values.mapv(|v| {
        let clipped = (v as f64).clamp(low, high);
        (((clipped - low) / span) as f32).clamp(0.0, 1.0)
    });

    let stats = NormalizationStats {
        p_low,
        p_high,
        low_value: low,
        high_value: high,
        degenerate_range,
        support: samples.len(),
    };
    (normalized, stats)
}

pub fn smooth(values: &Array2<f32>, smoothing: &Smoothing) -> Array2<f32> {
    let out = match *smoothing {
        Smoothing::Gaussian { kernel } => {
            filters::gaussian_blur(values, kernel as f32 / 6.0)
        }
        Smoothing::Bilateral {
            diameter,
            sigma_color,
            sigma_space,
        } => filters::bilateral_filter(values, diameter, sigma_color, sigma_space),
    };
    out.mapv(|v| v.clamp(0.0, 1.0))
}

/// Soft circular mask: 1 inside `radius - feather`, linear ramp to 0 at
/// `radius + feather`, 0 beyond. The ramp is softened with a small Gaussian,
/// after which everything beyond `radius + feather` is reset to 0.
pub fn feathered_mask(size: usize, region: &RetinaRegion, feather: f32, blur_kernel: usize) -> Array2<f32> {
    let cx = region.center.0 as f32;
    let cy = region.center.1 as f32;
    let r = region.radius as f32;
    let inner = r - feather;
    let outer = r + feather;

    let dist = |row: usize, col: usize| {
        let dx = col as f32 - cx;
        let dy = row as f32 - cy;
        (dx * dx + dy * dy).sqrt()
    };

    let mask = Array2::from_shape_fn((size, size), |(row, col)| {
        let d = dist(row, col);
        if d <= inner {
            1.0
        } else if d > outer {
            0.0
        } else {
            ((outer - d) / (outer - inner)).clamp(0.0, 1.0)
        }
    });

    if blur_kernel == 0 {
        return mask;
    }
    let mut blurred = filters::gaussian_blur(&mask, filters::sigma_for_kernel(blur_kernel));
    for ((row, col), v) in blurred.indexed_iter_mut() {
        if dist(row, col) > outer {
            *v = 0.0;
        } else {
            *v = v.clamp(0.0, 1.0);
        }
    }
    blurred
}

/// Zero values below `threshold`, then open with an elliptical element on
/// the 8-bit quantized map. Never raises a value, so masked pixels stay 0.
pub fn denoise(values: &Array2<f32>, threshold: f32, opening_kernel: usize) -> Array2<f32> {
    let thresholded = values.mapv(|v| if v < threshold { 0.0 } else { v });
    if opening_kernel == 0 {
        return thresholded;
    }
    filters::open_unit(&thresholded, &filters::elliptical_mask(opening_kernel))
}
