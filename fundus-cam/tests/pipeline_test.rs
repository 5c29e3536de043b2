use approx::assert_relative_eq;
use fundus_cam::export::png_dimensions;
use fundus_cam::model::{Classifier, ModelRegistry};
use fundus_cam::pipeline::{RenderContext, VisualizationPipeline, VisualizationRenderer};
use fundus_cam::postprocess::SaliencyPostProcessor;
use fundus_cam::retina_detection::RetinaRegion;
use fundus_cam::saliency::{ActivationGradientPair, LayerInfo, RawSaliencyMap};
use fundus_cam::{CamError, Palette, VisualizationConfig};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, Array3, Array4};
use std::sync::Arc;

fn peaked_grid(size: usize, peak: (usize, usize)) -> Array2<f32> {
    Array2::from_shape_fn((size, size), |(r, c)| if (r, c) == peak { 1.0 } else { 0.0 })
}

fn fundus_like(size: u32) -> RgbImage {
    let c = size as f32 / 2.0;
    let r = size as f32 * 0.42;
    RgbImage::from_fn(size, size, |x, y| {
        let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt();
        if d <= r {
            Rgb([170, 80, 40])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Centroid of the values at or above half of the maximum.
fn main_lobe_centroid(values: &Array2<f32>) -> (f32, f32) {
    let max = values.iter().cloned().fold(0.0f32, f32::max);
    let (mut sx, mut sy, mut sw) = (0.0f64, 0.0f64, 0.0f64);
    for ((row, col), &v) in values.indexed_iter() {
        if v >= 0.5 * max {
            sx += col as f64 * v as f64;
            sy += row as f64 * v as f64;
            sw += v as f64;
        }
    }
    ((sx / sw) as f32, (sy / sw) as f32)
}

#[test]
fn test_single_peak_stays_in_place_and_is_masked() {
    let raw = RawSaliencyMap::from_values(peaked_grid(12, (6, 6))).unwrap();
    let region = RetinaRegion::new((256, 256), 200, 0.9);
    let processed = SaliencyPostProcessor::default()
        .process(&raw, &region, 512)
        .unwrap();

    assert_eq!(processed.values.dim(), (512, 512));
    assert!(processed.values.iter().all(|v| (0.0..=1.0).contains(v)));
    assert!(processed.max() > 0.9);

    // Source pixel 6 maps to (6 + 0.5) * 512 / 12 - 0.5 in the output.
    let expected = 6.5 * 512.0 / 12.0 - 0.5;
    let (cx, cy) = main_lobe_centroid(&processed.values);
    assert!((cx - expected).abs() < 4.0, "centroid x {cx}");
    assert!((cy - expected).abs() < 4.0, "centroid y {cy}");

    for ((row, col), &v) in processed.values.indexed_iter() {
        let d = ((row as f32 - 256.0).powi(2) + (col as f32 - 256.0).powi(2)).sqrt();
        if d > 220.0 {
            assert_eq!(v, 0.0, "nonzero at ({row}, {col}), distance {d}");
        }
    }
}

#[test]
fn test_uniform_map_normalizes_without_nan() {
    let raw = RawSaliencyMap::from_values(Array2::from_elem((12, 12), 0.4)).unwrap();
    let region = RetinaRegion::new((256, 256), 200, 0.9);
    let processed = SaliencyPostProcessor::default()
        .process(&raw, &region, 512)
        .unwrap();
    assert!(processed.normalization.degenerate_range);
    assert!(processed.values.iter().all(|v| v.is_finite()));
}

#[test]
fn test_degenerate_saliency_renders_transparent_overlay() {
    let raw = RawSaliencyMap::from_values(Array2::zeros((12, 12))).unwrap();
    assert!(raw.degenerate);

    let renderer = VisualizationRenderer::new(VisualizationConfig::default()).unwrap();
    let image = fundus_like(300);
    let bundle = renderer
        .render(&image, &raw, Palette::Inferno, &RenderContext::default())
        .unwrap();

    assert!(bundle.metadata.saliency_degenerate);
    assert!(bundle.metadata.output_empty);
    let overlay = image::load_from_memory_with_format(&bundle.overlay_png, ImageFormat::Png)
        .unwrap()
        .to_rgba8();
    assert!(overlay.pixels().all(|p| p[3] == 0));

    // Nothing to blend, so the composite is the resized original.
    let composite = image::load_from_memory_with_format(&bundle.composite_png, ImageFormat::Png)
        .unwrap()
        .to_rgb8();
    let resized = image::imageops::resize(&image, 512, 512, image::imageops::FilterType::Lanczos3);
    assert_eq!(composite, resized);
}

#[test]
fn test_export_is_512_for_any_native_resolution() {
    let renderer = VisualizationRenderer::new(VisualizationConfig::default()).unwrap();
    let image = fundus_like(640);

    for native in [8usize, 12, 24, 96] {
        let raw = RawSaliencyMap::from_values(peaked_grid(native, (native / 2, native / 3))).unwrap();
        let bundle = renderer
            .render(&image, &raw, Palette::JetMedical, &RenderContext::default())
            .unwrap();
        assert_eq!(png_dimensions(&bundle.overlay_png).unwrap(), (512, 512));
        assert_eq!(png_dimensions(&bundle.composite_png).unwrap(), (512, 512));
        assert_eq!(bundle.metadata.output_size, 512);
        assert_eq!(bundle.metadata.raw_height, native);
        assert!(bundle.legend_svg.starts_with("<svg"));
    }
}

#[test]
fn test_overlay_alpha_never_exceeds_alpha_max() {
    let config = VisualizationConfig {
        base_opacity: 1.0,
        ..VisualizationConfig::default()
    };
    let renderer = VisualizationRenderer::new(config).unwrap();
    let raw = RawSaliencyMap::from_values(peaked_grid(12, (5, 5))).unwrap();
    let bundle = renderer
        .render(&fundus_like(512), &raw, Palette::Viridis, &RenderContext::default())
        .unwrap();
    let overlay = image::load_from_memory(&bundle.overlay_png).unwrap().to_rgba8();
    let limit = (0.85f32 * 255.0).floor() as u8;
    assert!(overlay.pixels().all(|p| p[3] <= limit));
    assert!(overlay.pixels().any(|p| p[3] == limit));
}

/// Classifier whose activation peaks at a class-dependent location.
struct BlobClassifier {
    activation_fails: bool,
}

impl Classifier for BlobClassifier {
    fn input_size(&self) -> u32 {
        64
    }

    fn conv_layers(&self) -> Vec<LayerInfo> {
        vec![
            LayerInfo::new("block1_conv", 32, 32, 4),
            LayerInfo::new("block4_conv", 14, 14, 8),
            LayerInfo::new("block5_conv", 7, 7, 16),
        ]
    }

    fn predict(&self, input: &Array4<f32>) -> fundus_cam::Result<Vec<f32>> {
        assert_eq!(input.shape(), &[1, 64, 64, 3]);
        Ok(vec![0.05, 0.15, 0.6, 0.15, 0.05])
    }

    fn activations_and_gradients(
        &self,
        _input: &Array4<f32>,
        target_class: usize,
        layer: &str,
    ) -> fundus_cam::Result<ActivationGradientPair> {
        if self.activation_fails {
            return Err(CamError::ModelUnavailable(format!("layer {layer} not built")));
        }
        let peak = 4.0 + 5.0 * target_class as f32;
        let activation = Array3::from_shape_fn((32, 32, 4), |(r, c, _)| {
            let d2 = (r as f32 - peak).powi(2) + (c as f32 - 16.0).powi(2);
            (-d2 / 18.0).exp()
        });
        ActivationGradientPair::new(activation, Array3::from_elem((32, 32, 4), 0.5))
    }
}

fn pipeline(activation_fails: bool) -> VisualizationPipeline {
    let registry = ModelRegistry::new(Arc::new(BlobClassifier { activation_fails }))
        .with_version("blob-1");
    VisualizationPipeline::new(registry, VisualizationConfig::default()).unwrap()
}

#[test]
fn test_generate_visualization_for_predicted_class() {
    let bundle = pipeline(false)
        .generate_visualization(&fundus_like(400), None, "jet_medical")
        .unwrap();
    let md = &bundle.metadata;
    assert_eq!(md.palette, "jet_medical");
    assert_eq!(md.target_class, Some(2));
    assert_eq!(md.target_class_name.as_deref(), Some("Moderate"));
    assert_relative_eq!(md.target_probability.unwrap(), 0.6);
    assert_eq!(md.layer_name.as_deref(), Some("block1_conv"));
    assert!(!md.layer_below_floor);
    assert!(!md.saliency_degenerate);
}

#[test]
fn test_generate_visualization_rejects_bad_inputs() {
    let p = pipeline(false);
    let image = fundus_like(128);
    assert!(matches!(
        p.generate_visualization(&image, Some(1), "rainbow"),
        Err(CamError::UnknownPalette(name)) if name == "rainbow"
    ));
    assert!(matches!(
        p.generate_visualization(&image, Some(9), "inferno"),
        Err(CamError::InvalidTargetClass { class: 9, num_classes: 5 })
    ));
}

#[test]
fn test_diagnose_keeps_classification_when_visualization_fails() {
    let diagnosis = pipeline(true).diagnose(&fundus_like(256)).unwrap();
    assert_eq!(diagnosis.predicted_class, 2);
    assert_eq!(diagnosis.class_name, "Moderate");
    assert_relative_eq!(diagnosis.confidence, 0.6);
    assert!(matches!(
        diagnosis.visualization,
        Err(CamError::ModelUnavailable(_))
    ));
}

#[test]
fn test_diagnose_with_visualization() {
    let diagnosis = pipeline(false).diagnose(&fundus_like(256)).unwrap();
    let bundle = diagnosis.visualization.unwrap();
    assert_eq!(bundle.metadata.palette, "inferno");
    assert!(!bundle.overlay_base64().is_empty());
}
