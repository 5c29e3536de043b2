//! Command runners for the developer binary.

use crate::cli::{DetectConfig, RenderConfig};
use crate::color_utils::{maybe_dim_stderr, progress::create_batch_progress_bar, symbols};
use crate::image_input::{collect_images_from_sources, ImageInputConfig};
use crate::output_manager::OutputManager;
use crate::saliency_input::load_saliency;
use crate::sidecar::{DetectSections, ExecutionContext, InputProcessing, RenderSections};
use anyhow::{bail, Context, Result};
use fundus_cam::pipeline::{RenderContext, VisualizationRenderer};
use fundus_cam::retina_detection::{RetinaRegion, RetinaRegionDetector};
use fundus_cam::saliency::SaliencyExtractor;
use image::RgbImage;
use log::{debug, error, info, warn};
use std::path::Path;
use std::time::Instant;

fn load_rgb(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .to_rgb8())
}

fn input_record(path: &Path, image: &RgbImage, strict: bool) -> InputProcessing {
    InputProcessing {
        image_path: path.to_string_lossy().to_string(),
        width: image.width(),
        height: image.height(),
        strict_mode: strict,
    }
}

fn describe_region(region: &RetinaRegion) -> String {
    let note = if region.fallback {
        format!(" {}", symbols::fallback())
    } else {
        String::new()
    };
    format!(
        "center ({}, {}) radius {} confidence {:.2}{note}",
        region.center.0, region.center.1, region.radius, region.confidence
    )
}

fn detect_one(config: &DetectConfig, detector: &RetinaRegionDetector, path: &Path) -> Result<RetinaRegion> {
    let start = Instant::now();
    let image = load_rgb(path)?;
    let region = detector.detect(&image);
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let sections = DetectSections {
        region: Some(region),
        config: toml::Value::try_from(&config.detector).ok(),
        execution: Some(ExecutionContext::now(elapsed_ms)),
        input: Some(input_record(path, &image, config.base.strict)),
    };
    OutputManager::new(&config.base, path).save_sections(Some(sections), None)?;
    Ok(region)
}

/// Detect the retina region of every input image.
pub fn run_detect(config: DetectConfig) -> Result<usize> {
    let images = collect_images_from_sources(
        &config.base.sources,
        &ImageInputConfig::from_strict_flag(config.base.strict),
    )?;
    if images.is_empty() {
        warn!("{}No fundus images to process", symbols::warning());
        return Ok(0);
    }

    let detector = RetinaRegionDetector::new(config.detector.clone());
    let progress = create_batch_progress_bar(images.len());
    let mut succeeded = 0;
    let mut failed = Vec::new();

    for path in &images {
        if let Some(pb) = &progress {
            pb.set_message(path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
        }
        match detect_one(&config, &detector, path) {
            Ok(region) => {
                succeeded += 1;
                info!(
                    "{} {} {}",
                    symbols::completed_successfully(),
                    path.display(),
                    maybe_dim_stderr(&describe_region(&region))
                );
            }
            Err(e) => {
                error!("{} {}: {e:#}", symbols::operation_failed(), path.display());
                if config.base.strict {
                    if let Some(pb) = &progress {
                        pb.finish_and_clear();
                    }
                    return Err(e);
                }
                failed.push(path.clone());
            }
        }
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    match (succeeded, failed.len()) {
        (0, n) if n > 0 => bail!("Retina detection failed for all {n} images"),
        (ok, 0) => info!("{} Detected {ok} retina regions", symbols::completed_successfully()),
        (ok, n) => warn!(
            "{} Detected {ok} retina regions, {n} images failed",
            symbols::completed_partially_successfully()
        ),
    }
    Ok(succeeded)
}

/// Render one visualization bundle from a precomputed saliency input.
pub fn run_render(config: RenderConfig) -> Result<()> {
    let start = Instant::now();
    let images = collect_images_from_sources(&config.base.sources, &ImageInputConfig::from_strict_flag(true))?;
    let Some(path) = images.first() else {
        bail!("No fundus image given");
    };

    let image = load_rgb(path)?;
    let raw = load_saliency(&config.source, &SaliencyExtractor::default())?;
    let renderer = VisualizationRenderer::new(config.visualization.clone())?;
    let bundle = renderer.render(
        &image,
        &raw,
        config.visualization.palette,
        &RenderContext::default(),
    )?;

    let metadata = &bundle.metadata;
    if metadata.region_fallback {
        warn!(
            "{}Retina region not found; mask uses the image-center fallback",
            symbols::warning()
        );
    }
    if metadata.saliency_degenerate || metadata.output_empty {
        warn!("{}Saliency is empty; the overlay is fully transparent", symbols::warning());
    }
    debug!("Visualization record: {}", serde_json::Value::Object(metadata.to_flat_map()?));

    let manager = OutputManager::new(&config.base, path);
    let written = manager.write_bundle(&bundle)?;
    let outputs = written
        .iter()
        .map(|(kind, p)| -> Result<(String, String)> {
            Ok((kind.clone(), manager.make_relative_to_metadata(p)?))
        })
        .collect::<Result<_>>()?;

    let sections = RenderSections {
        visualization: Some(bundle.metadata.clone()),
        outputs: Some(outputs),
        execution: Some(ExecutionContext::now(start.elapsed().as_secs_f64() * 1000.0)),
        input: Some(input_record(path, &image, config.base.strict)),
    };
    manager.save_sections(None, Some(sections))?;

    info!(
        "{} Rendered {} at {}x{} in {:.1}ms",
        symbols::completed_successfully(),
        path.display(),
        metadata.output_size,
        metadata.output_size,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}
