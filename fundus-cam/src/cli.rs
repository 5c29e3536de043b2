//! Command-line surface of the developer binary.
//!
//! - `GlobalArgs` and the per-command structs: what clap parses
//! - `DetectConfig` / `RenderConfig`: what the commands run with
//!
//! The library never sees these types; each command converts via `from_args`.

use clap::Parser;
use clap_verbosity_flag::Verbosity;
use fundus_cam::retina_detection::RetinaDetectorConfig;
use fundus_cam::{CamError, Interpolation, Palette, Smoothing, VisualizationConfig};
use serde::Serialize;
use std::path::PathBuf;

/// Parse probability value (must be between 0.0 and 1.0)
pub fn parse_probability(s: &str) -> std::result::Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&val) {
        return Err(format!("Must be between 0.0 and 1.0, got {val}"));
    }
    Ok(val)
}

/// Parse a percentile pair like "0.5,99.5"
pub fn parse_percentile_range(s: &str) -> std::result::Result<(f64, f64), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err("Percentile range must be in format 'LOW,HIGH' (e.g., '0.5,99.5')".to_string());
    }
    let lo = parts[0]
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("Invalid percentile: '{}'", parts[0]))?;
    let hi = parts[1]
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("Invalid percentile: '{}'", parts[1]))?;
    if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo > hi {
        return Err(format!("Percentiles must satisfy 0 <= LOW <= HIGH <= 100, got {lo},{hi}"));
    }
    Ok((lo, hi))
}

/// Global CLI arguments that apply to all fundus-cam commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Global output directory (overrides default placement next to input)
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Create metadata output file(s)
    #[arg(long, global = true)]
    pub metadata: bool,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv/-vvvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Use permissive mode for input validation (warn instead of error for unsupported files)
    #[arg(long, global = true)]
    pub permissive: bool,

    /// Disable colored output (also respects NO_COLOR and FUNDUS_CAM_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Allow overwriting existing outputs
    #[arg(long, global = true)]
    pub force: bool,
}

/// Options shared by every command
#[derive(Debug, Clone, Serialize)]
pub struct BaseConfig {
    /// Input sources (images or directories)
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    pub skip_metadata: bool,
    /// Fail on missing or unsupported inputs. Opposite of `--permissive`.
    pub strict: bool,
    pub force: bool,
}

impl From<GlobalArgs> for BaseConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            sources: Vec::new(), // Sources come from command, not global args
            output_dir: global.output_dir,
            skip_metadata: !global.metadata,
            strict: !global.permissive,
            force: global.force,
        }
    }
}

/// CLI command for retina region detection
#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    /// Path(s) to fundus images or directories. Supports glob patterns like *.png
    #[arg(value_name = "IMAGES_OR_DIRS", required = true)]
    pub sources: Vec<String>,

    /// Minimum retina radius as a fraction of the shorter image side
    #[arg(long, default_value = "0.30", value_parser = parse_probability)]
    pub min_radius_frac: f32,

    /// Maximum retina radius as a fraction of the shorter image side
    #[arg(long, default_value = "0.48", value_parser = parse_probability)]
    pub max_radius_frac: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub detector: RetinaDetectorConfig,
}

impl DetectConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: DetectCommand) -> std::result::Result<Self, String> {
        if cmd.min_radius_frac >= cmd.max_radius_frac {
            return Err(format!(
                "--min-radius-frac ({}) must be below --max-radius-frac ({})",
                cmd.min_radius_frac, cmd.max_radius_frac
            ));
        }
        let mut base: BaseConfig = global.into();
        base.sources = cmd.sources;

        let detector = RetinaDetectorConfig {
            min_radius_frac: cmd.min_radius_frac,
            max_radius_frac: cmd.max_radius_frac,
            ..RetinaDetectorConfig::default()
        };
        Ok(Self { base, detector })
    }
}

/// CLI command for rendering a visualization from a precomputed saliency input
#[derive(Parser, Debug, Clone)]
pub struct RenderCommand {
    /// Fundus image the saliency refers to
    #[arg(value_name = "IMAGE", required = true)]
    pub image: String,

    /// JSON file holding a raw saliency grid (array of rows)
    #[arg(long, conflicts_with = "tensors", required_unless_present = "tensors")]
    pub saliency: Option<PathBuf>,

    /// JSON file holding an activation/gradient tensor pair
    #[arg(long)]
    pub tensors: Option<PathBuf>,

    /// Clinical palette (inferno, jet_medical, viridis)
    #[arg(long, default_value = "inferno")]
    pub palette: String,

    /// Normalization percentiles as LOW,HIGH
    #[arg(long, default_value = "0.5,99.5", value_parser = parse_percentile_range)]
    pub percentiles: (f64, f64),

    /// Smoothing method (gaussian or bilateral)
    #[arg(long, default_value = "bilateral")]
    pub smoothing: Smoothing,

    /// Upscaling filter (bicubic or lanczos)
    #[arg(long, default_value = "lanczos")]
    pub interpolation: Interpolation,

    /// Mask feather half-width in output pixels
    #[arg(long, default_value = "20")]
    pub feather: f32,

    /// Denoise threshold as a fraction of full scale
    #[arg(long, default_value = "0.02", value_parser = parse_probability)]
    pub threshold: f32,

    /// Gamma applied to the color lookup (e.g. 0.7)
    #[arg(long)]
    pub gamma: Option<f32>,

    /// Blend strength of the flattened overlay
    #[arg(long, default_value = "0.35", value_parser = parse_probability)]
    pub overlay_alpha: f32,

    /// Output resolution
    #[arg(long, default_value = "512")]
    pub size: u32,
}

/// Where the raw saliency comes from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaliencySource {
    Grid(PathBuf),
    Tensors(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub source: SaliencySource,
    pub visualization: VisualizationConfig,
}

impl RenderConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: RenderCommand) -> std::result::Result<Self, String> {
        let source = match (cmd.saliency, cmd.tensors) {
            (Some(grid), None) => SaliencySource::Grid(grid),
            (None, Some(tensors)) => SaliencySource::Tensors(tensors),
            _ => return Err("Exactly one of --saliency or --tensors is required".to_string()),
        };
        let palette: Palette = cmd.palette.parse().map_err(|e: CamError| e.to_string())?;

        let mut base: BaseConfig = global.into();
        base.sources = vec![cmd.image];

        let visualization = VisualizationConfig {
            target_size: cmd.size,
            interpolation: cmd.interpolation,
            percentile_range: cmd.percentiles,
            smoothing: cmd.smoothing,
            feather_px: cmd.feather,
            denoise_threshold: cmd.threshold,
            palette,
            gamma: cmd.gamma,
            overlay_alpha: cmd.overlay_alpha,
            ..VisualizationConfig::default()
        };
        visualization.validate().map_err(|e| e.to_string())?;

        Ok(Self {
            base,
            source,
            visualization,
        })
    }
}
