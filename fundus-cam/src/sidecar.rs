//! `<stem>.fundus-cam.toml` sidecar files written by the developer binary.
//!
//! Each command owns one section; re-running a command replaces its section
//! and keeps the other one.

use crate::color_utils::{colors, symbols};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use fundus_cam::metadata::VisualizationMetadata;
use fundus_cam::retina_detection::RetinaRegion;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar file written next to each processed image
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct SidecarMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detect: Option<DetectSections>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderSections>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DetectSections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<RetinaRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<toml::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputProcessing>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RenderSections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<VisualizationMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputProcessing>,
}

/// Execution context for a tool invocation
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fundus_cam_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars: Option<HashMap<String, String>>,
}

impl ExecutionContext {
    pub fn now(processing_time_ms: f64) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            fundus_cam_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            command_line: Some(std::env::args().collect()),
            processing_time_ms: Some(processing_time_ms),
            env_vars: collect_env_vars(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InputProcessing {
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub strict_mode: bool,
}

/// Load existing sidecar metadata, or start fresh. An unreadable file is
/// dropped with a warning rather than failing the run.
pub fn load_or_create_metadata(path: &Path) -> Result<SidecarMetadata> {
    if !path.exists() {
        return Ok(SidecarMetadata::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read metadata from {}", path.display()))?;
    match toml::from_str::<SidecarMetadata>(&content) {
        Ok(metadata) => Ok(metadata),
        Err(e) => {
            warn!(
                "{} Dropping existing metadata from {}:\n{}",
                symbols::warning(),
                path.display(),
                colors::warning_level(&e.to_string())
            );
            Ok(SidecarMetadata::default())
        }
    }
}

pub fn save_metadata(metadata: &SidecarMetadata, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(metadata).map_err(|e| {
        log::debug!("Failed to serialize metadata: {metadata:#?}");
        anyhow!("Failed to serialize metadata to TOML: {e}")
    })?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write metadata to {}", path.display()))?;
    Ok(())
}

/// `<stem>.fundus-cam.toml`, next to the input or in `output_dir`
pub fn get_metadata_path(input_path: &Path, output_dir: Option<&str>) -> Result<PathBuf> {
    let input_stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("Invalid input filename: {}", input_path.display()))?;

    let metadata_filename = format!("{input_stem}.fundus-cam.toml");

    Ok(match output_dir {
        Some(dir) => Path::new(dir).join(metadata_filename),
        None => input_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(metadata_filename),
    })
}

/// All non-empty FUNDUS_CAM_* environment variables
pub fn collect_env_vars() -> Option<HashMap<String, String>> {
    let vars: HashMap<String, String> = std::env::vars()
        .filter(|(k, v)| k.starts_with("FUNDUS_CAM_") && !v.is_empty())
        .collect();
    if vars.is_empty() {
        None
    } else {
        Some(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundus_cam::postprocess::{NormalizationStats, ProcessedSaliencyMap};
    use fundus_cam::saliency::RawSaliencyMap;
    use fundus_cam::VisualizationConfig;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn sample_metadata() -> VisualizationMetadata {
        let config = VisualizationConfig::default();
        let raw = RawSaliencyMap::from_values(Array2::from_elem((12, 12), 1.0)).unwrap();
        let processed = ProcessedSaliencyMap {
            values: Array2::zeros((512, 512)),
            region: RetinaRegion::new((256, 256), 200, 0.9),
            normalization: NormalizationStats {
                p_low: 0.5,
                p_high: 99.5,
                low_value: 0.1,
                high_value: 0.9,
                degenerate_range: false,
                support: 100,
            },
            feather_px: 20.0,
            threshold: 0.02,
            empty: true,
        };
        VisualizationMetadata::new(&config, &raw, &processed)
    }

    #[test]
    fn test_sidecar_toml_roundtrip() {
        let metadata = SidecarMetadata {
            render: Some(RenderSections {
                visualization: Some(sample_metadata()),
                execution: Some(ExecutionContext::now(12.5)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&metadata).unwrap();
        assert!(text.contains("[render.visualization]"));
        let parsed: SidecarMetadata = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed.render.unwrap().visualization.unwrap().region_radius,
            200
        );
    }

    #[test]
    fn test_get_metadata_path() {
        let input_path = Path::new("/path/to/fundus.jpg");
        let path = get_metadata_path(input_path, None).unwrap();
        assert_eq!(path, Path::new("/path/to/fundus.fundus-cam.toml"));
        let path = get_metadata_path(input_path, Some("/output")).unwrap();
        assert_eq!(path, Path::new("/output/fundus.fundus-cam.toml"));
    }

    #[test]
    fn test_unreadable_sidecar_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("eye.fundus-cam.toml");
        fs::write(&path, "not = [valid").unwrap();
        let metadata = load_or_create_metadata(&path).unwrap();
        assert!(metadata.detect.is_none() && metadata.render.is_none());

        save_metadata(&metadata, &path).unwrap();
        assert!(load_or_create_metadata(&path).is_ok());
    }
}
