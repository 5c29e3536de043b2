//! JSON inputs for `render`: either a precomputed saliency grid or an
//! activation/gradient tensor pair exported from a training framework.

use crate::cli::SaliencySource;
use anyhow::{bail, Context, Result};
use fundus_cam::saliency::{ActivationGradientPair, RawSaliencyMap, SaliencyExtractor};
use log::debug;
use ndarray::{Array2, Array3};
use serde::Deserialize;
use std::path::Path;

/// Flattened `[H, W, C]` tensors in row-major order.
#[derive(Debug, Deserialize)]
pub struct TensorFile {
    pub shape: [usize; 3],
    pub activation: Vec<f32>,
    pub gradient: Vec<f32>,
    #[serde(default)]
    pub second_order: Option<Vec<f32>>,
    #[serde(default)]
    pub third_order: Option<Vec<f32>>,
}

fn to_tensor(name: &str, shape: [usize; 3], data: Vec<f32>) -> Result<Array3<f32>> {
    let len = data.len();
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), data).with_context(|| {
        format!("{name} has {len} values, which does not fit shape {shape:?}")
    })
}

impl TensorFile {
    pub fn into_pair(self) -> Result<ActivationGradientPair> {
        let shape = self.shape;
        let pair = ActivationGradientPair::new(
            to_tensor("activation", shape, self.activation)?,
            to_tensor("gradient", shape, self.gradient)?,
        )?;
        match (self.second_order, self.third_order) {
            (Some(second), Some(third)) => Ok(pair.with_higher_order(
                to_tensor("second_order", shape, second)?,
                to_tensor("third_order", shape, third)?,
            )?),
            (None, None) => Ok(pair),
            _ => bail!("second_order and third_order must be given together"),
        }
    }
}

/// Parse a JSON array of equal-length rows.
pub fn parse_grid(text: &str) -> Result<Array2<f32>> {
    let rows: Vec<Vec<f32>> = serde_json::from_str(text).context("Saliency grid is not a JSON array of rows")?;
    let height = rows.len();
    let width = rows.first().map_or(0, Vec::len);
    if height == 0 || width == 0 {
        bail!("Saliency grid is empty");
    }
    if let Some(i) = rows.iter().position(|r| r.len() != width) {
        bail!("Saliency grid row {i} has {} values, expected {width}", rows[i].len());
    }
    Ok(Array2::from_shape_vec(
        (height, width),
        rows.into_iter().flatten().collect(),
    )?)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn load_saliency(source: &SaliencySource, extractor: &SaliencyExtractor) -> Result<RawSaliencyMap> {
    let raw = match source {
        SaliencySource::Grid(path) => RawSaliencyMap::from_values(parse_grid(&read(path)?)?)?,
        SaliencySource::Tensors(path) => {
            let file: TensorFile = serde_json::from_str(&read(path)?)
                .with_context(|| format!("Invalid tensor file {}", path.display()))?;
            let pair = file.into_pair()?;
            debug!(
                "Loaded tensors {:?} (explicit higher-order gradients: {})",
                pair.dim(),
                pair.has_higher_order()
            );
            extractor.compute_pair(&pair)?
        }
    };
    let (h, w) = raw.dim();
    debug!("Raw saliency {h}x{w}, degenerate: {}", raw.degenerate);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grid() {
        let grid = parse_grid("[[0.0, 1.0], [0.5, 0.25]]").unwrap();
        assert_eq!(grid.dim(), (2, 2));
        assert_eq!(grid[[1, 0]], 0.5);
        assert!(parse_grid("[[0.0, 1.0], [0.5]]").is_err());
        assert!(parse_grid("[]").is_err());
    }

    #[test]
    fn test_tensor_file_shape_checked() {
        let file: TensorFile = serde_json::from_str(
            r#"{"shape": [2, 2, 1], "activation": [1, 1, 1, 1], "gradient": [1, 1, 1]}"#,
        )
        .unwrap();
        assert!(file.into_pair().is_err());
    }

    #[test]
    fn test_tensor_file_requires_both_higher_orders() {
        let file: TensorFile = serde_json::from_str(
            r#"{"shape": [1, 1, 1], "activation": [1], "gradient": [1], "second_order": [1]}"#,
        )
        .unwrap();
        assert!(file.into_pair().is_err());
    }

    #[test]
    fn test_load_grid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.json");
        std::fs::write(&path, "[[0.0, 2.0], [1.0, -1.0]]").unwrap();
        let raw = load_saliency(&SaliencySource::Grid(path), &SaliencyExtractor::default()).unwrap();
        assert_eq!(raw.values[[0, 1]], 1.0);
        assert_eq!(raw.values[[1, 1]], 0.0);
    }
}
