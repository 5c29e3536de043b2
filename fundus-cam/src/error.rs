//! Error types for the saliency visualization pipeline.
//!
//! Contract violations (`ShapeMismatch`, `UnknownPalette`, `ExportSizeInvariant`)
//! are programmer errors and are never retried. Degraded-confidence conditions
//! (detector fallback, all-zero saliency, low-resolution layer) are not errors at
//! all; they are carried as data in the results and the metadata record.

use thiserror::Error;

/// Pipeline stage that produced a non-finite or out-of-range value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    PostProcessing,
    Colorization,
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extraction => write!(f, "saliency extraction"),
            Stage::PostProcessing => write!(f, "post-processing"),
            Stage::Colorization => write!(f, "colorization"),
            Stage::Export => write!(f, "export"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CamError {
    /// Activation and gradient tensors (or an input image and map) disagree in shape.
    #[error("shape mismatch: {what} is {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Palette name outside the closed clinical set. There is no fallback.
    #[error("unknown palette '{0}' (expected one of: inferno, jet_medical, viridis)")]
    UnknownPalette(String),

    /// An encoded artifact does not have the requested pixel dimensions.
    #[error("{asset} encoded at {actual:?}, expected {expected:?}")]
    ExportSizeInvariant {
        asset: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Post-condition check failed: a value is NaN/Inf or outside [0, 1].
    #[error("{stage} produced an invalid value {value} at ({row}, {col})")]
    NonFiniteOutput {
        stage: Stage,
        row: usize,
        col: usize,
        value: f32,
    },

    #[error("target class {class} out of range for {num_classes} classes")]
    InvalidTargetClass { class: usize, num_classes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model collaborator could not provide predictions or activations.
    /// This is a precondition failure and is not retried here.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("metadata serialization: {0}")]
    Serialization(String),

    #[error("image encoding")]
    Image(#[from] image::ImageError),

    #[error("io")]
    Io(#[from] std::io::Error),
}

impl CamError {
    pub fn shape_mismatch(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        CamError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// True for the contract-violation class of errors.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            CamError::ShapeMismatch { .. }
                | CamError::UnknownPalette(_)
                | CamError::ExportSizeInvariant { .. }
                | CamError::NonFiniteOutput { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CamError>;
