//! Clinical palettes and saliency colorization.
//!
//! Palettes are a closed set. Each is a piecewise-linear ramp through fixed
//! color stops; `inferno` and `viridis` use ten samples of the reference
//! perceptual maps, `jet_medical` a hand-tuned blue to red ramp with semantic
//! bands.

use crate::error::{CamError, Result, Stage};
use crate::postprocess::ProcessedSaliencyMap;
use image::{ImageBuffer, Rgba, RgbaImage};
use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    Inferno,
    JetMedical,
    Viridis,
}

impl std::str::FromStr for Palette {
    type Err = CamError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inferno" => Ok(Palette::Inferno),
            "jet_medical" => Ok(Palette::JetMedical),
            "viridis" => Ok(Palette::Viridis),
            _ => Err(CamError::UnknownPalette(s.to_string())),
        }
    }
}

impl std::fmt::Display for Palette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Labelled value range of a palette, for legends and reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InterpretationBand {
    pub from: f32,
    pub to: f32,
    pub label: &'static str,
}

const INFERNO: [[u8; 3]; 10] = [
    [0x00, 0x00, 0x04],
    [0x1b, 0x0c, 0x41],
    [0x4a, 0x0c, 0x6b],
    [0x78, 0x1c, 0x6d],
    [0xa5, 0x2c, 0x60],
    [0xcf, 0x44, 0x46],
    [0xed, 0x69, 0x25],
    [0xfb, 0x9b, 0x06],
    [0xf7, 0xd1, 0x3d],
    [0xfc, 0xff, 0xa4],
];

const VIRIDIS: [[u8; 3]; 10] = [
    [0x44, 0x01, 0x54],
    [0x48, 0x28, 0x78],
    [0x3e, 0x49, 0x89],
    [0x31, 0x68, 0x8e],
    [0x26, 0x82, 0x8e],
    [0x1f, 0x9e, 0x89],
    [0x35, 0xb7, 0x79],
    [0x6e, 0xce, 0x58],
    [0xb5, 0xde, 0x2b],
    [0xfd, 0xe7, 0x25],
];

/// (position, r, g, b) in unit range
const JET_MEDICAL: [(f32, [f32; 3]); 7] = [
    (0.0, [0.0, 0.0, 0.5]),
    (0.1, [0.0, 0.2, 0.8]),
    (0.3, [0.0, 0.8, 0.8]),
    (0.5, [0.0, 1.0, 0.0]),
    (0.7, [1.0, 1.0, 0.0]),
    (0.9, [1.0, 0.5, 0.0]),
    (1.0, [1.0, 0.0, 0.0]),
];

const PERCEPTUAL_BANDS: [InterpretationBand; 4] = [
    InterpretationBand {
        from: 0.0,
        to: 0.25,
        label: "minimal activation",
    },
    InterpretationBand {
        from: 0.25,
        to: 0.5,
        label: "low activation",
    },
    InterpretationBand {
        from: 0.5,
        to: 0.75,
        label: "moderate activation",
    },
    InterpretationBand {
        from: 0.75,
        to: 1.0,
        label: "high activation",
    },
];

const JET_MEDICAL_BANDS: [InterpretationBand; 3] = [
    InterpretationBand {
        from: 0.0,
        to: 0.3,
        label: "normal (blue/cyan)",
    },
    InterpretationBand {
        from: 0.3,
        to: 0.8,
        label: "attention (green/yellow)",
    },
    InterpretationBand {
        from: 0.8,
        to: 1.0,
        label: "critical (red)",
    },
];

fn uniform_ramp(stops: &[[u8; 3]; 10], t: f32) -> [f32; 3] {
    let pos = t * (stops.len() - 1) as f32;
    let i = (pos.floor() as usize).min(stops.len() - 2);
    let f = pos - i as f32;
    let a = stops[i];
    let b = stops[i + 1];
    [0usize, 1, 2].map(|k| (a[k] as f32 * (1.0 - f) + b[k] as f32 * f) / 255.0)
}

fn jet_medical(t: f32) -> [f32; 3] {
    for w in JET_MEDICAL.windows(2) {
        let (p0, c0) = w[0];
        let (p1, c1) = w[1];
        if t <= p1 {
            let f = ((t - p0) / (p1 - p0)).clamp(0.0, 1.0);
            return [0usize, 1, 2].map(|k| c0[k] * (1.0 - f) + c1[k] * f);
        }
    }
    JET_MEDICAL[JET_MEDICAL.len() - 1].1
}

impl Palette {
    pub const ALL: [Palette; 3] = [Palette::Inferno, Palette::JetMedical, Palette::Viridis];

    pub fn name(&self) -> &'static str {
        match self {
            Palette::Inferno => "inferno",
            Palette::JetMedical => "jet_medical",
            Palette::Viridis => "viridis",
        }
    }

    /// Human-readable legend title
    pub fn title(&self) -> &'static str {
        match self {
            Palette::Inferno => "Inferno (perceptually uniform)",
            Palette::JetMedical => "Jet Medical (clinical semantic)",
            Palette::Viridis => "Viridis (perceptually uniform)",
        }
    }

    /// Color at `t` in [0, 1] as unit-range RGB.
    pub fn sample_unit(&self, t: f32) -> [f32; 3] {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Palette::Inferno => uniform_ramp(&INFERNO, t),
            Palette::Viridis => uniform_ramp(&VIRIDIS, t),
            Palette::JetMedical => jet_medical(t),
        }
    }

    pub fn sample(&self, t: f32) -> [u8; 3] {
        self.sample_unit(t)
            .map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8)
    }

    pub fn low_color(&self) -> [u8; 3] {
        self.sample(0.0)
    }

    pub fn high_color(&self) -> [u8; 3] {
        self.sample(1.0)
    }

    pub fn interpretation_bands(&self) -> &'static [InterpretationBand] {
        match self {
            Palette::JetMedical => &JET_MEDICAL_BANDS,
            Palette::Inferno | Palette::Viridis => &PERCEPTUAL_BANDS,
        }
    }
}

/// Apply a palette to a normalized value [0, 1], fully opaque.
pub fn apply_colormap(value: f32, palette: Palette) -> Rgba<u8> {
    let [r, g, b] = palette.sample(value);
    Rgba([r, g, b, 255])
}

/// RGBA rendering of a processed map, together with the values it was
/// rendered from (the flattened overlay blends by value, not by alpha).
#[derive(Debug, Clone)]
pub struct ColorizedMap {
    pub image: RgbaImage,
    pub values: Array2<f32>,
    pub palette: Palette,
    pub gamma: Option<f32>,
    /// Values at or below this were zeroed upstream and stay transparent.
    pub threshold: f32,
}

impl ColorizedMap {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Palette color for a saliency value, gamma included.
    pub fn color_for(&self, value: f32) -> [u8; 3] {
        let t = match self.gamma {
            Some(g) => value.powf(g),
            None => value,
        };
        self.palette.sample(t)
    }
}

/// Maps processed saliency to palette color plus an intensity-driven alpha:
/// `alpha = clamp(base_opacity * x, 0, alpha_max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClinicalColorizer {
    pub base_opacity: f32,
    pub alpha_max: f32,
    pub gamma: Option<f32>,
}

impl Default for ClinicalColorizer {
    fn default() -> Self {
        Self {
            base_opacity: 0.8,
            alpha_max: 0.85,
            gamma: None,
        }
    }
}

impl ClinicalColorizer {
    pub fn alpha(&self, x: f32) -> f32 {
        (self.base_opacity * x).clamp(0.0, self.alpha_max)
    }

    pub fn colorize(&self, map: &ProcessedSaliencyMap, palette: Palette) -> Result<ColorizedMap> {
        let values = &map.values;
        if let Some(((row, col), &value)) = values
            .indexed_iter()
            .find(|(_, v)| !(v.is_finite() && (0.0..=1.0).contains(*v)))
        {
            return Err(CamError::NonFiniteOutput {
                stage: Stage::Colorization,
                row,
                col,
                value,
            });
        }

        let (rows, cols) = values.dim();
        let mut colorized = ColorizedMap {
            image: RgbaImage::new(cols as u32, rows as u32),
            values: values.clone(),
            palette,
            gamma: self.gamma,
            threshold: map.threshold,
        };
        let image = ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            let v = values[[y as usize, x as usize]];
            // Truncate so the stored byte never exceeds alpha_max.
            let alpha = (self.alpha(v) * 255.0).floor() as u8;
            if alpha == 0 {
                return Rgba([0, 0, 0, 0]);
            }
            let [r, g, b] = colorized.color_for(v);
            Rgba([r, g, b, alpha])
        });
        colorized.image = image;

        debug!("Colorized {cols}x{rows} map with {palette}");
        Ok(colorized)
    }

    /// Colorize with a palette given by name; unknown names are rejected.
    pub fn colorize_named(&self, map: &ProcessedSaliencyMap, palette: &str) -> Result<ColorizedMap> {
        self.colorize(map, palette.parse()?)
    }
}
