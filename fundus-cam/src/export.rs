//! Bundle export: transparent overlay, flattened composite, legend and
//! metadata. All rasters are PNG; every encoded PNG is decoded again and its
//! dimensions checked before the bundle is returned.

use crate::colormap::ColorizedMap;
use crate::error::{CamError, Result};
use crate::legend::render_legend_svg;
use crate::metadata::VisualizationMetadata;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};
use log::debug;
use serde::Serialize;
use std::io::Cursor;

/// Final artifact handed to callers. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct VisualizationBundle {
    /// Colorized saliency with intensity-driven alpha (PNG, RGBA)
    #[serde(serialize_with = "as_base64")]
    pub overlay_png: Vec<u8>,
    /// Saliency blended onto the original (PNG, RGB)
    #[serde(serialize_with = "as_base64")]
    pub composite_png: Vec<u8>,
    /// Standalone colorbar (SVG text)
    pub legend_svg: String,
    pub metadata: VisualizationMetadata,
}

fn as_base64<S: serde::Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&B64.encode(bytes))
}

impl VisualizationBundle {
    pub fn overlay_base64(&self) -> String {
        B64.encode(&self.overlay_png)
    }

    pub fn composite_base64(&self) -> String {
        B64.encode(&self.composite_png)
    }

    pub fn legend_base64(&self) -> String {
        B64.encode(self.legend_svg.as_bytes())
    }
}

/// Blend the colorized map onto `original`:
/// `out = (1 - b) * original + b * color`, `b = overlay_alpha * x`, only where
/// `x > threshold`. Computed in f32 and clipped to [0, 255].
pub fn composite_with_alpha(
    original: &RgbImage,
    colorized: &ColorizedMap,
    overlay_alpha: f32,
) -> Result<RgbImage> {
    let (width, height) = original.dimensions();
    if colorized.dimensions() != (width, height) {
        let (cw, ch) = colorized.dimensions();
        return Err(CamError::shape_mismatch(
            "original image",
            &[ch as usize, cw as usize],
            &[height as usize, width as usize],
        ));
    }

    let alpha = overlay_alpha.clamp(0.0, 1.0);
    let mut result = original.clone();
    for (x, y, pixel) in result.enumerate_pixels_mut() {
        let v = colorized.values[[y as usize, x as usize]];
        if v <= colorized.threshold {
            continue;
        }
        let blend = alpha * v;
        let color = colorized.color_for(v);
        let base = original.get_pixel(x, y);
        *pixel = Rgb([0, 1, 2].map(|k: usize| {
            ((1.0 - blend) * base[k] as f32 + blend * color[k] as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        }));
    }
    Ok(result)
}

pub fn encode_png(image: DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Pixel dimensions of an encoded PNG.
pub fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok((decoded.width(), decoded.height()))
}

fn verify_size(asset: &'static str, bytes: &[u8], expected: (u32, u32)) -> Result<()> {
    let actual = png_dimensions(bytes)?;
    if actual != expected {
        return Err(CamError::ExportSizeInvariant {
            asset,
            expected,
            actual,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualizationExporter {
    pub overlay_alpha: f32,
}

impl Default for VisualizationExporter {
    fn default() -> Self {
        Self {
            overlay_alpha: 0.35,
        }
    }
}

impl VisualizationExporter {
    /// Build the bundle. `original` must already be at the colorized map's
    /// resolution, which must equal `metadata.output_size` on both sides.
    pub fn export(
        &self,
        colorized: &ColorizedMap,
        original: &RgbImage,
        metadata: VisualizationMetadata,
    ) -> Result<VisualizationBundle> {
        let target = (metadata.output_size, metadata.output_size);
        if colorized.dimensions() != target {
            return Err(CamError::ExportSizeInvariant {
                asset: "colorized map",
                expected: target,
                actual: colorized.dimensions(),
            });
        }

        let overlay: RgbaImage = colorized.image.clone();
        let overlay_png = encode_png(DynamicImage::ImageRgba8(overlay))?;
        verify_size("transparent overlay", &overlay_png, target)?;

        let composite = composite_with_alpha(original, colorized, self.overlay_alpha)?;
        let composite_png = encode_png(DynamicImage::ImageRgb8(composite))?;
        verify_size("flattened overlay", &composite_png, target)?;

        let legend_svg = render_legend_svg(colorized.palette);

        debug!(
            "Exported bundle: overlay {} B, composite {} B, legend {} B",
            overlay_png.len(),
            composite_png.len(),
            legend_svg.len()
        );
        Ok(VisualizationBundle {
            overlay_png,
            composite_png,
            legend_svg,
            metadata,
        })
    }
}
