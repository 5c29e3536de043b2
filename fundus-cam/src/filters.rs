//! Bridges between `Array2<f32>` saliency maps and `imageproc` filters, plus
//! the float bilateral filter the post-processor needs.
//!
//! All functions take an input map by reference and allocate a fresh output,
//! so no stage ever reads and writes the same buffer.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{grayscale_open, Mask};
use ndarray::Array2;

/// Single-channel float image used to hand maps to `imageproc`.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

pub fn to_float_image(values: &Array2<f32>) -> FloatImage {
    let (rows, cols) = values.dim();
    ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([values[[y as usize, x as usize]]])
    })
}

pub fn from_float_image(image: &FloatImage) -> Array2<f32> {
    let (w, h) = image.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(r, c)| {
        image.get_pixel(c as u32, r as u32)[0]
    })
}

/// Sigma matching a `ksize` kernel when none is given explicitly.
pub fn sigma_for_kernel(ksize: usize) -> f32 {
    let ksize = ksize.max(1) | 1;
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Gaussian blur through `imageproc`. Edges are padded by continuity.
pub fn gaussian_blur(values: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 || values.is_empty() {
        return values.clone();
    }
    from_float_image(&gaussian_blur_f32(&to_float_image(values), sigma))
}

/// Edge-preserving bilateral filter over a circular window of `diameter`,
/// for unit-range float maps. `sigma_color` is in 8-bit intensity units.
///
/// `imageproc::filter::bilateral_filter` only takes `GrayImage`; quantizing
/// the normalized map before smoothing would band the low end of the ramp.
pub fn bilateral_filter(
    input: &Array2<f32>,
    diameter: usize,
    sigma_color: f32,
    sigma_space: f32,
) -> Array2<f32> {
    let (rows, cols) = input.dim();
    let radius = (diameter.max(1) / 2) as isize;

    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let mut offsets: Vec<(isize, isize, f32)> = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dx * dx + dy * dy) as f32;
            if d2 > (radius * radius) as f32 {
                continue;
            }
            offsets.push((dy, dx, (d2 * space_coeff).exp()));
        }
    }

    // Color weights tabulated on integer intensity steps, interpolated between.
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let color_lut: Vec<f32> = (0..=256)
        .map(|i| ((i * i) as f32 * color_coeff).exp())
        .collect();
    let color_weight = |diff: f32| -> f32 {
        let d = (diff.abs() * 255.0).min(255.999);
        let i = d as usize;
        let t = d - i as f32;
        color_lut[i] * (1.0 - t) + color_lut[i + 1] * t
    };

    let mut output = Array2::<f32>::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let center = input[[r, c]];
            let mut acc = 0.0f32;
            let mut norm = 0.0f32;
            for &(dy, dx, ws) in &offsets {
                let rr = r as isize + dy;
                let cc = c as isize + dx;
                if rr < 0 || cc < 0 || rr >= rows as isize || cc >= cols as isize {
                    continue;
                }
                let v = input[[rr as usize, cc as usize]];
                let w = ws * color_weight(v - center);
                acc += w * v;
                norm += w;
            }
            output[[r, c]] = if norm > 0.0 { acc / norm } else { center };
        }
    }
    output
}

/// Elliptical structuring element inscribed in a `size`×`size` box.
///
/// Sizes 1 and 2 are full squares (anchor at the bottom-right cell for 2);
/// size 3 is the 4-connected cross.
pub fn elliptical_mask(size: usize) -> Mask {
    let size = size.clamp(1, 255) as u32;
    let anchor = size / 2;
    let radius = anchor as f32;
    let element = GrayImage::from_fn(size, size, |x, y| {
        if size <= 2 {
            return Luma([255]);
        }
        let dx = x as f32 - radius;
        let dy = y as f32 - radius;
        Luma([if dx * dx + dy * dy <= radius * radius + 1e-3 { 255 } else { 0 }])
    });
    Mask::from_image(&element, anchor as u8, anchor as u8)
}

/// Morphological opening of a unit-range map on its 8-bit quantization.
///
/// Values are truncated to 1/255 steps, so the result never exceeds the
/// input pointwise and zeros stay zero.
pub fn open_unit(values: &Array2<f32>, mask: &Mask) -> Array2<f32> {
    let (rows, cols) = values.dim();
    let quantized = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let v = values[[y as usize, x as usize]].clamp(0.0, 1.0);
        Luma([(v * 255.0).floor() as u8])
    });
    let opened = grayscale_open(&quantized, mask);
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        opened.get_pixel(c as u32, r as u32)[0] as f32 / 255.0
    })
}

/// Percentile with linear interpolation between closest ranks.
/// `sorted` must be ascending and non-empty; `p` is in percent.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let t = rank - lo as f64;
    sorted[lo] * (1.0 - t) + sorted[hi] * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_float_image_roundtrip_keeps_layout() {
        let values = Array2::from_shape_fn((3, 5), |(r, c)| (r * 10 + c) as f32);
        let image = to_float_image(&values);
        assert_eq!(image.dimensions(), (5, 3));
        assert_eq!(image.get_pixel(4, 2)[0], 24.0);
        assert_eq!(from_float_image(&image), values);
    }

    #[test]
    fn test_sigma_for_kernel() {
        assert_relative_eq!(sigma_for_kernel(5), 1.1, epsilon = 1e-6);
        assert_relative_eq!(sigma_for_kernel(4), sigma_for_kernel(5));
    }

    #[test]
    fn test_gaussian_blur_preserves_constant() {
        let input = Array2::from_elem((16, 16), 0.4f32);
        let out = gaussian_blur(&input, 1.0);
        for v in out.iter() {
            assert_relative_eq!(*v, 0.4, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_gaussian_blur_spreads_impulse() {
        let mut input = Array2::<f32>::zeros((9, 9));
        input[[4, 4]] = 1.0;
        let out = gaussian_blur(&input, 1.0);
        assert!(out[[4, 4]] < 1.0);
        assert!(out[[4, 5]] > 0.0);
        assert_relative_eq!(out.sum(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_bilateral_keeps_step_edge() {
        let input = Array2::from_shape_fn((20, 20), |(_, c)| if c < 10 { 0.0 } else { 1.0 });
        let out = bilateral_filter(&input, 9, 20.0, 80.0);
        // Far from the step the value is untouched, at the step it stays sharp.
        assert_relative_eq!(out[[10, 2]], 0.0, epsilon = 1e-4);
        assert!(out[[10, 9]] < 0.05);
        assert!(out[[10, 10]] > 0.95);
    }

    #[test]
    fn test_elliptical_mask_shapes() {
        let cross = GrayImage::from_fn(3, 3, |x, y| Luma([if x == 1 || y == 1 { 255 } else { 0 }]));
        assert_eq!(elliptical_mask(3), Mask::from_image(&cross, 1, 1));
        let square = GrayImage::from_pixel(2, 2, Luma([255]));
        assert_eq!(elliptical_mask(2), Mask::from_image(&square, 1, 1));
    }

    #[test]
    fn test_open_unit_removes_isolated_pixel() {
        let mut input = Array2::<f32>::zeros((9, 9));
        input[[4, 4]] = 1.0;
        for r in 0..3 {
            for c in 5..8 {
                input[[r, c]] = 0.8;
            }
        }
        let out = open_unit(&input, &elliptical_mask(3));
        assert_eq!(out[[4, 4]], 0.0);
        // The 3x3 block contains the cross, so its center survives.
        assert_relative_eq!(out[[1, 6]], 0.8, epsilon = 2.0 / 255.0);
        for (o, i) in out.iter().zip(input.iter()) {
            assert!(o <= i);
        }
    }

    #[test]
    fn test_percentile_sorted() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(percentile_sorted(&v, 0.0), 1.0);
        assert_relative_eq!(percentile_sorted(&v, 50.0), 3.0);
        assert_relative_eq!(percentile_sorted(&v, 100.0), 5.0);
        assert_relative_eq!(percentile_sorted(&v, 12.5), 1.5);
    }
}
