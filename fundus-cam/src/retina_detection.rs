//! Circular retina region detection.
//!
//! Edge pixels of the smoothed fundus image cast votes along their gradient
//! direction at every radius in the allowed range. The fundus boundary is a
//! circle, so votes converge on its center. Each accumulator peak is given a
//! radius from the histogram of edge distances around it, then scored by how
//! central, how typically sized and how well supported the circle is.
//! Detection never fails: without a valid candidate the region falls back to
//! the image center with low confidence.

use crate::filters::FloatImage;
use image::{imageops, GrayImage, RgbImage};
use imageproc::distance_transform::Norm;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Circular region occupied by the retina, in pixel coordinates of the image
/// it was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetinaRegion {
    /// (x, y)
    pub center: (u32, u32),
    pub radius: u32,
    /// Detector agreement in [0, 1]; not a ground-truth probability.
    pub confidence: f32,
    /// True when no candidate circle was accepted.
    pub fallback: bool,
}

impl RetinaRegion {
    pub fn new(center: (u32, u32), radius: u32, confidence: f32) -> Self {
        Self {
            center,
            radius,
            confidence: confidence.clamp(0.0, 1.0),
            fallback: false,
        }
    }

    /// Image-center region used when detection finds nothing.
    pub fn fallback_for(width: u32, height: u32, config: &RetinaDetectorConfig) -> Self {
        let min_dim = width.min(height) as f32;
        Self {
            center: (width / 2, height / 2),
            radius: (config.fallback_radius_frac * min_dim).round() as u32,
            confidence: config.fallback_confidence,
            fallback: true,
        }
    }

    /// Map the region into an image scaled by `sx` horizontally and `sy`
    /// vertically. The radius follows the smaller factor.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            center: (
                (self.center.0 as f32 * sx).round() as u32,
                (self.center.1 as f32 * sy).round() as u32,
            ),
            radius: (self.radius as f32 * sx.min(sy)).round() as u32,
            confidence: self.confidence,
            fallback: self.fallback,
        }
    }
}

/// One circular-Hough pass: accumulator resolution divisor and minimum peak
/// votes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoughParams {
    pub dp: f32,
    pub min_votes: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetinaDetectorConfig {
    /// Allowed radius range as fractions of min(width, height).
    pub min_radius_frac: f32,
    pub max_radius_frac: f32,
    pub bilateral_diameter: usize,
    pub bilateral_sigma: f32,
    /// Canny low threshold is max(floor, scale * mean intensity).
    pub canny_low_scale: f32,
    pub canny_low_floor: f32,
    pub canny_high_scale: f32,
    pub canny_high_floor: f32,
    /// Closing radius for joining broken boundary segments.
    pub closing_radius: u8,
    pub hough_passes: Vec<HoughParams>,
    /// Minimum distance between accepted centers, as a fraction of min dimension.
    pub min_center_dist_frac: f32,
    pub center_weight: f32,
    pub size_weight: f32,
    pub vote_weight: f32,
    /// Inputs larger than this on their long side are downscaled first.
    pub working_size: u32,
    pub fallback_radius_frac: f32,
    pub fallback_confidence: f32,
}

impl Default for RetinaDetectorConfig {
    fn default() -> Self {
        Self {
            min_radius_frac: 0.30,
            max_radius_frac: 0.48,
            bilateral_diameter: 9,
            bilateral_sigma: 75.0,
            canny_low_scale: 0.5,
            canny_low_floor: 30.0,
            canny_high_scale: 1.0,
            canny_high_floor: 60.0,
            closing_radius: 1,
            hough_passes: vec![
                HoughParams {
                    dp: 1.2,
                    min_votes: 30.0,
                },
                HoughParams {
                    dp: 1.0,
                    min_votes: 35.0,
                },
                HoughParams {
                    dp: 1.5,
                    min_votes: 25.0,
                },
            ],
            min_center_dist_frac: 0.5,
            center_weight: 0.4,
            size_weight: 0.3,
            vote_weight: 0.3,
            working_size: 512,
            fallback_radius_frac: 0.4,
            fallback_confidence: 0.3,
        }
    }
}

/// A scored circle hypothesis, in working-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleCandidate {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Fraction of the circumference backed by edge pixels, clamped to [0, 1].
    pub support: f32,
    pub score: f32,
}

struct EdgePoint {
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, Default)]
pub struct RetinaRegionDetector {
    pub config: RetinaDetectorConfig,
}

impl RetinaRegionDetector {
    pub fn new(config: RetinaDetectorConfig) -> Self {
        Self { config }
    }

    /// Estimate the retina circle. Never fails; degraded results carry low
    /// confidence and `fallback = true`.
    pub fn detect(&self, image: &RgbImage) -> RetinaRegion {
        let start = std::time::Instant::now();
        let (width, height) = image.dimensions();
        let fallback = RetinaRegion::fallback_for(width, height, &self.config);
        if width < 16 || height < 16 {
            warn!("Image {width}x{height} too small for region detection; using center fallback");
            return fallback;
        }

        let mut gray = imageops::grayscale(image);
        let long_side = width.max(height);
        let scale = if long_side > self.config.working_size {
            self.config.working_size as f32 / long_side as f32
        } else {
            1.0
        };
        if scale < 1.0 {
            let w = ((width as f32 * scale).round() as u32).max(1);
            let h = ((height as f32 * scale).round() as u32).max(1);
            gray = imageops::resize(&gray, w, h, imageops::FilterType::Triangle);
        }

        let candidates = self.find_candidates(&gray);
        let best = candidates
            .iter()
            .copied()
            .max_by(|a, b| a.score.total_cmp(&b.score));

        let region = match best {
            Some(c) => {
                let inv = 1.0 / scale;
                let radius = (c.radius * inv).round() as u32;
                let cx = (c.x * inv).round().clamp(0.0, (width - 1) as f32) as u32;
                let cy = (c.y * inv).round().clamp(0.0, (height - 1) as f32) as u32;
                let confidence = (c.score * 1.2).min(0.9);
                RetinaRegion::new((cx, cy), radius, confidence)
            }
            None => {
                warn!("No retina circle candidate accepted; using center fallback");
                fallback
            }
        };

        debug!(
            "Retina region center=({}, {}) r={} conf={:.3} from {} candidates in {:.1}ms",
            region.center.0,
            region.center.1,
            region.radius,
            region.confidence,
            candidates.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        region
    }

    /// All scored candidates from every Hough pass, in working coordinates.
    pub fn find_candidates(&self, gray: &GrayImage) -> Vec<CircleCandidate> {
        let cfg = &self.config;
        let (w, h) = gray.dimensions();
        let min_dim = w.min(h) as f32;
        let r_min = cfg.min_radius_frac * min_dim;
        let r_max = cfg.max_radius_frac * min_dim;
        if r_max <= r_min || r_min < 1.0 {
            return Vec::new();
        }

        let smoothed = self.smooth(gray);
        let mean = smoothed.pixels().map(|p| p[0] as f64).sum::<f64>() / (w as f64 * h as f64);
        let low = cfg.canny_low_floor.max(cfg.canny_low_scale * mean as f32);
        let high = cfg.canny_high_floor.max(cfg.canny_high_scale * mean as f32);
        let edges = imageproc::edges::canny(&smoothed, low, high);
        let edges = imageproc::morphology::close(&edges, Norm::L1, cfg.closing_radius);

        let points = edge_points(&smoothed, &edges);
        debug!(
            "Canny thresholds ({low:.1}, {high:.1}) on mean {mean:.1}: {} edge points",
            points.len()
        );
        if points.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for pass in &cfg.hough_passes {
            for (x, y) in vote_centers(&points, w, h, r_min, r_max, pass, cfg.min_center_dist_frac * min_dim) {
                let Some((radius, support)) = fit_radius(&points, x, y, r_min, r_max) else {
                    continue;
                };
                // Must lie fully inside the image.
                if x - radius < 0.0 || y - radius < 0.0 || x + radius > w as f32 || y + radius > h as f32 {
                    continue;
                }
                let score = self.score(x, y, radius, support, w, h);
                candidates.push(CircleCandidate {
                    x,
                    y,
                    radius,
                    support,
                    score,
                });
            }
        }
        candidates
    }

    fn smooth(&self, gray: &GrayImage) -> GrayImage {
        if gray.width() == 0 || gray.height() == 0 {
            return gray.clone();
        }
        imageproc::filter::bilateral_filter(
            gray,
            self.config.bilateral_diameter as u32,
            self.config.bilateral_sigma,
            self.config.bilateral_sigma,
        )
    }

    /// Weighted score of a candidate: centrality, radius typicality, support.
    pub fn score(&self, x: f32, y: f32, radius: f32, support: f32, w: u32, h: u32) -> f32 {
        let cfg = &self.config;
        let min_dim = w.min(h) as f32;
        let dist = ((x - w as f32 / 2.0).powi(2) + (y - h as f32 / 2.0).powi(2)).sqrt();
        let center_score = (1.0 - dist / (0.3 * min_dim)).max(0.0);

        let r_min = cfg.min_radius_frac * min_dim;
        let r_max = cfg.max_radius_frac * min_dim;
        let mid = (r_min + r_max) / 2.0;
        let size_score = (1.0 - (radius - mid).abs() / (r_max - r_min)).clamp(0.0, 1.0);

        cfg.center_weight * center_score
            + cfg.size_weight * size_score
            + cfg.vote_weight * support.clamp(0.0, 1.0)
    }
}

fn edge_points(smoothed: &GrayImage, edges: &GrayImage) -> Vec<EdgePoint> {
    let gx = imageproc::gradients::horizontal_sobel(smoothed);
    let gy = imageproc::gradients::vertical_sobel(smoothed);
    let mut points = Vec::new();
    for (x, y, p) in edges.enumerate_pixels() {
        if p[0] == 0 {
            continue;
        }
        let dx = gx.get_pixel(x, y)[0] as f32;
        let dy = gy.get_pixel(x, y)[0] as f32;
        let mag = (dx * dx + dy * dy).sqrt();
        if mag < 1.0 {
            continue;
        }
        points.push(EdgePoint {
            x: x as f32,
            y: y as f32,
            dx: dx / mag,
            dy: dy / mag,
        });
    }
    points
}

#[inline]
fn bilinear_add_in_bounds(accum: &mut [f32], stride: usize, x: f32, y: f32, weight: f32) {
    let x0 = x as usize;
    let y0 = y as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let base = y0 * stride + x0;
    accum[base] += weight * (1.0 - fx) * (1.0 - fy);
    accum[base + 1] += weight * fx * (1.0 - fy);
    accum[base + stride] += weight * (1.0 - fx) * fy;
    accum[base + stride + 1] += weight * fx * fy;
}

/// Center hypotheses for one pass, strongest first, in image coordinates.
fn vote_centers(
    points: &[EdgePoint],
    w: u32,
    h: u32,
    r_min: f32,
    r_max: f32,
    pass: &HoughParams,
    min_dist: f32,
) -> Vec<(f32, f32)> {
    let dp = pass.dp.max(1.0);
    let aw = ((w as f32 / dp).ceil() as usize).max(3);
    let ah = ((h as f32 / dp).ceil() as usize).max(3);
    let x_limit = (aw - 1) as f32;
    let y_limit = (ah - 1) as f32;
    let mut accum = vec![0.0f32; aw * ah];

    for p in points {
        let mut r = r_min;
        while r <= r_max {
            for sign in [1.0f32, -1.0] {
                let vx = (p.x + sign * p.dx * r) / dp;
                let vy = (p.y + sign * p.dy * r) / dp;
                if vx >= 0.0 && vx < x_limit && vy >= 0.0 && vy < y_limit {
                    bilinear_add_in_bounds(&mut accum, aw, vx, vy, 1.0);
                }
            }
            r += 1.0;
        }
    }

    let Some(accum_img) = FloatImage::from_raw(aw as u32, ah as u32, accum)
    else {
        return Vec::new();
    };
    let smoothed = imageproc::filter::gaussian_blur_f32(&accum_img, 1.0);
    let data = smoothed.as_raw();
    let max_val = data.iter().cloned().fold(0.0f32, f32::max);
    if max_val < pass.min_votes {
        return Vec::new();
    }
    let floor = pass.min_votes.max(0.1 * max_val);

    let mut peaks: Vec<(usize, usize, f32)> = Vec::new();
    for y in 1..ah - 1 {
        for x in 1..aw - 1 {
            let v = data[y * aw + x];
            if v < floor {
                continue;
            }
            let mut is_max = true;
            'n: for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    let idx = ny * aw + nx;
                    if data[idx] > v || (data[idx] == v && idx < y * aw + x) {
                        is_max = false;
                        break 'n;
                    }
                }
            }
            if is_max {
                peaks.push((x, y, v));
            }
        }
    }
    peaks.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut centers: Vec<(f32, f32)> = Vec::new();
    for &(x, y, _) in &peaks {
        // Sub-cell refinement from the 3x3 neighborhood centroid.
        let (mut sx, mut sy, mut sw) = (0.0f32, 0.0f32, 0.0f32);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let v = data[ny * aw + nx];
                sx += v * nx as f32;
                sy += v * ny as f32;
                sw += v;
            }
        }
        let (cx, cy) = if sw > 0.0 {
            (sx / sw * dp, sy / sw * dp)
        } else {
            (x as f32 * dp, y as f32 * dp)
        };
        let far_enough = centers
            .iter()
            .all(|&(ax, ay)| ((ax - cx).powi(2) + (ay - cy).powi(2)).sqrt() >= min_dist);
        if far_enough {
            centers.push((cx, cy));
        }
        if centers.len() >= 5 {
            break;
        }
    }
    centers
}

/// Radius with the best edge support around `(cx, cy)` and that support as a
/// fraction of the circumference.
fn fit_radius(points: &[EdgePoint], cx: f32, cy: f32, r_min: f32, r_max: f32) -> Option<(f32, f32)> {
    let lo = r_min.floor() as usize;
    let hi = r_max.ceil() as usize;
    let mut hist = vec![0u32; hi - lo + 1];
    for p in points {
        let d = ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt();
        if d < r_min - 1.0 || d > r_max + 1.0 {
            continue;
        }
        let bin = (d.round() as usize).clamp(lo, hi) - lo;
        hist[bin] += 1;
    }

    let mut best: Option<(usize, f32)> = None;
    for i in 0..hist.len() {
        let window: u32 = hist[i.saturating_sub(1)..=(i + 1).min(hist.len() - 1)].iter().sum();
        let r = (lo + i) as f32;
        if r < r_min || r > r_max {
            continue;
        }
        let support = window as f32 / (2.0 * std::f32::consts::PI * r);
        if best.map_or(true, |(_, s)| support > s) {
            best = Some((i, support));
        }
    }
    let (i, support) = best?;
    if support <= 0.0 {
        return None;
    }

    let (mut sum, mut count) = (0.0f32, 0u32);
    for j in i.saturating_sub(1)..=(i + 1).min(hist.len() - 1) {
        sum += (lo + j) as f32 * hist[j] as f32;
        count += hist[j];
    }
    let radius = if count > 0 { sum / count as f32 } else { (lo + i) as f32 };
    Some((radius, support.min(1.0)))
}
