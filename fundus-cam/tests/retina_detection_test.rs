use fundus_cam::retina_detection::{RetinaDetectorConfig, RetinaRegionDetector};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

fn drawn_circle(w: u32, h: u32, center: (i32, i32), radius: i32) -> RgbImage {
    let mut img = RgbImage::from_pixel(w, h, Rgb([4, 2, 2]));
    draw_filled_circle_mut(&mut img, center, radius, Rgb([190, 95, 45]));
    img
}

fn assert_found(img: &RgbImage, center: (i32, i32), radius: i32, center_tol: f32) {
    let region = RetinaRegionDetector::default().detect(img);
    assert!(!region.fallback, "fell back on {:?}", img.dimensions());

    let dx = region.center.0 as f32 - center.0 as f32;
    let dy = region.center.1 as f32 - center.1 as f32;
    let err = (dx * dx + dy * dy).sqrt();
    assert!(err <= center_tol, "center {:?}, expected {center:?}", region.center);

    let rel = (region.radius as f32 - radius as f32).abs() / radius as f32;
    assert!(rel <= 0.05, "radius {}, expected {radius}", region.radius);
    assert!(region.confidence > 0.5, "confidence {}", region.confidence);
    assert!(region.confidence <= 0.9);
}

#[test]
fn test_recovers_drawn_circle() {
    let img = drawn_circle(400, 400, (205, 195), 150);
    assert_found(&img, (205, 195), 150, 5.0);
}

#[test]
fn test_recovers_circle_on_wide_canvas() {
    // Typical camera framing: black bars left and right of the retina.
    let img = drawn_circle(480, 360, (240, 180), 160);
    assert_found(&img, (240, 180), 160, 5.0);
}

#[test]
fn test_large_input_detected_at_working_resolution() {
    let img = drawn_circle(1600, 1200, (800, 600), 520);
    // One working pixel is ~3 input pixels here.
    assert_found(&img, (800, 600), 520, 12.0);
}

#[test]
fn test_blank_canvas_uses_center_fallback() {
    let img = RgbImage::from_pixel(640, 480, Rgb([30, 30, 30]));
    let region = RetinaRegionDetector::default().detect(&img);
    assert!(region.fallback);
    assert_eq!(region.center, (320, 240));
    assert_eq!(region.radius, 192);
    assert!((region.confidence - 0.3).abs() < 1e-6);
}

#[test]
fn test_detected_radius_stays_in_range() {
    // Radius 60 on a 400px canvas is below the default 0.30 fraction.
    let img = drawn_circle(400, 400, (200, 200), 60);
    let region = RetinaRegionDetector::default().detect(&img);
    assert!(region.fallback || (region.radius as f32) >= 0.30 * 400.0 - 1.0);
}

#[test]
fn test_custom_radius_range() {
    let config = RetinaDetectorConfig {
        min_radius_frac: 0.10,
        max_radius_frac: 0.25,
        ..RetinaDetectorConfig::default()
    };
    let img = drawn_circle(400, 400, (200, 200), 70);
    let region = RetinaRegionDetector::new(config).detect(&img);
    assert!(!region.fallback);
    assert!((region.radius as f32 - 70.0).abs() <= 3.5, "radius {}", region.radius);
}
