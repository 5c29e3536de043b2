use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn fundus_cam(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fundus-cam"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute fundus-cam")
}

fn write_fundus(dir: &Path, name: &str) -> PathBuf {
    let mut img = RgbImage::from_pixel(320, 320, Rgb([3, 3, 3]));
    draw_filled_circle_mut(&mut img, (160, 160), 130, Rgb([180, 90, 40]));
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

fn write_grid(dir: &Path) -> PathBuf {
    let rows: Vec<Vec<f32>> = (0..12)
        .map(|r| {
            (0..12)
                .map(|c| if (4..7).contains(&r) && (5..8).contains(&c) { 1.0 } else { 0.0 })
                .collect()
        })
        .collect();
    let path = dir.join("grid.json");
    std::fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();
    path
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_version() {
    let output = fundus_cam(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(concat!("fundus-cam v", env!("CARGO_PKG_VERSION"))));
    assert!(stdout.contains("jet_medical"));
}

#[test]
fn test_render_writes_bundle_and_sidecar() {
    let temp = TempDir::new().unwrap();
    let image = write_fundus(temp.path(), "eye.png");
    let grid = write_grid(temp.path());
    let out = temp.path().join("out");

    let output = fundus_cam(&[
        "render",
        image.to_str().unwrap(),
        "--saliency",
        grid.to_str().unwrap(),
        "--palette",
        "jet_medical",
        "--size",
        "256",
        "--output-dir",
        out.to_str().unwrap(),
        "--metadata",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let overlay = image::open(out.join("eye.overlay.png")).unwrap();
    assert_eq!((overlay.width(), overlay.height()), (256, 256));
    let composite = image::open(out.join("eye.composite.png")).unwrap();
    assert_eq!((composite.width(), composite.height()), (256, 256));
    let legend = std::fs::read_to_string(out.join("eye.legend.svg")).unwrap();
    assert!(legend.contains("critical (red)"));

    let sidecar = std::fs::read_to_string(out.join("eye.fundus-cam.toml")).unwrap();
    assert!(sidecar.contains("[render.visualization]"), "{sidecar}");
    assert!(sidecar.contains(r#"palette = "jet_medical""#));
    assert!(sidecar.contains("eye.overlay.png"));
}

#[test]
fn test_render_refuses_to_overwrite_without_force() {
    let temp = TempDir::new().unwrap();
    let image = write_fundus(temp.path(), "eye.png");
    let grid = write_grid(temp.path());
    let args = [
        "render",
        image.to_str().unwrap(),
        "--saliency",
        grid.to_str().unwrap(),
        "--size",
        "128",
    ];

    assert!(fundus_cam(&args).status.success());
    assert!(temp.path().join("eye.overlay.png").exists());

    let second = fundus_cam(&args);
    assert!(!second.status.success());
    assert!(stderr(&second).contains("--force"));

    let mut forced = args.to_vec();
    forced.push("--force");
    assert!(fundus_cam(&forced).status.success());
}

#[test]
fn test_render_unknown_palette_fails() {
    let temp = TempDir::new().unwrap();
    let image = write_fundus(temp.path(), "eye.png");
    let grid = write_grid(temp.path());
    let output = fundus_cam(&[
        "render",
        image.to_str().unwrap(),
        "--saliency",
        grid.to_str().unwrap(),
        "--palette",
        "rainbow",
    ]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown palette 'rainbow'"));
    assert!(!temp.path().join("eye.overlay.png").exists());
}

#[test]
fn test_render_from_tensors() {
    let temp = TempDir::new().unwrap();
    let image = write_fundus(temp.path(), "eye.png");
    let (h, w, c) = (4usize, 4usize, 2usize);
    let activation: Vec<f32> = (0..h * w * c).map(|i| if i / c == 5 { 1.0 } else { 0.1 }).collect();
    let gradient = vec![0.5f32; h * w * c];
    let tensors = temp.path().join("pair.json");
    std::fs::write(
        &tensors,
        serde_json::json!({ "shape": [h, w, c], "activation": activation, "gradient": gradient })
            .to_string(),
    )
    .unwrap();

    let output = fundus_cam(&[
        "render",
        image.to_str().unwrap(),
        "--tensors",
        tensors.to_str().unwrap(),
        "--size",
        "128",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(temp.path().join("eye.composite.png").exists());
}

#[test]
fn test_detect_writes_region_metadata() {
    let temp = TempDir::new().unwrap();
    write_fundus(temp.path(), "a.png");
    write_fundus(temp.path(), "b.png");

    let output = fundus_cam(&["detect", temp.path().to_str().unwrap(), "--metadata"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    for stem in ["a", "b"] {
        let sidecar = std::fs::read_to_string(temp.path().join(format!("{stem}.fundus-cam.toml"))).unwrap();
        assert!(sidecar.contains("[detect.region]"), "{sidecar}");
        assert!(sidecar.contains("fallback = false"));
    }
}

#[test]
fn test_detect_missing_input_fails_in_strict_mode() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing.png");
    let output = fundus_cam(&["detect", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("does not exist"));
}
