//! Collect fundus images from the command line's mix of files, directories
//! and glob patterns.

use crate::color_utils::symbols;
use anyhow::{anyhow, Result};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

/// Fundus cameras export JPEG, PNG or TIFF; BMP shows up in public datasets.
const SUPPORTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

/// How strictly to treat inputs that cannot be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInputConfig {
    pub strict_mode: bool,
    pub require_glob_matches: bool,
}

impl ImageInputConfig {
    /// Strict fails on the first bad source; permissive warns and skips.
    pub fn from_strict_flag(strict: bool) -> Self {
        Self {
            strict_mode: strict,
            require_glob_matches: strict,
        }
    }
}

pub fn is_supported_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Supported images directly inside `dir_path`, sorted
pub fn find_images_in_directory(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn looks_like_glob(source: &str) -> bool {
    source.contains(['*', '?', '['])
}

/// Report a problem: an error in strict mode, a warning otherwise.
fn reject(config: &ImageInputConfig, message: String) -> Result<()> {
    if config.strict_mode {
        Err(anyhow!(message))
    } else {
        warn!("{}{message}", symbols::warning());
        Ok(())
    }
}

fn expand_glob(pattern: &str, config: &ImageInputConfig, out: &mut Vec<PathBuf>) -> Result<()> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(_) => {
            return reject(
                config,
                format!("Source path does not exist and is not a valid glob pattern: {pattern}"),
            )
        }
    };

    let before = out.len();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() && is_supported_image_file(&path) => out.push(path),
            Ok(_) => {}
            Err(e) => warn!("{}Error reading path in glob {pattern}: {e}", symbols::warning()),
        }
    }
    if out.len() == before && config.require_glob_matches {
        return Err(anyhow!("No fundus images found matching pattern: {pattern}"));
    }
    Ok(())
}

/// All images named by `sources`, sorted and deduplicated
pub fn collect_images_from_sources(
    sources: &[String],
    config: &ImageInputConfig,
) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for source in sources {
        let path = Path::new(source);
        if path.is_file() {
            if is_supported_image_file(path) {
                images.push(path.to_path_buf());
            } else {
                reject(
                    config,
                    format!("File is not a supported image format: {}", path.display()),
                )?;
            }
        } else if path.is_dir() {
            images.extend(find_images_in_directory(path)?);
        } else if looks_like_glob(source) {
            expand_glob(source, config, &mut images)?;
        } else {
            reject(config, format!("File does not exist: {source}"))?;
        }
    }

    images.sort();
    images.dedup();

    if images.is_empty() && config.strict_mode {
        return Err(anyhow!("No fundus images found in the specified sources"));
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_image_file(Path::new("eye.jpg")));
        assert!(is_supported_image_file(Path::new("eye.TIF")));
        assert!(is_supported_image_file(Path::new("eye.png")));
        assert!(!is_supported_image_file(Path::new("eye.json")));
        assert!(!is_supported_image_file(Path::new("eye")));
    }

    #[test]
    fn test_directory_and_dedup() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let sources = vec![
            dir.path().to_string_lossy().to_string(),
            dir.path().join("a.png").to_string_lossy().to_string(),
        ];
        let images =
            collect_images_from_sources(&sources, &ImageInputConfig::from_strict_flag(true))
                .unwrap();
        assert_eq!(images.len(), 2);
        assert!(images[0].ends_with("a.png"));
    }

    #[test]
    fn test_strict_rejects_missing_and_unsupported() {
        let dir = tempdir().unwrap();
        let text = dir.path().join("grid.json");
        fs::write(&text, b"[]").unwrap();
        let strict = ImageInputConfig::from_strict_flag(true);

        let missing = vec![dir.path().join("gone.png").to_string_lossy().to_string()];
        assert!(collect_images_from_sources(&missing, &strict).is_err());
        let unsupported = vec![text.to_string_lossy().to_string()];
        assert!(collect_images_from_sources(&unsupported, &strict).is_err());
    }

    #[test]
    fn test_permissive_skips_bad_sources() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("eye.png");
        fs::write(&image, b"x").unwrap();
        let sources = vec![
            image.to_string_lossy().to_string(),
            dir.path().join("gone.png").to_string_lossy().to_string(),
            dir.path().join("*.tiff").to_string_lossy().to_string(),
        ];
        let images =
            collect_images_from_sources(&sources, &ImageInputConfig::from_strict_flag(false))
                .unwrap();
        assert_eq!(images, vec![image]);
    }

    #[test]
    fn test_glob_without_matches_is_error_in_strict_mode() {
        let dir = tempdir().unwrap();
        let pattern = vec![dir.path().join("*.png").to_string_lossy().to_string()];
        assert!(
            collect_images_from_sources(&pattern, &ImageInputConfig::from_strict_flag(true))
                .is_err()
        );
    }
}
