//! Output path management for the developer binary.
//!
//! Every input `<stem>.<ext>` maps to a fixed set of artifacts, placed next to
//! the input or in `--output-dir`:
//! - `<stem>.overlay.png`: transparent colorized overlay
//! - `<stem>.composite.png`: overlay flattened onto the fundus image
//! - `<stem>.legend.svg`: colorbar
//! - `<stem>.fundus-cam.toml`: sidecar metadata (with `--metadata`)

use crate::cli::BaseConfig;
use crate::sidecar::{
    get_metadata_path, load_or_create_metadata, save_metadata, DetectSections, RenderSections,
};
use anyhow::{bail, Context, Result};
use fundus_cam::export::VisualizationBundle;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct OutputManager<'a> {
    base: &'a BaseConfig,
    input_path: &'a Path,
}

impl<'a> OutputManager<'a> {
    pub fn new(base: &'a BaseConfig, input_path: &'a Path) -> Self {
        Self { base, input_path }
    }

    fn input_stem(&self) -> &str {
        self.input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
    }

    fn output_dir(&self) -> Result<PathBuf> {
        match &self.base.output_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create output directory {dir}"))?;
                Ok(PathBuf::from(dir))
            }
            None => Ok(self
                .input_path
                .parent()
                .unwrap_or(Path::new("."))
                .to_path_buf()),
        }
    }

    /// `<stem>.<kind>.<extension>` in the output directory
    pub fn artifact_path(&self, kind: &str, extension: &str) -> Result<PathBuf> {
        Ok(self
            .output_dir()?
            .join(format!("{}.{kind}.{extension}", self.input_stem())))
    }

    pub fn metadata_path(&self) -> Result<PathBuf> {
        Ok(get_metadata_path(
            self.input_path,
            self.base.output_dir.as_deref(),
        )?)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if path.exists() && !self.base.force {
            bail!(
                "Refusing to overwrite {} (pass --force to replace it)",
                path.display()
            );
        }
        std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Write the three bundle artifacts; returns artifact name -> path.
    pub fn write_bundle(&self, bundle: &VisualizationBundle) -> Result<HashMap<String, PathBuf>> {
        let artifacts: [(&str, &str, &[u8]); 3] = [
            ("overlay", "png", &bundle.overlay_png),
            ("composite", "png", &bundle.composite_png),
            ("legend", "svg", bundle.legend_svg.as_bytes()),
        ];

        let mut written = HashMap::new();
        for (kind, extension, bytes) in artifacts {
            let path = self.artifact_path(kind, extension)?;
            self.write(&path, bytes)?;
            debug!("Wrote {kind} to {}", path.display());
            written.insert(kind.to_string(), path);
        }
        Ok(written)
    }

    /// Path as recorded in the sidecar: relative to the sidecar when possible
    pub fn make_relative_to_metadata(&self, path: &Path) -> Result<String> {
        if self.base.skip_metadata {
            return Ok(path.to_string_lossy().to_string());
        }
        Ok(make_path_relative_to_toml(path, &self.metadata_path()?))
    }

    /// Merge the given sections into the sidecar, keeping the other command's
    /// section intact.
    pub fn save_sections(
        &self,
        detect: Option<DetectSections>,
        render: Option<RenderSections>,
    ) -> Result<()> {
        if self.base.skip_metadata {
            return Ok(());
        }

        let metadata_path = self.metadata_path()?;
        let mut metadata = load_or_create_metadata(&metadata_path)?;
        if let Some(detect) = detect {
            metadata.detect = Some(detect);
        }
        if let Some(render) = render {
            metadata.render = Some(render);
        }
        save_metadata(&metadata, &metadata_path)?;

        debug!("📋 Saved metadata to: {}", metadata_path.display());
        Ok(())
    }
}

pub fn make_path_relative_to_toml(file_path: &Path, toml_path: &Path) -> String {
    toml_path
        .parent()
        .and_then(|dir| file_path.strip_prefix(dir).ok())
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|| file_path.to_string_lossy().to_string())
}
