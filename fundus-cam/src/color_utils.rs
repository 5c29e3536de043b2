//! Color and styling utilities with support for NO_COLOR and TERM environment variables.
//!
//! Colored output is disabled by any of:
//! - `--no-color` CLI flag
//! - `NO_COLOR` environment variable (https://no-color.org/)
//! - `FUNDUS_CAM_NO_COLOR` environment variable
//! - `TERM=dumb`
//! - stderr not being a TTY

use colored::ColoredString;
use std::io::{stderr, IsTerminal};
use std::sync::OnceLock;

static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

fn should_disable_colors_from_env() -> bool {
    !std::env::var("NO_COLOR").unwrap_or_default().is_empty()
        || !std::env::var("FUNDUS_CAM_NO_COLOR")
            .unwrap_or_default()
            .is_empty()
        || std::env::var("TERM").unwrap_or_default() == "dumb"
        // Log messages go to stderr
        || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
}

impl ColorConfig {
    fn new(no_color_flag: bool) -> Self {
        Self {
            colors_enabled: !no_color_flag && !should_disable_colors_from_env(),
        }
    }
}

/// Initialize the color configuration with the CLI flag state.
/// Call once at startup, after parsing CLI arguments.
pub fn init_color_config(no_color_flag: bool) {
    if COLOR_CONFIG.set(ColorConfig::new(no_color_flag)).is_err() {
        log::debug!("Color configuration already initialized");
    }
}

fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.colors_enabled)
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

/// Apply color to a string only if colors are enabled for stderr output
pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

pub fn maybe_dim_stderr(text: &str) -> String {
    use colored::Colorize;
    maybe_color_stderr(text, |s| s.bright_black())
}

/// Semantic color functions for log levels
pub mod colors {
    use super::maybe_color_stderr;
    use colored::Colorize;

    pub fn error_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.red().bold())
    }

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    pub fn info_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.green())
    }

    pub fn debug_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.blue())
    }

    pub fn trace_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.magenta())
    }
}

/// Semantic symbols, with plain-text stand-ins when colors are off
pub mod symbols {
    use super::colors_enabled;

    fn pick(fancy: &'static str, plain: &'static str) -> &'static str {
        if colors_enabled() {
            fancy
        } else {
            plain
        }
    }

    /// Starting retina region detection
    pub fn detection_start() -> &'static str {
        pick("🔍", "[DETECT]")
    }

    /// Starting a visualization render
    pub fn render_start() -> &'static str {
        pick("🎨", "[RENDER]")
    }

    /// Region detection fell back to the image center
    pub fn fallback() -> &'static str {
        pick("↩️ ", "[FALLBACK]")
    }

    pub fn operation_failed() -> &'static str {
        pick("❌", "[FAILED]")
    }

    pub fn completed_successfully() -> &'static str {
        pick("✅", "[SUCCESS]")
    }

    /// Some inputs succeeded, some failed
    pub fn completed_partially_successfully() -> &'static str {
        pick("⚠️ ", "[PARTIAL-SUCCESS]")
    }

    pub fn warning() -> &'static str {
        pick("⚠️ ", "")
    }
}

/// Progress bar utilities that respect TTY state
pub mod progress {
    use super::colors_enabled;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::{stderr, IsTerminal};

    /// Progress bar for batch processing; `None` for single items or a
    /// non-interactive stderr.
    pub fn create_batch_progress_bar(total: usize) -> Option<ProgressBar> {
        if total <= 1 || !stderr().is_terminal() {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        let style = if colors_enabled() {
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:30.green/black}] ({percent}%) {msg}")
                .map(|s| s.progress_chars("█▓▒░"))
        } else {
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:30}] ({percent}%) {msg}")
                .map(|s| s.progress_chars("#> "))
        };
        pb.set_style(style.unwrap_or_else(|_| ProgressStyle::default_bar()));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Some(pb)
    }
}
