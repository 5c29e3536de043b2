use clap::Parser;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};

mod cli;
mod color_utils;
mod commands;
mod image_input;
mod output_manager;
mod saliency_input;
mod sidecar;

use cli::{DetectCommand, DetectConfig, GlobalArgs, RenderCommand, RenderConfig, SaliencySource};
use color_utils::{colors, init_color_config, symbols};
use commands::{run_detect, run_render};
use fundus_cam::colormap::Palette;
use std::io::Write;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Detect the circular retina region in fundus images
    Detect(DetectCommand),

    /// Render a saliency visualization bundle for one fundus image
    Render(RenderCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "fundus-cam")]
#[command(about = "Grad-CAM++ saliency visualization for fundus images")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    // -q silences everything but errors
    if verbosity.is_silent() {
        return log::LevelFilter::Error;
    }
    match verbosity.log_level_filter() {
        log::LevelFilter::Off => log::LevelFilter::Off,     // -qq -> OFF
        log::LevelFilter::Error => log::LevelFilter::Warn,  // default -> WARN
        log::LevelFilter::Warn => log::LevelFilter::Info,   // -v -> INFO
        log::LevelFilter::Info => log::LevelFilter::Debug,  // -vv -> DEBUG
        log::LevelFilter::Debug | log::LevelFilter::Trace => log::LevelFilter::Trace,
    }
}

fn init_logging(global: &GlobalArgs) {
    // If user didn't pass -v/-q and RUST_LOG is set, honor the env var.
    let use_env = !global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(get_log_level_from_verbosity(global.verbosity.clone()));
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => colors::error_level("ERROR"),
                Level::Warn => colors::warning_level("WARN"),
                Level::Info => colors::info_level("INFO"),
                Level::Debug => colors::debug_level("DEBUG"),
                Level::Trace => colors::trace_level("TRACE"),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();
}

fn sources_desc(sources: &[String]) -> String {
    if sources.len() == 1 {
        sources[0].clone()
    } else {
        format!("{} inputs", sources.len())
    }
}

fn main() {
    let cli = Cli::parse();
    init_color_config(cli.global.no_color);
    init_logging(&cli.global);

    match &cli.command {
        Some(Commands::Detect(detect_cmd)) => {
            info!(
                "{} Retina detection: {} | radius: {:.2}-{:.2} of min side",
                symbols::detection_start(),
                sources_desc(&detect_cmd.sources),
                detect_cmd.min_radius_frac,
                detect_cmd.max_radius_frac
            );
            if cli.global.metadata {
                info!("   Outputs: metadata");
            }

            let config = match DetectConfig::from_args(cli.global.clone(), detect_cmd.clone()) {
                Ok(config) => config,
                Err(e) => {
                    error!("{} {e}", symbols::operation_failed());
                    std::process::exit(1);
                }
            };
            if let Err(e) = run_detect(config) {
                error!("{} Detection failed: {e:#}", symbols::operation_failed());
                std::process::exit(1);
            }
        }
        Some(Commands::Render(render_cmd)) => {
            let config = match RenderConfig::from_args(cli.global.clone(), render_cmd.clone()) {
                Ok(config) => config,
                Err(e) => {
                    error!("{} {e}", symbols::operation_failed());
                    std::process::exit(1);
                }
            };

            let source = match &config.source {
                SaliencySource::Grid(path) => format!("grid {}", path.display()),
                SaliencySource::Tensors(path) => format!("tensors {}", path.display()),
            };
            info!(
                "{} Render: {} | {} | palette: {} | smoothing: {} | size: {}",
                symbols::render_start(),
                render_cmd.image,
                source,
                config.visualization.palette,
                config.visualization.smoothing.name(),
                config.visualization.target_size
            );

            let mut outputs = vec!["overlay", "composite", "legend"];
            if cli.global.metadata {
                outputs.push("metadata");
            }
            info!("   Outputs: {}", outputs.join(", "));

            if let Err(e) = run_render(config) {
                error!("{} Rendering failed: {e:#}", symbols::operation_failed());
                std::process::exit(1);
            }
        }
        Some(Commands::Version) => {
            println!("fundus-cam v{}", env!("CARGO_PKG_VERSION"));
            let palettes: Vec<&str> = Palette::ALL.iter().map(|p| p.name()).collect();
            println!("Palettes: {}", palettes.join(", "));
        }
        None => {
            // Show help if no command specified
            use clap::CommandFactory;
            if let Err(e) = Cli::command().print_help() {
                error!("{e}");
            }
        }
    }
}
