// =============================================================================
// VUDO - Headless Vulkan compute experiment
// =============================================================================
//
// Renders a volumetric mandelbulb with one compute dispatch and reads the
// voxels back on the host.
//
// FLOW:
// 1. Load config.toml (+ command line overrides)
// 2. Set up Vulkan: device, buffer, descriptors, pipeline, command buffer
// 3. Submit once, wait on the fence
// 4. Map the buffer, report statistics, optionally dump the scalar channel
// 5. Tear everything down in reverse
//
// =============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use vudo::{Config, MandelbrotCompute};

#[derive(Parser, Debug)]
#[command(version, about = "Render a volumetric mandelbulb with one Vulkan compute dispatch")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Precompiled SPIR-V compute shader
    #[arg(short, long)]
    shader: Option<PathBuf>,

    /// Render a cube of this edge length instead of the configured volume
    #[arg(long)]
    size: Option<u32>,

    /// Write the scalar channel as raw f32 to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force validation layers on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,

    /// Force validation layers off
    #[arg(long)]
    no_validation: bool,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration, then let the command line win
    let mut config = Config::load_from_path(&cli.config)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    init_logging(&config)?;
    log::info!("Starting vudo");
    log::info!("{}", config_source(&cli.config));
    log::debug!("Config: {:?}", config);
    log::info!(
        "Volume: {}x{}x{}, workgroup {}, validation {}",
        config.volume.width,
        config.volume.height,
        config.volume.depth,
        config.volume.workgroup_size,
        if config.debug.validation_layers { "on" } else { "off" }
    );

    run(&config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(shader) = &cli.shader {
        config.shader.path = shader.clone();
    }
    if let Some(size) = cli.size {
        config.volume.width = size;
        config.volume.height = size;
        config.volume.depth = size;
    }
    if let Some(output) = &cli.output {
        config.output.raw_path = Some(output.clone());
    }
    if cli.validation {
        config.debug.validation_layers = true;
    }
    if cli.no_validation {
        config.debug.validation_layers = false;
    }
}

/// Where the configuration came from; logged once the logger exists
fn config_source(path: &Path) -> String {
    if path.exists() {
        format!("Loaded configuration from {:?}", path)
    } else {
        format!("Config file not found at {:?}, using defaults", path)
    }
}

/// Initialize logging, optionally redirected to the configured log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        let file = std::fs::File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {:?}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn run(config: &Config) -> Result<()> {
    // ─────────────────────────────────────────────────────────────────────────
    // SETUP
    // ─────────────────────────────────────────────────────────────────────────
    let setup_start = Instant::now();
    let mut compute = MandelbrotCompute::new(config)?;
    log::info!("Setup took {:?}", setup_start.elapsed());

    // ─────────────────────────────────────────────────────────────────────────
    // DISPATCH
    // ─────────────────────────────────────────────────────────────────────────
    let gpu_time = compute.run()?;
    log::info!("Dispatch took {:?}", gpu_time);

    // ─────────────────────────────────────────────────────────────────────────
    // READ BACK
    // ─────────────────────────────────────────────────────────────────────────
    let view = compute.rendered()?;
    let extent = view.extent();
    log::info!("Buffer size is {} bytes", compute.buffer_size());
    log::info!(
        "Pixel size in bytes: {}",
        compute.buffer_size() / extent.voxel_count()
    );
    log::info!("Shape: ({}, {}, {})", extent.width, extent.height, extent.depth);

    let stats_start = Instant::now();
    let stats = view.statistics();
    log::info!(
        "Scalar channel: min {} mean {:.6} max {} ({:?})",
        stats.min,
        stats.mean,
        stats.max,
        stats_start.elapsed()
    );

    if let Some(path) = &config.output.raw_path {
        view.write_scalar_raw(path)?;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // TEARDOWN
    // ─────────────────────────────────────────────────────────────────────────
    drop(compute);
    log::info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_override_makes_a_cube() {
        let cli = Cli::parse_from(["vudo", "--size", "32", "--no-validation"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(
            (config.volume.width, config.volume.height, config.volume.depth),
            (32, 32, 32)
        );
        assert!(!config.debug.validation_layers);
    }

    #[test]
    fn shader_and_output_overrides() {
        let cli = Cli::parse_from(["vudo", "-s", "a.spv", "-o", "out.raw"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.shader.path, PathBuf::from("a.spv"));
        assert_eq!(config.output.raw_path, Some(PathBuf::from("out.raw")));
    }

    #[test]
    fn config_source_reports_missing_file() {
        let message = config_source(Path::new("no/such/config.toml"));
        assert!(message.contains("using defaults"));
        assert!(message.contains("no/such/config.toml"));
    }

    #[test]
    fn config_source_reports_loaded_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let message = config_source(&path);
        assert!(message.starts_with("Loaded configuration from"));
    }

    #[test]
    fn validation_flags_conflict() {
        assert!(Cli::try_parse_from(["vudo", "--validation", "--no-validation"]).is_err());
    }
}
