use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stillcam::platform::sim::SimCamera;
use stillcam::platform::{AeState, AfState, FrameMetadata, PendingImage};
use stillcam::{CameraController, ImageJob, StillcamConfig};
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "stillcam")]
#[command(about = "Still camera capture-control core driven against a simulated camera")]
#[command(version)]
#[command(long_about = "Opens a simulated camera, configures a preview session and takes \
still pictures through the auto-focus / auto-exposure capture sequence, logging every \
delivered image. Useful for exercising configuration and logging without hardware.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stillcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without opening the camera")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Number of pictures to take
    #[arg(long, default_value_t = 3, help = "Number of still pictures to take")]
    shots: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Upper bound on waiting for the background context to drain.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting stillcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match StillcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    run(config, args.shots)
}

fn run(config: StillcamConfig, shots: u32) -> Result<()> {
    let sim = SimCamera::default_rig();

    let handler = |image: PendingImage| -> ImageJob {
        Box::new(move || {
            info!(
                "Delivered {} image: {} ({} bytes)",
                image.format().as_str(),
                image.size(),
                image.data().len()
            );
            image.close();
            Ok(())
        })
    };

    let controller = CameraController::new(Arc::new(sim.clone()), config, Arc::new(handler))
        .map_err(|e| {
            error!("Failed to create camera controller: {}", e);
            e
        })?;
    controller.set_focus_listener(Some(Arc::new(|state: AfState| {
        debug!("Focus state changed to {:?}", state);
    })));

    info!(
        "Selected camera {} (still size {})",
        controller.camera_id(),
        controller.capture_size()?
    );

    controller.open()?;
    settle(&controller)?;
    if !controller.is_open() {
        bail!("Camera {} did not open", controller.camera_id());
    }

    controller.start(sim.new_render_target())?;
    settle(&controller)?;

    let frames = AtomicU64::new(0);
    let emit = |af: Option<AfState>, ae: Option<AeState>| -> Result<()> {
        let frame_number = frames.fetch_add(1, Ordering::Relaxed) + 1;
        sim.emit_frame(FrameMetadata::new(af, ae).with_frame_number(frame_number));
        settle(&controller)
    };

    for shot in 1..=shots {
        emit(Some(AfState::PassiveScan), None)?;
        emit(Some(AfState::PassiveFocused), Some(AeState::Converged))?;

        controller.take_picture()?;
        settle(&controller)?;

        // Even shots go through pre-capture metering.
        if shot % 2 == 0 {
            emit(Some(AfState::FocusedLocked), Some(AeState::Precapture))?;
            emit(Some(AfState::FocusedLocked), Some(AeState::Converged))?;
        }
        emit(Some(AfState::FocusedLocked), Some(AeState::Converged))?;

        info!("Shot {}/{} finished in state {}", shot, shots, controller.capture_state());
        controller.resume_preview()?;
    }

    let stats = controller.stats();
    info!(
        "Capture statistics: {} shots, {} stills, {} images delivered, {} job failures",
        stats.shots_requested, stats.stills_captured, stats.images_delivered, stats.jobs_failed
    );
    println!(
        "✓ Took {} picture(s), {} image(s) delivered",
        stats.stills_captured, stats.images_delivered
    );

    controller.close();
    Ok(())
}

fn settle(controller: &CameraController) -> Result<()> {
    if !controller.wait_idle(SETTLE_TIMEOUT) {
        bail!("Camera callbacks did not settle within {:?}", SETTLE_TIMEOUT);
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stillcam={}", log_level)));

    // Camera callbacks all run on the worker thread, so its name is always
    // worth printing.
    let fmt_layer = match args.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print the default configuration as a ready-to-edit `stillcam.toml`.
fn print_default_config() -> Result<()> {
    let defaults = toml::to_string_pretty(&StillcamConfig::default())?;
    print!(
        "# stillcam defaults; override any key with STILLCAM_<SECTION>__<KEY>\n\n{}",
        defaults
    );
    Ok(())
}
