use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use ntv2src::device::sim::{SimulatedDevice, SimulatedDeviceManager};
use ntv2src::{
    supported_formats, EventBus, FlowError, LifecycleState, Ntv2SourceBuilder, Ntv2SrcConfig,
    PacketDecoder,
};

#[derive(Parser, Debug)]
#[command(name = "ntv2src")]
#[command(about = "Live capture source running against a simulated capture card")]
#[command(version)]
#[command(long_about = "Opens a capture channel, applies the configured video format, \
input, audio and reference settings, and pulls frames through the drop-oldest frame queue \
until the requested frame count is reached or Ctrl-C is pressed. Capture statistics are \
printed as JSON on exit.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ntv2src.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without capturing")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Stop after this many frames
    #[arg(long, value_name = "N", help = "Number of frames to capture before stopping")]
    frames: Option<u64>,

    /// List the video formats the device supports and exit
    #[arg(long, help = "List supported video formats and exit")]
    list_formats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let config = Ntv2SrcConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;

    let _log_guard = init_logging(&args, config.logging.file.as_deref())?;
    info!("Starting ntv2src v{}", env!("CARGO_PKG_VERSION"));

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
    config.validate()?;

    // The simulated card paces transfers at the nominal frame rate
    let format = config.source.video_format;
    let device = Arc::new(
        SimulatedDevice::with_default_capabilities()
            .with_frame_interval(Duration::from_nanos(format.info().frame_duration()))
            .with_signal(Some(format.hardware_format())),
    );

    if args.list_formats {
        for format in supported_formats(&*device) {
            println!("{:<14} {}", format.nick(), format.hardware_format());
        }
        return Ok(());
    }

    let manager = Arc::new(SimulatedDeviceManager::new());
    manager.register(Arc::clone(&device));

    let events = Arc::new(EventBus::new(config.system.event_bus_capacity));
    let source = Arc::new(
        Ntv2SourceBuilder::new()
            .settings(config.source.clone())
            .device_manager(manager)
            .event_bus(Arc::clone(&events))
            .decoder(Arc::new(PacketDecoder::new()))
            .build()?,
    );

    let mut rx = events.subscribe();
    let event_counter = tokio::spawn(async move {
        let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        loop {
            match rx.recv().await {
                Ok(event) => *counts.entry(event.event_type()).or_default() += 1,
                Err(RecvError::Lagged(missed)) => warn!("Event counter missed {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
        counts
    });

    source.set_state(LifecycleState::Playing).map_err(|e| {
        error!("Failed to start capture: {}", e);
        e
    })?;

    let limit = args.frames;
    let mut consumer = tokio::task::spawn_blocking({
        let source = Arc::clone(&source);
        move || {
            let mut delivered = 0u64;
            while limit.map_or(true, |limit| delivered < limit) {
                match source.next_frame() {
                    Ok(frame) => {
                        delivered += 1;
                        debug!(
                            "Frame {} at {} ns, timecode {}",
                            delivered,
                            frame.pts,
                            frame
                                .timecode
                                .map(|tc| tc.to_string())
                                .unwrap_or_else(|| "none".to_string())
                        );
                    }
                    Err(FlowError::Flushing) | Err(FlowError::NotNegotiated) => break,
                }
            }
            delivered
        }
    });

    let delivered = tokio::select! {
        joined = &mut consumer => joined?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Interrupted, stopping capture");
            source.unlock();
            consumer.await?
        }
    };

    source.set_state(LifecycleState::Closed)?;
    let stats = source.stats();
    drop(source);
    drop(events);
    let event_counts = event_counter.await?;

    let summary = json!({
        "frames_delivered": delivered,
        "stats": stats,
        "events": event_counts,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn init_logging(args: &Args, log_file: Option<&str>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("ntv2src={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(true)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log file path {} has no file name", path.display()))?;
            std::fs::create_dir_all(directory)?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# ntv2src configuration file");
    println!("# Every option with its default value; environment variables such as");
    println!("# NTV2SRC_SOURCE__QUEUE_SIZE override the file.");
    println!();

    let text = toml::to_string_pretty(&Ntv2SrcConfig::default())?;
    println!("{}", text);
    Ok(())
}
