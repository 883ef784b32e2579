use anyhow::{Context, Result};
use clap::Parser;
use proctorcam::controller::spawn_signal_handlers;
use proctorcam::media::synthetic::{SyntheticCamera, SyntheticScreen};
use proctorcam::upload::{MultipartBackend, PartStore};
use proctorcam::{
    EventFilter, ExamController, HttpMultipartClient, InMemoryBackend, KeyboardInputHandler,
    MediaCaptureAdapter, ProctorConfig, ProctorEvent, UploadOutcome,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Encoder output rate of the synthetic screen source (about 2 Mbit/s)
const SYNTHETIC_SCREEN_BYTES_PER_SECOND: usize = 256 * 1024;

#[derive(Parser, Debug)]
#[command(name = "proctorcam")]
#[command(about = "Timed exam screen recorder with resumable multipart upload")]
#[command(version)]
#[command(long_about = "Runs a timed exam session: previews the camera, records the screen, \
and when the exam ends ships the recording to object storage through a session-based \
multipart upload protocol.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "proctorcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Exam duration override
    #[arg(long, value_name = "SECONDS", help = "Override the exam duration in seconds")]
    duration: Option<u64>,

    /// Backend base address override
    #[arg(long, value_name = "URL", help = "Override the upload backend base address")]
    api_base_url: Option<String>,

    /// Opaque user identifier sent with the upload
    #[arg(long, value_name = "ID", help = "Override the user id sent to the backend")]
    user_id: Option<String>,

    /// Upload to an in-process backend instead of the network
    #[arg(long, help = "Use the in-memory multipart backend (no network)")]
    offline: bool,

    /// Enable keyboard controls
    #[arg(long, help = "Enable keyboard controls: 'e' ends the exam, 'q' or Esc quits")]
    keyboard: bool,

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
    #[arg(long, help = "Validate configuration file and exit without starting an exam")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting proctorcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = ProctorConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    apply_overrides(&mut config, &args);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let capture = MediaCaptureAdapter::new(
        Arc::new(SyntheticCamera::new(config.capture.camera_resolution)),
        Arc::new(SyntheticScreen::new(
            SYNTHETIC_SCREEN_BYTES_PER_SECOND,
            config.capture.capture_audio,
        )),
    );

    let (backend, store): (Arc<dyn MultipartBackend>, Arc<dyn PartStore>) = if args.offline {
        info!("Offline mode: uploading to the in-memory backend");
        let backend = Arc::new(InMemoryBackend::new());
        (backend.clone(), backend)
    } else {
        let client = Arc::new(HttpMultipartClient::new(
            &config.upload.api_base_url,
            config.upload.request_timeout(),
        )?);
        (client.clone(), client)
    };

    let controller = Arc::new(ExamController::new(config, capture, backend, store)?);

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());
    spawn_status_printer(&controller);

    let keyboard = if args.keyboard {
        let handler = KeyboardInputHandler::new(controller.event_bus());
        handler.start().await?;
        Some(handler)
    } else {
        None
    };

    let result = controller.run(shutdown).await;

    if let Some(handler) = keyboard {
        handler.stop().await?;
    }

    match result {
        Ok(Some(UploadOutcome::Completed(receipt))) => {
            info!(
                "Upload of {} bytes in {} parts completed",
                receipt.size_bytes, receipt.total_parts
            );
            println!("✓ Recording uploaded: {}", receipt.file_url);
            Ok(())
        }
        Ok(Some(UploadOutcome::NothingToUpload)) | Ok(None) => {
            println!("Nothing to upload");
            Ok(())
        }
        Err(e) => {
            error!("Exam session failed: {}", e);
            eprintln!("✗ {}", controller.status().snapshot().upload_status);
            std::process::exit(1);
        }
    }
}

fn apply_overrides(config: &mut ProctorConfig, args: &Args) {
    if let Some(duration) = args.duration {
        config.exam.duration_seconds = duration;
    }
    if let Some(api_base_url) = &args.api_base_url {
        config.upload.api_base_url = api_base_url.clone();
    }
    if let Some(user_id) = &args.user_id {
        config.upload.user_id = user_id.clone();
    }
}

/// Print the operator-facing subset of events on stdout
fn spawn_status_printer(controller: &ExamController) {
    let mut events = controller.event_bus().subscribe_filtered(
        EventFilter::EventTypes(vec![
            "exam_started",
            "exam_tick",
            "exam_ended",
            "device_alert",
            "upload_status_changed",
        ]),
        "status-printer",
    );

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ProctorEvent::ExamTick { remaining_seconds })
                    if remaining_seconds % 60 != 0 && remaining_seconds > 10 => {}
                Ok(event) => println!("{}", event.description()),
                Err(proctorcam::EventBusError::Lagged { skipped }) => {
                    warn!("Status printer skipped {} events", skipped);
                }
                Err(_) => break,
            }
        }
    });
}

fn init_logging(args: &Args) -> Result<()> {
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
        .unwrap_or_else(|_| EnvFilter::new(format!("proctorcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# proctorcam configuration file");
    println!("# Every option with its default value. Environment variables such as");
    println!("# PROCTORCAM_UPLOAD__API_BASE_URL override individual keys.");
    println!();
    println!("{}", toml::to_string_pretty(&ProctorConfig::default())?);
    Ok(())
}
