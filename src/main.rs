use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use formcoach::capture::TestPatternSource;
use formcoach::error::EventBusError;
use formcoach::events::{EventBus, EventFilter};
use formcoach::records::confirm_save;
use formcoach::{
    export_record, CaptureTarget, FormcoachConfig, FormcoachError, FrameEncoder, KeyboardInputHandler,
    ReplayPlayer, ReplayRecorder, SessionConfig, SessionController, SessionReport, SourceMode,
    Target,
};

#[derive(Parser, Debug)]
#[command(name = "formcoach")]
#[command(about = "Stream exercise sessions to a pose-analysis service")]
#[command(version)]
#[command(long_about = "Samples frames from a camera or a recorded file, streams them to a \
pose-analysis service over WebSocket, and turns the returned status into repetition counts, \
per-repetition replays and spoken feedback cues.")]
struct Args {
    /// Exercise identifier, e.g. squat or plank
    #[arg(required_unless_present_any = ["print_config", "validate_config"])]
    exercise: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "formcoach.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Replay a recorded video file or image directory instead of the camera
    #[arg(short, long, value_name = "PATH", conflicts_with_all = ["device", "test_pattern"])]
    file: Option<PathBuf>,

    /// Camera device index (overrides capture.device_index)
    #[arg(long, value_name = "INDEX")]
    device: Option<u32>,

    /// Use a synthetic live source instead of a camera
    #[arg(long)]
    test_pattern: bool,

    /// Stop after this many repetitions
    #[arg(long, value_name = "N", conflicts_with = "seconds")]
    reps: Option<u32>,

    /// Stop after holding for this many seconds
    #[arg(long, value_name = "SECS")]
    seconds: Option<u32>,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write a daily rolling log file into this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting a session")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Save the session record without asking
    #[arg(long, conflicts_with = "no_save")]
    save: bool,

    /// Never save the session record
    #[arg(long)]
    no_save: bool,

    /// Write the frames of every sealed repetition as JPEG files into this directory
    #[arg(long, value_name = "DIR")]
    export_replay: Option<PathBuf>,

    /// Loop the recorded frames of repetition N after the session ends
    #[arg(long, value_name = "N")]
    replay: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting formcoach v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match FormcoachConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
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
    config.validate()?;

    let report = match run_session(&args, config.clone()).await {
        Ok(report) => report,
        Err(e) => {
            let pre_connect = e
                .downcast_ref::<FormcoachError>()
                .map(FormcoachError::is_pre_connect)
                .unwrap_or(false);
            if pre_connect {
                error!("Session not started: {}", e);
                eprintln!("✗ Session not started: {}", e);
                std::process::exit(2);
            }
            return Err(e);
        }
    };

    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_session(args: &Args, config: FormcoachConfig) -> Result<SessionReport> {
    let Some(exercise) = args.exercise.clone() else {
        bail!("An exercise identifier is required");
    };

    let mode = if args.file.is_some() {
        SourceMode::File
    } else {
        SourceMode::Live
    };
    let target = match (args.reps, args.seconds) {
        (Some(reps), _) => Some(Target::Repetitions(reps)),
        (None, Some(seconds)) => Some(Target::Duration(seconds)),
        (None, None) => None,
    };
    let session_config = SessionConfig::for_mode(exercise, mode, target, &config)?;

    let mut controller = SessionController::new(config.clone());
    if args.debug {
        controller = controller.with_event_bus(EventBus::with_debug_logging(
            config.system.event_bus_capacity,
        ));
    }
    let mut events = controller
        .event_bus()
        .subscribe_filtered(EventFilter::All, "cli");
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("{}", event.description()),
                Err(EventBusError::ChannelClosed) => break,
                Err(_) => continue,
            }
        }
    });

    let handle = if args.test_pattern {
        let source = TestPatternSource::new(FrameEncoder::from_config(&config.capture));
        controller.start(session_config, Box::new(source))?
    } else {
        let capture_target = match &args.file {
            Some(path) => CaptureTarget::Path(path.clone()),
            None => CaptureTarget::Device(args.device.unwrap_or(config.capture.device_index)),
        };
        controller.start_capture(session_config, &capture_target)?
    };
    info!("Session {} started", handle.session_id());

    let recorder = handle.recorder().clone();
    let stop = handle.stop_trigger();
    let keyboard = KeyboardInputHandler::new(handle.stop_trigger());
    let interactive = std::io::stdin().is_terminal();
    if interactive {
        keyboard.start().await?;
    }

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C - stopping session");
            stop.trigger();
        }
    });

    let outcome = handle.wait().await;
    ctrl_c.abort();
    if interactive {
        keyboard.stop().await?;
    }
    let report = outcome.context("Session failed before it was accepted by the service")?;

    println!("{}", report.summary());

    if should_save(args, &report, interactive).await {
        match confirm_save(controller.record_store().as_ref(), &report).await {
            Ok(true) => println!("✓ Session saved"),
            Ok(false) => warn!("Session has no record to save"),
            Err(e) => warn!("Failed to save session record: {}", e),
        }
    }

    if let Some(dir) = &args.export_replay {
        export_replays(&recorder, dir).await?;
    }

    if let Some(number) = args.replay {
        play_replay(&recorder, number, config.replay.playback_fps).await?;
    }

    Ok(report)
}

async fn should_save(args: &Args, report: &SessionReport, interactive: bool) -> bool {
    if args.no_save || report.record_id.is_none() {
        return false;
    }
    if args.save {
        return true;
    }
    if !interactive {
        return false;
    }

    print!("Save this session? [y/N] ");
    let answer = tokio::task::spawn_blocking(|| {
        use std::io::Write;
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await;

    matches!(answer, Ok(Ok(line)) if line.trim().eq_ignore_ascii_case("y"))
}

async fn export_replays(recorder: &ReplayRecorder, dir: &Path) -> Result<()> {
    let mut total = 0;
    for record in recorder.sealed() {
        total += export_record(&record, dir).await?.len();
    }
    println!("✓ Exported {} frames to {}", total, dir.display());
    Ok(())
}

/// Loop one repetition until Ctrl+C
async fn play_replay(recorder: &ReplayRecorder, number: u32, fps: u32) -> Result<()> {
    let Some(record) = recorder.record(number) else {
        bail!("No sealed repetition {}", number);
    };
    let frames = record.frame_count();
    if frames == 0 {
        bail!("Repetition {} has no recorded frames", number);
    }

    println!(
        "Replaying repetition {} ({} frames at {} fps), Ctrl+C to stop",
        number, frames, fps
    );
    let (tx, mut rx) = mpsc::channel(4);
    let player = ReplayPlayer::start(record, fps, tx);

    let mut shown = 0usize;
    loop {
        tokio::select! {
            sample = rx.recv() => {
                let Some(sample) = sample else { break };
                debug!("Replay frame at {:?}", sample.received_at);
                println!(
                    "rep {} frame {:>3}/{} {}",
                    number,
                    shown % frames + 1,
                    frames,
                    sample.pose_state.as_deref().unwrap_or("-")
                );
                shown += 1;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    player.stop().await;
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
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
        .unwrap_or_else(|_| EnvFilter::new(format!("formcoach={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "formcoach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
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
    println!("# formcoach configuration file");
    println!("# Every key is optional; values below are the defaults.");
    println!("# Environment overrides use FORMCOACH_<SECTION>__<KEY>, e.g.");
    println!("# FORMCOACH_SERVER__ENDPOINT=ws://analysis.local:5000/ws");
    println!("# Set announcer.player_command (e.g. \"mpg123 -q\") to play cues.");
    println!();

    let toml = toml::to_string_pretty(&FormcoachConfig::default())
        .context("Failed to serialize default configuration")?;
    println!("{}", toml);
    Ok(())
}
