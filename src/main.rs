use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use pendant::app;
use pendant::audio::{AudioSource, SilenceSource, WavFileSource};
use pendant::cli::{Cli, Commands};
use pendant::clock::{ManualClock, SystemClock};
use pendant::config::Config;
use pendant::events::{self, RecorderEvent};
use pendant::led::TerminalLed;
use pendant::vad::Vad;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let command = cli.command.take();

    match command {
        None => {
            run_recorder(&cli).await?;
        }
        Some(Commands::Check) => {
            check_setup(&cli)?;
        }
        Some(Commands::Pending) => {
            list_pending(&cli)?;
        }
        Some(Commands::Sync) => {
            sync_now(&cli)?;
        }
        Some(Commands::Calibrate { input }) => {
            calibrate(&cli, &input)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "pendant", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration and fold in command-line overrides.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/pendant/config.toml)
/// 3. Built-in defaults
///
/// Environment variables override the file, CLI flags override both.
fn load_config(cli: &Cli) -> Result<Config> {
    let config = if let Some(path) = cli.config.as_deref() {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())
    };

    let mut config = config.with_env_overrides();
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.upload.endpoint = endpoint.clone();
    }
    if let Some(id) = &cli.device_id {
        config.upload.device_id = id.clone();
    }
    if let Some(ms) = cli.silence_timeout {
        config.recording.silence_timeout_ms = ms;
    }
    if let Some(ms) = cli.max_duration {
        config.recording.max_duration_ms = ms;
    }
    Ok(config)
}

/// Run the recorder loop until SIGINT or SIGTERM.
async fn run_recorder(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    if cli.replay {
        if let Some(input) = &cli.input {
            return replay_capture(&config, input, cli);
        }
    }

    let audio: Box<dyn AudioSource> = match &cli.input {
        Some(path) => Box::new(WavFileSource::from_path(path, config.audio.sample_rate)?),
        None => Box::new(SilenceSource::new()),
    };

    let (tx, rx) = events::channel(1024);
    let recorder = app::build_recorder(&config, Arc::new(SystemClock), audio)?.with_events(tx);
    let recorder = if cli.quiet {
        recorder
    } else {
        recorder.with_led(Box::new(TerminalLed::new()))
    };

    if !cli.quiet {
        eprintln!(
            "pendant {} listening, data under {}",
            pendant::version_string(),
            config.storage.data_dir.display()
        );
    }

    let quiet = cli.quiet;
    let verbose = cli.verbose;
    let printer = std::thread::spawn(move || {
        for event in rx.iter() {
            render_event(&event, quiet, verbose);
        }
    });

    let handle = app::spawn(recorder);
    wait_for_shutdown(cli.quiet).await;
    handle.stop();
    let _ = printer.join();

    Ok(())
}

async fn wait_for_shutdown(quiet: bool) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !quiet {
                eprintln!("\nReceived SIGINT, shutting down...");
            }
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                eprintln!("Error setting up signal handler: {}", e);
            }
            if !quiet {
                eprintln!("\nReceived SIGTERM, shutting down...");
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await
}

/// Feed a WAV file through the recorder on a manual clock and report what
/// it would have captured.
fn replay_capture(config: &Config, input: &Path, cli: &Cli) -> Result<()> {
    let source = WavFileSource::from_path(input, config.audio.sample_rate)?;
    let total = source.len_samples();

    let clock = ManualClock::starting_at(std::time::SystemTime::now());
    let (tx, rx) = events::channel(4096);
    let mut recorder =
        app::build_recorder(config, Arc::new(clock.clone()), Box::new(source))?.with_events(tx);

    let counters = app::replay(&mut recorder, &clock, total);

    for event in rx.try_iter() {
        render_event(&event, cli.quiet, cli.verbose);
    }

    if !cli.quiet {
        eprintln!(
            "replayed {} samples over {} ticks: {} recording(s), {} uploaded, {} failed",
            total,
            counters.ticks,
            counters.recordings_finished,
            counters.uploads_succeeded,
            counters.uploads_failed
        );
    }
    Ok(())
}

/// Validate the configuration and probe the upload endpoint.
fn check_setup(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate()?;

    println!("configuration ok");
    println!("  endpoint   {}", config.upload.endpoint);
    println!("  device id  {}", config.upload.device_id);
    println!("  data dir   {}", config.storage.data_dir.display());

    #[cfg(feature = "http")]
    {
        use pendant::net::HttpNetwork;
        use pendant::upload::NetworkClient;

        let net = HttpNetwork::new(&config.upload)?;
        if net.is_connected() {
            println!("  endpoint   {}", "reachable".green());
        } else {
            println!("  endpoint   {}", "not reachable".red());
            std::process::exit(1);
        }
    }

    Ok(())
}

fn list_pending(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let pending = app::pending_recordings(&config)?;

    if pending.is_empty() {
        println!("nothing pending");
        return Ok(());
    }

    for (path, size) in &pending {
        println!("{:>10}  {}", format_size(*size), path.display());
    }
    println!("{} file(s) waiting", pending.len());
    Ok(())
}

/// Drain the pending queue once and exit.
fn sync_now(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    let (tx, rx) = events::channel(1024);
    let report = app::sync_once(&config, &tx)?;

    for event in rx.try_iter() {
        render_event(&event, cli.quiet, cli.verbose);
    }

    if report.aborted {
        eprintln!("sync aborted, connectivity lost");
        std::process::exit(1);
    }
    println!("{} uploaded, {} failed", report.uploaded, report.failed);
    Ok(())
}

/// Measure the noise floor of a WAV file with the configured analysis
/// parameters. Useful for picking a sensitivity before deploying.
fn calibrate(cli: &Cli, input: &Path) -> Result<()> {
    let config = load_config(cli)?;
    let frame_samples = config.audio.frame_samples.max(1);

    let mut source = WavFileSource::from_path(input, config.audio.sample_rate)?;
    let frames = source.len_samples() / frame_samples;
    if frames == 0 {
        eprintln!(
            "Error: {} is shorter than one analysis frame ({} samples)",
            input.display(),
            frame_samples
        );
        std::process::exit(1);
    }

    let mut vad_config = config.vad.clone();
    vad_config.calibration_frames = u32::try_from(frames).unwrap_or(u32::MAX);
    let mut vad = Vad::new(vad_config);
    vad.calibrate(&mut source, frame_samples);

    println!(
        "noise floor {:.1} (voice threshold {:.1})",
        vad.noise_floor(),
        vad.effective_threshold()
    );
    Ok(())
}

fn render_event(event: &RecorderEvent, quiet: bool, verbose: u8) {
    if verbose >= 1 {
        if let Ok(json) = event.to_json() {
            println!("{}", json);
        }
        return;
    }
    if quiet {
        return;
    }

    match event {
        RecorderEvent::Calibrated { noise_floor } => {
            eprintln!("calibrated, noise floor {:.1}", noise_floor);
        }
        RecorderEvent::RecordingStarted { path } => {
            eprintln!("{} {}", "recording".red(), path);
        }
        RecorderEvent::RecordingFinished {
            path,
            duration_ms,
            samples,
        } => {
            eprintln!(
                "{} {} ({} samples, {:.1}s)",
                "finished".green(),
                path,
                samples,
                *duration_ms as f64 / 1000.0
            );
        }
        RecorderEvent::RecordingRefused { battery_percent } => {
            eprintln!(
                "{} recording, battery at {:.0}%",
                "refused".yellow(),
                battery_percent
            );
        }
        RecorderEvent::UploadSucceeded { path, status } => {
            eprintln!("{} {} (status {})", "uploaded".green(), path, status);
        }
        RecorderEvent::UploadFailed {
            path,
            attempts,
            detail,
        } => {
            eprintln!(
                "{} {} (attempt {}): {}",
                "upload failed".red(),
                path,
                attempts,
                detail
            );
        }
        RecorderEvent::UploadAbandoned { path, attempts } => {
            eprintln!(
                "{} {} after {} attempts",
                "abandoned".red().bold(),
                path,
                attempts
            );
        }
        RecorderEvent::UploadInconsistent { path, message } => {
            eprintln!("{} {}: {}", "inconsistent".red().bold(), path, message);
        }
        RecorderEvent::ConnectivityChanged { connected } => {
            if *connected {
                eprintln!("{}", "network reachable".dimmed());
            } else {
                eprintln!("{}", "network lost".dimmed());
            }
        }
        RecorderEvent::MaintenanceCompleted {
            removed,
            freed_bytes,
        } => {
            eprintln!("maintenance removed {} file(s), freed {} bytes", removed, freed_bytes);
        }
        RecorderEvent::FaultRaised { fault, errors } => {
            eprintln!("{} {} (error #{})", "fault".red().bold(), fault, errors);
        }
        RecorderEvent::RecoveryHalted { errors } => {
            eprintln!(
                "{} after {} errors, restart required",
                "recovery halted".red().bold(),
                errors
            );
        }
        RecorderEvent::BatteryLow { percent } => {
            eprintln!("{} {:.0}%", "battery low".yellow(), percent);
        }
        RecorderEvent::StateChanged { .. } => {}
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
