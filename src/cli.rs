//! Command-line interface for pendant
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Voice-activated recorder with background upload
#[derive(Parser, Debug)]
#[command(
    name = "pendant",
    version,
    about = "Voice-activated recorder with background upload"
)]
pub struct Cli {
    /// Subcommand to execute; without one the recorder loop runs
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress event output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: every event as JSON)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// WAV file to feed the recorder instead of live silence
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Replay the input in simulated time and exit when it runs dry
    #[arg(long, requires = "input")]
    pub replay: bool,

    /// Directory recordings are stored under
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Upload endpoint override
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Device identifier sent with uploads
    #[arg(long, value_name = "ID")]
    pub device_id: Option<String>,

    /// Silence that ends a recording (bare number = ms). Examples: 3s, 1500
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_ms)]
    pub silence_timeout: Option<u64>,

    /// Hard cap on one recording (bare number = ms). Examples: 5m, 90s
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_ms)]
    pub max_duration: Option<u64>,
}

/// Parse a duration string into milliseconds.
///
/// Supports any format accepted by `humantime`: single-unit (`30s`,
/// `5m`, `2h`) and compound (`1h30m`, `2m30s`). A bare number is taken
/// as milliseconds.
fn parse_duration_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and probe the upload endpoint
    Check,

    /// List recordings waiting for upload
    Pending,

    /// Upload pending recordings now
    Sync,

    /// Measure the ambient noise level of a WAV file
    Calibrate {
        /// WAV file with ambient room audio
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["pendant"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
        assert!(cli.input.is_none());
        assert!(!cli.replay);
        assert!(cli.data_dir.is_none());
        assert!(cli.endpoint.is_none());
        assert!(cli.device_id.is_none());
        assert!(cli.silence_timeout.is_none());
        assert!(cli.max_duration.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_verbose_single() {
        let cli = Cli::try_parse_from(["pendant", "-v"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_parse_verbose_repeated_flags() {
        let cli = Cli::try_parse_from(["pendant", "-v", "-v"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_run_options() {
        let cli = Cli::try_parse_from([
            "pendant",
            "--input",
            "capture.wav",
            "--data-dir",
            "/var/lib/pendant",
            "--endpoint",
            "https://collector.example/ingest",
            "--device-id",
            "pendant-042",
        ])
        .unwrap();

        assert_eq!(cli.input, Some(PathBuf::from("capture.wav")));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/var/lib/pendant")));
        assert_eq!(
            cli.endpoint.as_deref(),
            Some("https://collector.example/ingest")
        );
        assert_eq!(cli.device_id.as_deref(), Some("pendant-042"));
    }

    #[test]
    fn test_replay_requires_input() {
        assert!(Cli::try_parse_from(["pendant", "--replay"]).is_err());
        assert!(Cli::try_parse_from(["pendant", "--replay", "--input", "a.wav"]).is_ok());
    }

    #[test]
    fn test_parse_durations() {
        let cli = Cli::try_parse_from([
            "pendant",
            "--silence-timeout",
            "3s",
            "--max-duration",
            "5m",
        ])
        .unwrap();

        assert_eq!(cli.silence_timeout, Some(3_000));
        assert_eq!(cli.max_duration, Some(300_000));
    }

    #[test]
    fn test_parse_bare_number_is_milliseconds() {
        let cli = Cli::try_parse_from(["pendant", "--silence-timeout", "1500"]).unwrap();
        assert_eq!(cli.silence_timeout, Some(1_500));
    }

    #[test]
    fn test_parse_compound_duration() {
        assert_eq!(parse_duration_ms("1m30s"), Ok(90_000));
    }

    #[test]
    fn test_parse_invalid_duration_fails() {
        assert!(parse_duration_ms("soon").is_err());
        assert!(Cli::try_parse_from(["pendant", "--max-duration", "soon"]).is_err());
    }

    #[test]
    fn test_parse_check_command() {
        let cli = Cli::try_parse_from(["pendant", "check"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check)));
    }

    #[test]
    fn test_parse_pending_command() {
        let cli = Cli::try_parse_from(["pendant", "pending"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Pending)));
    }

    #[test]
    fn test_parse_sync_command() {
        let cli = Cli::try_parse_from(["pendant", "sync"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Sync)));
    }

    #[test]
    fn test_parse_calibrate_command() {
        let cli = Cli::try_parse_from(["pendant", "calibrate", "room.wav"]).unwrap();
        match cli.command {
            Some(Commands::Calibrate { input }) => {
                assert_eq!(input, PathBuf::from("room.wav"));
            }
            other => panic!("expected calibrate, got {:?}", other),
        }
    }

    #[test]
    fn test_calibrate_requires_a_file() {
        assert!(Cli::try_parse_from(["pendant", "calibrate"]).is_err());
    }

    #[test]
    fn test_parse_completions_command() {
        let cli = Cli::try_parse_from(["pendant", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }

    #[test]
    fn test_global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from(["pendant", "sync", "--quiet"]).unwrap();
        assert!(cli.quiet);
        assert!(matches!(cli.command, Some(Commands::Sync)));
    }

    #[test]
    fn test_config_flag_with_subcommand() {
        let cli =
            Cli::try_parse_from(["pendant", "check", "--config", "/etc/pendant.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/pendant.toml")));
    }
}
