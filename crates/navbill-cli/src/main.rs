//! navbill - drive navigation billing sessions from the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use navbill_core::backend::RecordingBackend;
use navbill_core::{BillingConfig, BillingContext, BillingEvent, SessionType};

#[derive(Parser)]
#[command(name = "navbill")]
#[command(version, about = "Drive navigation billing sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/navbill/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-process backend instead of the billing service
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a billing session script and print every billing event as JSON
    Drive {
        /// free-drive or active-guidance
        #[arg(long, default_value = "free-drive")]
        session_type: SessionType,

        /// Pause this many seconds after beginning
        #[arg(long)]
        pause_after: Option<u64>,

        /// Resume this many seconds after pausing (or beginning)
        #[arg(long)]
        resume_after: Option<u64>,

        /// Stop this many seconds after the previous step
        #[arg(long, default_value_t = 1)]
        stop_after: u64,

        /// Wait this long for backend completions before exiting
        #[arg(long, default_value_t = 250)]
        settle_ms: u64,
    },

    /// Print the resolved configuration
    Config,
}

struct DriveScript {
    session_type: SessionType,
    pause_after: Option<Duration>,
    resume_after: Option<Duration>,
    stop_after: Duration,
    settle: Duration,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = BillingConfig::resolve(cli.config.as_deref()).context("loading config")?;

    match cli.command {
        Commands::Config => print_config(&config),
        Commands::Drive {
            session_type,
            pause_after,
            resume_after,
            stop_after,
            settle_ms,
        } => {
            let context = build_context(config, cli.offline)?;
            let script = DriveScript {
                session_type,
                pause_after: pause_after.map(Duration::from_secs),
                resume_after: resume_after.map(Duration::from_secs),
                stop_after: Duration::from_secs(stop_after),
                settle: Duration::from_millis(settle_ms),
            };
            let result = drive(&context, &script);
            context.shutdown();
            result
        }
    }
}

fn build_context(config: BillingConfig, offline: bool) -> anyhow::Result<BillingContext> {
    let mut builder = BillingContext::builder().config(config);
    if offline {
        log::info!("Using offline billing backend");
        builder = builder.backend(Arc::new(RecordingBackend::auto_succeed()));
    }
    builder.build().context("building billing context")
}

fn drive(context: &BillingContext, script: &DriveScript) -> anyhow::Result<()> {
    let coordinator = context.coordinator();
    let mut rx = coordinator.subscribe();
    let mut print_pending = || -> anyhow::Result<()> {
        while let Ok(event) = rx.try_recv() {
            print_event(&event)?;
        }
        Ok(())
    };

    coordinator.begin_session(script.session_type);
    print_pending()?;

    if let Some(delay) = script.pause_after {
        sleep(delay);
        coordinator.pause_session();
        print_pending()?;
    }
    if let Some(delay) = script.resume_after {
        sleep(delay);
        coordinator.resume_session();
        print_pending()?;
    }

    sleep(script.stop_after);
    match coordinator.session_token() {
        Some(token) => log::info!("Session token before stop: {}", token),
        None => log::info!("No valid session token before stop"),
    }
    coordinator.stop_session();

    sleep(script.settle);
    print_pending()?;

    let snapshot = coordinator.snapshot();
    println!("{}", serde_json::to_string(&snapshot)?);
    Ok(())
}

fn print_event(event: &BillingEvent) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

fn print_config(config: &BillingConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if !shown.access_token.is_empty() {
        shown.access_token = "***".to_string();
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use navbill_core::BillingBackend;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_drive_with_defaults() {
        let cli = Cli::try_parse_from(["navbill", "drive"]).unwrap();
        match cli.command {
            Commands::Drive {
                session_type,
                pause_after,
                stop_after,
                settle_ms,
                ..
            } => {
                assert_eq!(session_type, SessionType::FreeDrive);
                assert!(pause_after.is_none());
                assert_eq!(stop_after, 1);
                assert_eq!(settle_ms, 250);
            }
            Commands::Config => panic!("Expected drive"),
        }
        assert!(!cli.offline);
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "navbill",
            "drive",
            "--session-type",
            "active-guidance",
            "--offline",
            "--config",
            "/tmp/navbill.json",
        ])
        .unwrap();
        assert!(cli.offline);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/navbill.json")));
        match cli.command {
            Commands::Drive { session_type, .. } => {
                assert_eq!(session_type, SessionType::ActiveGuidance)
            }
            Commands::Config => panic!("Expected drive"),
        }
    }

    #[test]
    fn rejects_unknown_session_type() {
        let err = Cli::try_parse_from(["navbill", "drive", "--session-type", "walking"])
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unknown session type: walking"));
    }

    #[test]
    fn offline_drive_ends_stopped() {
        let context = build_context(BillingConfig::default(), true).unwrap();
        let script = DriveScript {
            session_type: SessionType::ActiveGuidance,
            pause_after: Some(Duration::ZERO),
            resume_after: Some(Duration::ZERO),
            stop_after: Duration::ZERO,
            settle: Duration::ZERO,
        };

        drive(&context, &script).unwrap();

        assert_eq!(
            context.coordinator().state(),
            navbill_core::SessionState::Stopped
        );
        assert!(context.backend().current_token().is_none());
    }
}
