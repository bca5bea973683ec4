//! neurocare - Appointment booking with voice analysis
//!
//! Entry point for the neurocare CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use neurocare::cli::{commands, completions, wizard, Cli, Commands};
use neurocare::config::Settings;

/// Logs go to stderr, except for the TUI which owns the terminal and
/// logs to a file in the data directory.
fn init_logging(settings: &Settings, verbose: bool, to_file: bool) -> Result<()> {
    let default_level = if verbose {
        "debug"
    } else {
        settings.general.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (stderr_layer, file_layer) = if to_file {
        settings.ensure_dirs()?;
        let path = settings.log_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        (Some(layer), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        completions::print(shell);
        return Ok(());
    }

    // Load configuration only for runtime commands.
    let settings = Settings::load()?;
    init_logging(&settings, cli.verbose, matches!(cli.command, Commands::Tui))?;

    // Execute command
    match cli.command {
        Commands::Login {
            user_id,
            name,
            role,
        } => {
            commands::login(&settings, user_id, name, role)?;
        }
        Commands::Logout => {
            commands::logout(&settings)?;
        }
        Commands::Whoami => {
            commands::whoami(&settings)?;
        }
        Commands::Doctors => {
            commands::list_doctors()?;
        }
        Commands::Book => {
            wizard::run(&settings).await?;
        }
        Commands::Booking(booking_cmd) => {
            commands::booking_command(&settings, booking_cmd).await?;
        }
        Commands::Appointments(appointments_cmd) => {
            commands::appointments_command(&settings, appointments_cmd)?;
        }
        Commands::Diagnose { json } => {
            commands::run_diagnose(&settings, json).await?;
        }
        Commands::Daemon(daemon_cmd) => {
            commands::daemon_command(&settings, daemon_cmd).await?;
        }
        Commands::Tui => {
            neurocare::tui::run(&settings).await?;
        }
        Commands::Config(config_cmd) => {
            commands::config_command(&settings, config_cmd)?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
