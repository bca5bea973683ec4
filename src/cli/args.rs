//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::storage::AppointmentStatus;
use crate::workflow::session::Role;

/// neurocare - Book medical appointments with a voice-based cognitive check
#[derive(Parser, Debug)]
#[command(name = "neurocare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in (stores the session claims locally)
    Login {
        /// User identifier
        #[arg(long)]
        user_id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Role claimed by the user
        #[arg(long, value_enum, default_value = "patient")]
        role: Role,
    },

    /// Sign out
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List the doctors that can be booked
    Doctors,

    /// Book an appointment with the interactive wizard
    Book,

    /// Drive the booking hosted by the daemon
    #[command(subcommand)]
    Booking(BookingCommand),

    /// Browse and manage appointments
    #[command(subcommand)]
    Appointments(AppointmentsCommand),

    /// Run local environment diagnostics
    Diagnose {
        /// Output diagnostics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Daemon management commands
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Launch the interactive TUI
    Tui,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum BookingCommand {
    /// Open a booking for the signed-in user
    Open,

    /// Show the booking
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set an appointment detail (date, time, doctor, reason, symptoms, history)
    Set {
        field: String,
        value: String,
    },

    /// Validate the current step and go to the next one
    Next,

    /// Go back one step
    Back,

    /// Control the voice recording
    #[command(subcommand)]
    Record(RecordCommand),

    /// Analyze the stopped recording
    Analyze {
        /// Wait until the analysis finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Submit the appointment request
    Submit,

    /// Abandon the booking
    Cancel,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum RecordCommand {
    /// Start recording
    Start,
    /// Pause recording
    Pause,
    /// Resume a paused recording
    Resume,
    /// Stop and finalize the recording
    Stop,
    /// Discard the recording and start over
    Redo,
}

#[derive(Subcommand, Debug)]
pub enum AppointmentsCommand {
    /// List appointments visible to the signed-in user
    List {
        /// Only appointments of this patient
        #[arg(long)]
        patient: Option<String>,

        /// Only appointments with this doctor
        #[arg(long)]
        doctor: Option<String>,

        /// Only appointments in this status
        #[arg(long, value_enum)]
        status: Option<AppointmentStatus>,

        /// Maximum number of appointments to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// View an appointment with its voice analysis
    View {
        /// Appointment ID or partial ID
        id: String,
    },

    /// Change the status of an appointment
    Status {
        /// Appointment ID or partial ID
        id: String,

        #[arg(value_enum)]
        status: AppointmentStatus,
    },

    /// Delete an appointment and its analysis (admins only)
    Delete {
        /// Appointment ID or partial ID
        id: String,
    },

    /// Export an appointment to a file
    Export {
        /// Appointment ID or partial ID
        id: String,

        /// Output format (txt, json)
        #[arg(short, long, default_value = "txt")]
        format: String,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Start the background daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Restart the daemon
    Restart,

    /// Check daemon status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn booking_record_parses() {
        let cli = Cli::try_parse_from(["neurocare", "booking", "record", "redo"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Booking(BookingCommand::Record(RecordCommand::Redo))
        ));
    }

    #[test]
    fn login_defaults_to_patient() {
        let cli = Cli::try_parse_from([
            "neurocare", "login", "--user-id", "p-1", "--name", "Ada",
        ])
        .unwrap();
        match cli.command {
            Commands::Login { role, .. } => assert_eq!(role, Role::Patient),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn appointment_status_uses_value_enum() {
        let cli = Cli::try_parse_from(["neurocare", "appointments", "status", "abc", "scheduled"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Appointments(AppointmentsCommand::Status {
                status: AppointmentStatus::Scheduled,
                ..
            })
        ));
    }
}
