//! CLI module for neurocare
//!
//! Contains argument parsing, command implementations and the line-oriented
//! booking wizard.

pub mod args;
pub mod commands;
pub mod completions;
pub mod wizard;

pub use args::{
    AppointmentsCommand, BookingCommand, Cli, Commands, ConfigCommand, DaemonCommand,
    RecordCommand,
};
