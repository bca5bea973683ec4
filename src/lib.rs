//! neurocare - Book medical appointments with a voice-based cognitive check
//!
//! A booking runs through three steps: appointment details, a short voice
//! recording analyzed for speech and cognitive markers, and review & submit.
//! Bookings can be driven from the line wizard, the TUI or the daemon.

pub mod analysis;
pub mod audio;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod storage;
pub mod tui;
pub mod workflow;

pub use workflow::WorkflowError;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "neurocare";
