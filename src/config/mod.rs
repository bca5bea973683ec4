//! Configuration module for neurocare
//!
//! Handles loading and managing application settings from TOML files.

mod settings;

pub use settings::{AnalysisProvider, Settings};
