//! Application settings management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// General settings
    #[serde(default)]
    pub general: GeneralSettings,

    /// Microphone capture settings
    #[serde(default)]
    pub audio: AudioSettings,

    /// Voice analysis service settings
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// TUI settings
    #[serde(default)]
    pub tui: TuiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Data directory for recordings, session and database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Sample rate for recording
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Preferred input device (empty = default)
    #[serde(default)]
    pub device: String,

    /// Recordings stop on their own after this many seconds (0 = unlimited)
    #[serde(default = "default_max_recording_secs")]
    pub max_recording_secs: u64,
}

/// Which analysis service backs the voice step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisProvider {
    /// Local simulated scoring
    #[default]
    Mock,
    /// HTTP analysis endpoint
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Analysis backend (mock, remote)
    #[serde(default)]
    pub provider: AnalysisProvider,

    /// Simulated latency of the mock service in milliseconds
    #[serde(default = "default_analysis_delay_ms")]
    pub delay_ms: u64,

    /// Seed for reproducible mock scores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Endpoint of the remote service
    #[serde(default)]
    pub endpoint: String,

    /// API key of the remote service
    #[serde(default)]
    pub api_key: String,

    /// Remote request timeout in seconds
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuiSettings {
    /// Show the reading passage on the voice step
    #[serde(default = "default_true")]
    pub show_passage: bool,

    /// Number of appointments loaded on the dashboard
    #[serde(default = "default_recent_count")]
    pub recent_count: usize,
}

// Default value functions

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "neurocare", "neurocare")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.local/share/neurocare"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_max_recording_secs() -> u64 {
    300
}

fn default_analysis_delay_ms() -> u64 {
    3000
}

fn default_analysis_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_recent_count() -> usize {
    50
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            device: String::new(),
            max_recording_secs: default_max_recording_secs(),
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            provider: AnalysisProvider::default(),
            delay_ms: default_analysis_delay_ms(),
            seed: None,
            endpoint: String::new(),
            api_key: String::new(),
            timeout_secs: default_analysis_timeout_secs(),
        }
    }
}

impl Default for TuiSettings {
    fn default() -> Self {
        Self {
            show_passage: true,
            recent_count: default_recent_count(),
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::debug!("No config file found, using defaults");
            let mut settings = Self::default();
            settings.apply_env_overrides();
            return Ok(settings);
        }

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        settings.apply_env_overrides();

        Ok(settings)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if self.analysis.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var("NEURO_ANALYSIS_API_KEY") {
                if !key.trim().is_empty() {
                    self.analysis.api_key = key;
                }
            }
        }
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "neurocare", "neurocare")
            .context("Could not determine config directory")?;

        let config_dir = dirs.config_dir();
        Ok(config_dir.join("config.toml"))
    }

    /// Write default configuration to a file
    pub fn write_default(path: &PathBuf) -> Result<()> {
        let settings = Self::default();
        let content = toml::to_string_pretty(&settings)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn database_path(&self) -> PathBuf {
        self.general.data_dir.join("neurocare.db")
    }

    /// Get the voice recordings directory
    pub fn audio_dir(&self) -> PathBuf {
        self.general.data_dir.join("recordings")
    }

    /// Get the session claims file
    pub fn session_path(&self) -> PathBuf {
        self.general.data_dir.join("session.json")
    }

    /// Get the TUI log file
    pub fn log_path(&self) -> PathBuf {
        self.general.data_dir.join("neurocare.log")
    }

    fn runtime_dir() -> PathBuf {
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        Self::runtime_dir().join("neurocare.sock")
    }

    /// Get the PID file path
    pub fn pid_path(&self) -> PathBuf {
        Self::runtime_dir().join("neurocare.pid")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.general.data_dir)?;
        std::fs::create_dir_all(self.audio_dir())?;
        Ok(())
    }
}
