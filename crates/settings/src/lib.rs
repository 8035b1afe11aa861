//! zmqhub Settings
//!
//! Relay configuration shared by the zmqhub binaries.
//!
//! ## Features
//!
//! - Bind addresses for the subscriber-facing and publisher-facing sides
//! - CSP envelope version used by the capture tap
//! - Debug taps and capture log file
//! - CURVE authentication and key file location
//! - JSON file storage with per-field defaults
//!
//! ## Usage
//!
//! ```no_run
//! use zmqhub_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.capture.debug = true;
//! settings.validate()?;
//! settings.save()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;

pub use config::{CaptureSettings, RelaySettings, SecuritySettings, Settings};

use std::path::PathBuf;

use thiserror::Error;
use zmqhub_keystore::default_config_dir;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Settings file {0:?} not found")]
    NotFound(PathBuf),
}

impl From<SettingsError> for zmqhub_core::HubError {
    fn from(err: SettingsError) -> Self {
        zmqhub_core::HubError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("zmqproxy.json")
}
