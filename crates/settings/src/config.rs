//! Configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use zmqhub_core::{
    validate_address, CspVersion, Endpoint, EndpointRole, EndpointSecurity, HubError,
    DEFAULT_PUBLISHER_ENDPOINT, DEFAULT_SUBSCRIBER_ENDPOINT,
};
use zmqhub_keystore::{default_key_path, expand_path, KeystoreError};

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Bind addresses and envelope version
    #[serde(default)]
    pub relay: RelaySettings,

    /// Diagnostic taps
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Transport security
    #[serde(default)]
    pub security: SecuritySettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.to_path_buf());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.to_path_buf());
            Ok(settings)
        }
    }

    /// Load settings from a file that must exist
    pub fn load_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }
        Self::load_from(path)
    }

    /// Where `save` writes to
    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(default_settings_path)
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.config_path())
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject configurations the relay cannot start with
    pub fn validate(&self) -> std::result::Result<(), HubError> {
        validate_address(&self.relay.subscriber_endpoint)?;
        validate_address(&self.relay.publisher_endpoint)?;

        // Wildcard ports resolve to distinct addresses at bind time
        if self.relay.subscriber_endpoint == self.relay.publisher_endpoint
            && !self.relay.subscriber_endpoint.ends_with(":*")
        {
            return Err(HubError::InvalidConfig(format!(
                "subscriber and publisher endpoints are identical: {}",
                self.relay.subscriber_endpoint
            )));
        }

        if let Some(log_file) = &self.capture.log_file {
            if !self.capture.debug {
                tracing::warn!(
                    "Capture log {:?} configured but debug taps are disabled; nothing will be logged",
                    log_file
                );
            }
        }
        Ok(())
    }

    /// Security mode applied to both bound endpoints
    pub fn endpoint_security(&self) -> EndpointSecurity {
        if self.security.auth {
            EndpointSecurity::CurveServer
        } else {
            EndpointSecurity::None
        }
    }

    /// The subscriber-facing (XSUB) endpoint
    pub fn subscriber_endpoint(&self) -> std::result::Result<Endpoint, HubError> {
        Endpoint::new(
            self.relay.subscriber_endpoint.clone(),
            EndpointRole::Subscriber,
            self.endpoint_security(),
        )
    }

    /// The publisher-facing (XPUB) endpoint
    pub fn publisher_endpoint(&self) -> std::result::Result<Endpoint, HubError> {
        Endpoint::new(
            self.relay.publisher_endpoint.clone(),
            EndpointRole::Publisher,
            self.endpoint_security(),
        )
    }
}

/// Relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Subscriber-facing bind address (publishers connect here)
    #[serde(default = "default_subscriber_endpoint")]
    pub subscriber_endpoint: String,

    /// Publisher-facing bind address (subscribers connect here)
    #[serde(default = "default_publisher_endpoint")]
    pub publisher_endpoint: String,

    /// CSP envelope version decoded by the capture tap
    #[serde(default)]
    pub csp_version: CspVersion,
}

fn default_subscriber_endpoint() -> String {
    DEFAULT_SUBSCRIBER_ENDPOINT.to_string()
}

fn default_publisher_endpoint() -> String {
    DEFAULT_PUBLISHER_ENDPOINT.to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            subscriber_endpoint: default_subscriber_endpoint(),
            publisher_endpoint: default_publisher_endpoint(),
            csp_version: CspVersion::default(),
        }
    }
}

/// Capture and monitor settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Run the connection monitors and the capture tap
    #[serde(default)]
    pub debug: bool,

    /// Append captured envelopes to this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Transport security settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// CURVE authentication and encryption on both endpoints
    #[serde(default)]
    pub auth: bool,

    /// Secret key file; `$HOME/zmqauth.cfg` when unset
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
}

impl SecuritySettings {
    /// Resolve the key file location
    pub fn key_path(&self) -> std::result::Result<PathBuf, KeystoreError> {
        match &self.keyfile {
            Some(path) => Ok(expand_path(path)),
            None => default_key_path(),
        }
    }
}
