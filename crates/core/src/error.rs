use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Failed to bind {endpoint}: {reason}")]
    BindError { endpoint: String, reason: String },

    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("Unable to open logfile {}: {reason}", path.display())]
    CaptureLogUnavailable { path: PathBuf, reason: String },

    #[error("Malformed envelope: need at least {required} bytes, got {actual}")]
    MalformedEnvelope { required: usize, actual: usize },

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HubError {
    /// Whether the error must terminate the whole process.
    ///
    /// Recoverable kinds are handled inside the task that observed them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HubError::MalformedEnvelope { .. } | HubError::ChannelClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
