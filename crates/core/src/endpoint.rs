use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{HubError, Result};

/// Default bind address for the subscriber-facing (XSUB) side.
pub const DEFAULT_SUBSCRIBER_ENDPOINT: &str = "tcp://0.0.0.0:6000";

/// Default bind address for the publisher-facing (XPUB) side.
pub const DEFAULT_PUBLISHER_ENDPOINT: &str = "tcp://0.0.0.0:7000";

/// Transports accepted in bind addresses.
const TRANSPORTS: &[&str] = &["tcp://", "ipc://", "inproc://", "ws://", "pgm://", "epgm://"];

/// Which side of the relay an endpoint is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// Front door: publishers connect here, the relay subscribes to them (XSUB)
    Subscriber,
    /// Back door: subscribers connect here, the relay publishes to them (XPUB)
    Publisher,
}

impl EndpointRole {
    /// Short label used for task names and monitor channels
    pub fn label(&self) -> &'static str {
        match self {
            Self::Subscriber => "sub",
            Self::Publisher => "pub",
        }
    }

    /// Human-readable name used in startup messages
    pub fn task_name(&self) -> &'static str {
        match self {
            Self::Subscriber => "Subscriber",
            Self::Publisher => "Publisher",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transport security applied to a bound endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSecurity {
    /// Plain ZMTP, no authentication
    None,
    /// CURVE server side, authenticated and encrypted
    CurveServer,
}

/// A bound network address plus its role on the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub role: EndpointRole,
    pub security: EndpointSecurity,
}

impl Endpoint {
    /// Create an endpoint, rejecting addresses without a known transport prefix
    pub fn new(address: impl Into<String>, role: EndpointRole, security: EndpointSecurity) -> Result<Self> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self {
            address,
            role,
            security,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.security == EndpointSecurity::CurveServer
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.role)
    }
}

/// Check that an address carries a transport prefix and a non-empty location
pub fn validate_address(address: &str) -> Result<()> {
    let transport = TRANSPORTS
        .iter()
        .find(|t| address.starts_with(**t))
        .ok_or_else(|| HubError::InvalidConfig(format!("unsupported endpoint address: {}", address)))?;

    if address.len() == transport.len() {
        return Err(HubError::InvalidConfig(format!(
            "endpoint address has no location: {}",
            address
        )));
    }
    Ok(())
}
