//! Process-wide relay context

use std::sync::Arc;

use tracing::info;

use zmqhub_core::{CspDecoder, EnvelopeDecoder, HubError, Result};
use zmqhub_keystore::{load_secret_key, CurveKeypair};
use zmqhub_settings::Settings;

use crate::security::curve_supported;

/// Everything the relay tasks share, built once before any task starts
#[derive(Clone)]
pub struct RelayContext {
    zmq: zmq::Context,
    settings: Arc<Settings>,
    credential: Option<Arc<CurveKeypair>>,
    decoder: Arc<dyn EnvelopeDecoder>,
}

impl RelayContext {
    /// Validate `settings` and load the secret key when authentication is on
    pub fn new(settings: Settings) -> Result<Self> {
        let credential = if settings.security.auth {
            let path = settings.security.key_path()?;
            let keypair = load_secret_key(&path)?;
            info!("Loaded CURVE key from {:?}", path);
            Some(keypair)
        } else {
            None
        };
        Self::with_credential(settings, credential)
    }

    /// Build a context around an already loaded credential
    pub fn with_credential(settings: Settings, credential: Option<CurveKeypair>) -> Result<Self> {
        settings.validate()?;

        if settings.security.auth {
            if credential.is_none() {
                return Err(HubError::CredentialUnavailable(
                    "authentication enabled without a secret key".to_string(),
                ));
            }
            if !curve_supported() {
                return Err(HubError::CredentialUnavailable(
                    "libzmq was built without CURVE support".to_string(),
                ));
            }
        }

        let decoder = Arc::new(CspDecoder::new(settings.relay.csp_version));
        Ok(Self {
            zmq: zmq::Context::new(),
            settings: Arc::new(settings),
            credential: credential.map(Arc::new),
            decoder,
        })
    }

    /// Replace the envelope decoder used by the capture tap
    pub fn with_decoder(mut self, decoder: Arc<dyn EnvelopeDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn zmq(&self) -> &zmq::Context {
        &self.zmq
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The CURVE keypair, present only when authentication is enabled
    pub fn credential(&self) -> Option<&CurveKeypair> {
        self.credential.as_deref()
    }

    pub fn decoder(&self) -> Arc<dyn EnvelopeDecoder> {
        Arc::clone(&self.decoder)
    }
}
