//! zmqhub Keystore
//!
//! Key material for the CURVE authenticated-encryption transport.
//!
//! ## Features
//!
//! - Curve25519 keypair generation in printable Z85 form
//! - Secret key loading from the per-user key file (`$HOME/zmqauth.cfg`)
//! - Public key derivation from a secret key
//! - Path expansion (`~`) and default locations

mod keypair;
mod paths;

pub use keypair::{generate_keypair, load_secret_key, CurveKeypair, KeystoreError, KEY_LEN, Z85_KEY_LEN};
pub use paths::{default_config_dir, default_key_path, expand_path, KEY_FILE_NAME};

impl From<KeystoreError> for zmqhub_core::HubError {
    fn from(err: KeystoreError) -> Self {
        zmqhub_core::HubError::CredentialUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeystoreError>;
