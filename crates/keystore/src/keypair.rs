use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use thiserror::Error;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

/// Raw Curve25519 key size
pub const KEY_LEN: usize = 32;

/// Z85-encoded key size
pub const Z85_KEY_LEN: usize = 40;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("HOME environment variable is not set")]
    NoHomeDir,

    #[error("Could not open config {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to read secret key from {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to read secret key from {}: file is empty", path.display())]
    Empty { path: PathBuf },

    #[error("Invalid key length: expected {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid Z85 key encoding")]
    InvalidEncoding,
}

/// CURVE keypair shared by both relay endpoints
pub struct CurveKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Clone for CurveKeypair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret.as_bytes())
    }
}

impl fmt::Debug for CurveKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurveKeypair")
            .field("public", &self.public_z85().unwrap_or_default())
            .finish_non_exhaustive()
    }
}

impl CurveKeypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw secret key bytes, deriving the public key
    pub fn from_secret_bytes(secret: &[u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from a 40-character Z85 secret key
    pub fn from_secret_z85(encoded: &str) -> Result<Self, KeystoreError> {
        let secret = decode_key(encoded)?;
        Ok(Self::from_secret_bytes(&secret))
    }

    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; KEY_LEN] {
        *self.secret.as_bytes()
    }

    pub fn public_z85(&self) -> Result<String, KeystoreError> {
        encode_key(&self.public_key_bytes())
    }

    pub fn secret_z85(&self) -> Result<String, KeystoreError> {
        encode_key(&self.secret_key_bytes())
    }
}

/// Generate a printable keypair, returned as `(public, secret)` Z85 strings
pub fn generate_keypair() -> Result<(String, String), KeystoreError> {
    let keypair = CurveKeypair::generate();
    Ok((keypair.public_z85()?, keypair.secret_z85()?))
}

/// Load the secret key stored on the first line of `path`
pub fn load_secret_key(path: &Path) -> Result<CurveKeypair, KeystoreError> {
    let file = File::open(path).map_err(|source| KeystoreError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut line = String::new();
    let read = BufReader::new(file)
        .read_line(&mut line)
        .map_err(|source| KeystoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if read == 0 {
        return Err(KeystoreError::Empty {
            path: path.to_path_buf(),
        });
    }

    let keypair = CurveKeypair::from_secret_z85(line.trim_end_matches(['\r', '\n']))?;
    debug!("Loaded CURVE secret key from {:?}", path);
    Ok(keypair)
}

fn encode_key(key: &[u8; KEY_LEN]) -> Result<String, KeystoreError> {
    zmq::z85_encode(key).map_err(|_| KeystoreError::InvalidEncoding)
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], KeystoreError> {
    if encoded.len() != Z85_KEY_LEN {
        return Err(KeystoreError::InvalidLength {
            expected: Z85_KEY_LEN,
            actual: encoded.len(),
        });
    }

    let bytes = zmq::z85_decode(encoded).map_err(|_| KeystoreError::InvalidEncoding)?;
    bytes.try_into().map_err(|_| KeystoreError::InvalidEncoding)
}
