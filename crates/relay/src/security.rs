//! CURVE socket options

use zmqhub_core::{HubError, Result};
use zmqhub_keystore::CurveKeypair;

use crate::transport;

/// Whether the linked libzmq was built with CURVE support
pub fn curve_supported() -> bool {
    zmq::has("curve").unwrap_or(false)
}

/// Make `socket` the server side of a CURVE handshake
pub fn apply_curve_server(socket: &zmq::Socket, keypair: &CurveKeypair) -> Result<()> {
    ensure_supported()?;
    socket
        .set_curve_server(true)
        .map_err(|e| transport("enable CURVE server", e))?;
    socket
        .set_curve_secretkey(&keypair.secret_key_bytes())
        .map_err(|e| transport("set CURVE secret key", e))?;
    Ok(())
}

/// Make `socket` a CURVE client of the server holding `server_public`
pub fn apply_curve_client(
    socket: &zmq::Socket,
    keypair: &CurveKeypair,
    server_public: &[u8; 32],
) -> Result<()> {
    ensure_supported()?;
    socket
        .set_curve_serverkey(server_public)
        .map_err(|e| transport("set CURVE server key", e))?;
    socket
        .set_curve_publickey(&keypair.public_key_bytes())
        .map_err(|e| transport("set CURVE public key", e))?;
    socket
        .set_curve_secretkey(&keypair.secret_key_bytes())
        .map_err(|e| transport("set CURVE secret key", e))?;
    Ok(())
}

fn ensure_supported() -> Result<()> {
    if curve_supported() {
        Ok(())
    } else {
        Err(HubError::CredentialUnavailable(
            "libzmq was built without CURVE support".to_string(),
        ))
    }
}
