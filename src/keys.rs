//! Per-session key generation
//!
//! The vendor API expects each session to register an opaque identifier: the
//! PEM-encoded public half of a locally generated RSA key pair. The private
//! half is never stored or transmitted; the key is an identifier the server
//! associates with the session, not a signing credential.

use anyhow::{Context, Result};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

const KEY_BITS: usize = 2048;

/// Generate a fresh session key (SubjectPublicKeyInfo PEM).
pub fn generate_session_key() -> Result<String> {
    debug!("Generating session key");

    let mut rng = rand::thread_rng();
    let private_key =
        RsaPrivateKey::new(&mut rng, KEY_BITS).context("Failed to generate RSA key pair")?;
    let public_key = RsaPublicKey::from(&private_key);

    let pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .context("Failed to encode public key")?;

    Ok(pem)
}
