//! RSA key material for `ActivityPub` actors.

use rsa::{
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};

use crate::{AppError, AppResult};

/// RSA key pair for `ActivityPub` HTTP Signatures.
#[derive(Debug, Clone)]
pub struct RsaKeypair {
    /// Public key as PEM `SubjectPublicKeyInfo`.
    pub public_key_pem: String,
    /// Private key as PEM PKCS#1 `RSAPrivateKey`.
    pub private_key_pem: String,
}

/// Default RSA key size (2048 bits).
const RSA_KEY_SIZE: usize = 2048;

/// Generate a new RSA key pair.
///
/// # Errors
/// Returns an error if key generation fails.
pub fn generate_rsa_keypair() -> AppResult<RsaKeypair> {
    let mut rng = rand::thread_rng();

    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_SIZE)
        .map_err(|e| AppError::Internal(format!("Failed to generate RSA key: {e}")))?;

    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode private key: {e}")))?
        .to_string();

    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode public key: {e}")))?;

    Ok(RsaKeypair {
        public_key_pem,
        private_key_pem,
    })
}

/// Parse a private key from PEM format.
///
/// Accepts PKCS#1 (`RSA PRIVATE KEY`) with a PKCS#8 fallback, since peer
/// software exports either.
pub fn parse_private_key(pem: &str) -> AppResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| AppError::Internal(format!("Failed to parse private key: {e}")))
}

/// Parse a public key from PEM format.
pub fn parse_public_key(pem: &str) -> AppResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| AppError::Internal(format!("Failed to parse public key: {e}")))
}

/// Check that a private PEM matches a public PEM.
#[must_use]
pub fn keypair_matches(public_key_pem: &str, private_key_pem: &str) -> bool {
    match (
        parse_public_key(public_key_pem),
        parse_private_key(private_key_pem),
    ) {
        (Ok(public), Ok(private)) => RsaPublicKey::from(&private) == public,
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair() {
        let keypair = generate_rsa_keypair().unwrap();

        assert!(keypair.public_key_pem.contains("BEGIN PUBLIC KEY"));
        assert!(keypair.public_key_pem.contains("END PUBLIC KEY"));
        assert!(keypair.private_key_pem.contains("BEGIN RSA PRIVATE KEY"));
        assert!(keypair.private_key_pem.contains("END RSA PRIVATE KEY"));
    }

    #[test]
    fn test_parse_generated_keys() {
        let keypair = generate_rsa_keypair().unwrap();

        let _private = parse_private_key(&keypair.private_key_pem).unwrap();
        let _public = parse_public_key(&keypair.public_key_pem).unwrap();
    }

    #[test]
    fn test_keypair_matches() {
        let a = generate_rsa_keypair().unwrap();
        let b = generate_rsa_keypair().unwrap();

        assert!(keypair_matches(&a.public_key_pem, &a.private_key_pem));
        assert!(!keypair_matches(&a.public_key_pem, &b.private_key_pem));
    }
}
