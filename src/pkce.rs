//! PKCE (Proof Key for Code Exchange) material, RFC 7636

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};

/// Unreserved URL-safe alphabet allowed in a code verifier
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Legal verifier lengths
pub const VERIFIER_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 43..=128;

/// Generate a random code verifier of `length` characters
///
/// # Errors
///
/// Returns `AuthError::InvalidVerifierLength` if `length` is outside 43..=128.
pub fn generate_code_verifier(length: usize) -> AuthResult<String> {
    if !VERIFIER_LENGTH_RANGE.contains(&length) {
        return Err(AuthError::InvalidVerifierLength(length));
    }

    let mut rng = rand::thread_rng();
    Ok((0..length)
        .map(|_| char::from(VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())]))
        .collect())
}

/// Compute the S256 code challenge: BASE64URL(SHA256(verifier)) without padding
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// PKCE code challenge data
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Code verifier (random string, kept client-side)
    pub verifier: String,
    /// Code challenge (SHA-256 hash of verifier, base64url encoded)
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a fresh verifier and its challenge
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidVerifierLength` for an illegal length.
    pub fn generate(length: usize) -> AuthResult<Self> {
        let verifier = generate_code_verifier(length)?;
        let challenge = generate_code_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}
