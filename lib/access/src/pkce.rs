//! PKCE (Proof Key for Code Exchange) and anti-forgery state generation.
//!
//! Implements the S256 method of RFC 7636. The verifier is stored with the
//! pending authorization and sent on token exchange; the challenge goes into
//! the authorization URL. The state token is an independent random value used
//! only for CSRF protection on the callback. The nonce binds the returned ID
//! token to the same login attempt.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::error::AuthenticationError;

/// Random bytes behind a verifier. Encodes to 43 base64url characters.
const VERIFIER_BYTES: usize = 32;

/// Random bytes behind a state token (256 bits).
const STATE_BYTES: usize = 32;

/// Random bytes behind a nonce.
const NONCE_BYTES: usize = 32;

/// A PKCE code verifier.
///
/// `Debug` output is redacted; use [`CodeVerifier::secret`] to read it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeVerifier(String);

impl CodeVerifier {
    /// Wraps an existing verifier string.
    #[must_use]
    pub fn new(verifier: String) -> Self {
        Self(verifier)
    }

    /// Returns the verifier value.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CodeVerifier([redacted])")
    }
}

/// A PKCE S256 code challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeChallenge(String);

impl CodeChallenge {
    /// Returns the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodeChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque anti-forgery state round-tripped through the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateToken(String);

impl StateToken {
    /// Wraps an existing state string.
    #[must_use]
    pub fn new(state: String) -> Self {
        Self(state)
    }

    /// Returns the state as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a received value in constant time.
    #[must_use]
    pub fn matches(&self, received: &str) -> bool {
        let expected = self.0.as_bytes();
        let received = received.as_bytes();
        if expected.len() != received.len() {
            return false;
        }
        expected.ct_eq(received).into()
    }
}

/// OpenID Connect nonce echoed back inside the ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NonceToken(String);

impl NonceToken {
    /// Wraps an existing nonce string.
    #[must_use]
    pub fn new(nonce: String) -> Self {
        Self(nonce)
    }

    /// Returns the nonce as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Fills `N` bytes from the operating system CSPRNG.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], AuthenticationError> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| {
        tracing::error!(error = %e, "operating system random source failed");
        AuthenticationError::EntropyUnavailable
    })?;
    Ok(bytes)
}

/// Generates a new code verifier.
///
/// # Errors
///
/// Returns `EntropyUnavailable` if the OS random source cannot be read.
pub fn generate_verifier() -> Result<CodeVerifier, AuthenticationError> {
    let bytes = random_bytes::<VERIFIER_BYTES>()?;
    Ok(CodeVerifier(URL_SAFE_NO_PAD.encode(bytes)))
}

/// Derives the S256 challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn derive_challenge(verifier: &CodeVerifier) -> CodeChallenge {
    let hash = Sha256::digest(verifier.secret().as_bytes());
    CodeChallenge(URL_SAFE_NO_PAD.encode(hash))
}

/// Generates a new state token, unrelated to any verifier.
///
/// # Errors
///
/// Returns `EntropyUnavailable` if the OS random source cannot be read.
pub fn generate_state() -> Result<StateToken, AuthenticationError> {
    let bytes = random_bytes::<STATE_BYTES>()?;
    Ok(StateToken(URL_SAFE_NO_PAD.encode(bytes)))
}

/// Generates a new nonce.
///
/// # Errors
///
/// Returns `EntropyUnavailable` if the OS random source cannot be read.
pub fn generate_nonce() -> Result<NonceToken, AuthenticationError> {
    let bytes = random_bytes::<NONCE_BYTES>()?;
    Ok(NonceToken(URL_SAFE_NO_PAD.encode(bytes)))
}
