//! Per-browser session state.
//!
//! A session is identified by a random [`SessionId`] carried in a signed
//! cookie. Values live server-side in a [`SessionBackend`] under string keys,
//! each with its own expiry. Two kinds of state are kept:
//! - the short-lived pending authorization of an in-flight login
//! - the long-lived authenticated identity, refreshed on activity
//!
//! Cookie values that fail signature verification resolve to no session at
//! all; they are never trusted.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rootcause::prelude::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AuthenticationError, ConfigurationError, SessionError};
use crate::pkce::random_bytes;

type HmacSha256 = Hmac<Sha256>;

/// Minimum length of the cookie signing key.
pub const MIN_SECRET_LEN: usize = 32;

/// Random bytes behind a session id (256 bits).
const SESSION_ID_BYTES: usize = 32;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new random session id.
    ///
    /// # Errors
    ///
    /// Returns `EntropyUnavailable` if the OS random source cannot be read.
    pub fn generate() -> Result<Self, AuthenticationError> {
        let bytes = random_bytes::<SESSION_ID_BYTES>()?;
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Wraps an existing id, e.g. one read back from a backend row.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Returns the session id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-reversible label for logs.
    #[must_use]
    pub fn log_label(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage for session entries.
///
/// Implementations must treat entries whose `expires_at` has passed as
/// absent, and `take` must be atomic: of two concurrent calls for the same
/// key at most one observes the value.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Inserts or replaces an entry.
    async fn put(
        &self,
        session: &SessionId,
        key: &str,
        value: serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Report<SessionError>>;

    /// Reads an entry without consuming it.
    async fn get(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Report<SessionError>>;

    /// Reads and removes an entry in one step.
    async fn take(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Report<SessionError>>;

    /// Removes an entry if present.
    async fn remove(&self, session: &SessionId, key: &str) -> Result<(), Report<SessionError>>;

    /// Moves the expiry of a live entry. Returns false if there was none.
    async fn touch(
        &self,
        session: &SessionId,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, Report<SessionError>>;

    /// Removes every entry of a session.
    async fn destroy(&self, session: &SessionId) -> Result<(), Report<SessionError>>;

    /// Purges expired entries. Returns how many were removed.
    async fn delete_expired(&self) -> Result<u64, Report<SessionError>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// In-process session backend.
#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    sessions: RwLock<HashMap<SessionId, HashMap<String, Entry>>>,
}

impl MemorySessionBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn put(
        &self,
        session: &SessionId,
        key: &str,
        value: serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Report<SessionError>> {
        self.sessions
            .write()
            .await
            .entry(session.clone())
            .or_default()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Report<SessionError>> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session)
            .and_then(|entries| entries.get(key))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn take(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Report<SessionError>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let Some(entries) = sessions.get_mut(session) else {
            return Ok(None);
        };
        Ok(entries
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn remove(&self, session: &SessionId, key: &str) -> Result<(), Report<SessionError>> {
        if let Some(entries) = self.sessions.write().await.get_mut(session) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn touch(
        &self,
        session: &SessionId,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, Report<SessionError>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        match sessions
            .get_mut(session)
            .and_then(|entries| entries.get_mut(key))
        {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn destroy(&self, session: &SessionId) -> Result<(), Report<SessionError>> {
        self.sessions.write().await.remove(session);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, Report<SessionError>> {
        let now = Utc::now();
        let mut removed = 0u64;
        let mut sessions = self.sessions.write().await;
        for entries in sessions.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            removed += (before - entries.len()) as u64;
        }
        sessions.retain(|_, entries| !entries.is_empty());
        Ok(removed)
    }
}

/// Signs session ids into cookie values and verifies them back.
///
/// Cookie format: `<session id>.<base64url(HMAC-SHA256(secret, session id))>`.
#[derive(Clone)]
pub struct CookieSigner {
    mac: HmacSha256,
}

impl CookieSigner {
    /// Creates a signer from a secret of at least [`MIN_SECRET_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the secret is too short or cannot key the MAC.
    pub fn new(secret: &[u8]) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidValue {
            field: "session.secret".to_string(),
            reason,
        };
        if secret.len() < MIN_SECRET_LEN {
            return Err(invalid(format!("must be at least {MIN_SECRET_LEN} bytes")));
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { mac })
    }

    fn keyed(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac
    }

    /// Produces the cookie value for a session.
    #[must_use]
    pub fn sign(&self, session: &SessionId) -> String {
        let tag = self.keyed(session.as_str()).finalize().into_bytes();
        format!("{}.{}", session.as_str(), URL_SAFE_NO_PAD.encode(tag))
    }

    /// Verifies a cookie value. Returns `None` for anything not signed by us.
    #[must_use]
    pub fn verify(&self, cookie: &str) -> Option<SessionId> {
        let (id, signature) = cookie.rsplit_once('.')?;
        if id.is_empty() {
            return None;
        }
        let received = URL_SAFE_NO_PAD.decode(signature).ok()?;
        // Constant-time comparison.
        self.keyed(id).verify_slice(&received).ok()?;
        Some(SessionId(id.to_string()))
    }
}

impl fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CookieSigner([redacted])")
    }
}

/// Typed session store over a backend and a cookie signer.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    signer: CookieSigner,
}

impl SessionStore {
    /// Creates a store.
    #[must_use]
    pub fn new(backend: Arc<dyn SessionBackend>, signer: CookieSigner) -> Self {
        Self { backend, signer }
    }

    /// Convenience constructor for an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the secret is too short.
    pub fn in_memory(secret: &[u8]) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            Arc::new(MemorySessionBackend::new()),
            CookieSigner::new(secret)?,
        ))
    }

    /// Allocates a fresh session id. Nothing is stored until the first `put`.
    ///
    /// # Errors
    ///
    /// Returns `EntropyUnavailable` if the OS random source cannot be read.
    pub fn create_session(&self) -> Result<SessionId, AuthenticationError> {
        SessionId::generate()
    }

    /// Stores `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be serialized or the backend fails.
    pub async fn put<T: Serialize>(
        &self,
        session: &SessionId,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), Report<SessionError>> {
        let value = serde_json::to_value(value).map_err(|e| SessionError::Serialization {
            key: key.to_string(),
            details: e.to_string(),
        })?;
        self.backend.put(session, key, value, Utc::now() + ttl).await
    }

    /// Reads the value under `key`.
    ///
    /// A stored value that no longer decodes as `T` reads as absent.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub async fn get<T: DeserializeOwned>(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<T>, Report<SessionError>> {
        let value = self.backend.get(session, key).await?;
        Ok(value.and_then(|v| decode(session, key, v)))
    }

    /// Reads and invalidates the value under `key` atomically.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub async fn take<T: DeserializeOwned>(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<T>, Report<SessionError>> {
        let value = self.backend.take(session, key).await?;
        Ok(value.and_then(|v| decode(session, key, v)))
    }

    /// Removes the value under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub async fn remove(&self, session: &SessionId, key: &str) -> Result<(), Report<SessionError>> {
        self.backend.remove(session, key).await
    }

    /// Extends a live entry to expire `ttl` from now.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub async fn touch(
        &self,
        session: &SessionId,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, Report<SessionError>> {
        self.backend.touch(session, key, Utc::now() + ttl).await
    }

    /// Serializes the session reference into a cookie value.
    #[must_use]
    pub fn commit(&self, session: &SessionId) -> String {
        self.signer.sign(session)
    }

    /// Resolves a cookie value back into a session id, if the signature holds.
    #[must_use]
    pub fn resolve(&self, cookie: &str) -> Option<SessionId> {
        let session = self.signer.verify(cookie);
        if session.is_none() {
            tracing::debug!("session cookie failed verification");
        }
        session
    }

    /// Removes all state of a session.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub async fn destroy(&self, session: &SessionId) -> Result<(), Report<SessionError>> {
        self.backend.destroy(session).await
    }

    /// Purges expired entries from the backend.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails.
    pub async fn delete_expired(&self) -> Result<u64, Report<SessionError>> {
        self.backend.delete_expired().await
    }
}

fn decode<T: DeserializeOwned>(session: &SessionId, key: &str, value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(
                error = %e,
                session = session.log_label(),
                key,
                "discarding undecodable session value"
            );
            None
        }
    }
}
