//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables.
//!
//! See [`OAuthConfig`](workbench_access::OAuthConfig) for identity provider
//! configuration.

use chrono::Duration;
use serde::Deserialize;
use std::fmt;
use workbench_access::{FlowSettings, OAuthConfig};

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// PostgreSQL connection URL. Sessions stay in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Session configuration.
    pub session: SessionConfig,

    /// Identity provider configuration. Login is unavailable when unset.
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

/// Session-related configuration.
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    /// Key for signing session cookies. At least 32 bytes.
    pub secret: String,

    /// Session duration in minutes, renewed on activity.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// How long a login attempt may wait for its callback, in seconds.
    #[serde(default = "default_pending_ttl_seconds")]
    pub pending_ttl_seconds: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_session_duration_minutes() -> i64 {
    480
}

fn default_pending_ttl_seconds() -> i64 {
    600
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

fn default_cookie_name() -> String {
    "workbench_session".to_string()
}

impl SessionConfig {
    /// Creates a session configuration with defaults around `secret`.
    #[must_use]
    pub fn with_secret(secret: String) -> Self {
        Self {
            secret,
            duration_minutes: default_session_duration_minutes(),
            pending_ttl_seconds: default_pending_ttl_seconds(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
            cookie_name: default_cookie_name(),
        }
    }

    /// Returns the entry lifetimes used by the login flow.
    #[must_use]
    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            pending_ttl: Duration::seconds(self.pending_ttl_seconds),
            session_ttl: Duration::minutes(self.duration_minutes),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"[redacted]")
            .field("duration_minutes", &self.duration_minutes)
            .field("pending_ttl_seconds", &self.pending_ttl_seconds)
            .field("cleanup_interval_seconds", &self.cleanup_interval_seconds)
            .field("secure_cookies", &self.secure_cookies)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, config::ConfigError> {
        let source: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(source)),
            )
            .build()?
            .try_deserialize()
    }

    #[test]
    fn session_config_has_correct_defaults() {
        let config = SessionConfig::with_secret("s".repeat(32));
        assert_eq!(config.duration_minutes, 480);
        assert_eq!(config.pending_ttl_seconds, 600);
        assert_eq!(config.cleanup_interval_seconds, 300);
        assert!(config.secure_cookies);
        assert_eq!(config.cookie_name, "workbench_session");

        let settings = config.flow_settings();
        assert_eq!(settings.session_ttl, Duration::hours(8));
        assert_eq!(settings.pending_ttl, Duration::minutes(10));
    }

    #[test]
    fn loads_minimal_environment() {
        let config = from_pairs(&[("SESSION__SECRET", "0123456789abcdef0123456789abcdef")])
            .expect("config");
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert!(config.database_url.is_none());
        assert!(config.oauth.is_none());
        assert_eq!(config.session.duration_minutes, 480);
    }

    #[test]
    fn loads_provider_block() {
        let config = from_pairs(&[
            ("SESSION__SECRET", "0123456789abcdef0123456789abcdef"),
            ("SESSION__SECURE_COOKIES", "false"),
            ("OAUTH__CLIENT_ID", "workbench"),
            ("OAUTH__CLIENT_SECRET", "shh"),
            ("OAUTH__ISSUER", "https://idp.example.com"),
            ("OAUTH__JWKS_URL", "https://idp.example.com/.well-known/jwks.json"),
            ("OAUTH__AUTHORIZE_URL", "https://idp.example.com/authorize"),
            ("OAUTH__TOKEN_URL", "https://idp.example.com/token"),
            ("OAUTH__REDIRECT_URI", "https://workbench.example.com/auth/callback"),
            ("OAUTH__ADMIN_GROUP", "ops"),
        ])
        .expect("config");
        assert!(!config.session.secure_cookies);
        let oauth = config.oauth.expect("oauth block");
        assert_eq!(oauth.client_id(), "workbench");
        assert_eq!(oauth.issuer(), "https://idp.example.com");
        assert_eq!(
            oauth.jwks_url(),
            Some("https://idp.example.com/.well-known/jwks.json")
        );
        assert_eq!(oauth.role_groups().admin, "ops");
        assert_eq!(oauth.scopes(), vec!["openid", "email", "profile"]);
    }

    #[test]
    fn missing_secret_is_an_error() {
        assert!(from_pairs(&[]).is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let config = SessionConfig::with_secret("super-secret-value-super-secret-value".to_string());
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
