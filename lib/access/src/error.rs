//! Error types for the access crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AuthenticationError`: Login flow failures (PKCE, provider, session state)
//! - `AuthorizationError`: Guard decisions (unauthenticated, forbidden)
//! - `SessionError`: Session backend failures, reported as `Report<SessionError>`
//! - `ConfigurationError`: Invalid startup configuration

use crate::role::Role;
use std::fmt;

/// Errors from the login flow.
///
/// Protocol-level variants (`StateMismatch`, `ExchangeRejected`, ...) are
/// handled inside the flow controller and never shown verbatim to end users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The operating system random source could not be read.
    EntropyUnavailable,
    /// No identity provider is configured.
    ProviderNotConfigured,
    /// The provider could not be reached or answered with a transient failure.
    ProviderUnavailable { reason: String },
    /// The provider refused the authorization code.
    ExchangeRejected { reason: String },
    /// The ID token failed signature or claim verification.
    InvalidIdToken { reason: String },
    /// The callback `state` did not match the stored state.
    StateMismatch,
    /// No live pending authorization exists for this session.
    NoPendingAuthorization,
    /// The provider redirected back with an OAuth error parameter.
    ProviderDenied { error: String },
    /// The callback carried no authorization code.
    MissingCode,
    /// The subject authenticated but holds no platform role.
    AccessDenied { subject: String },
    /// A claim required to build the identity was absent.
    MissingClaim { claim: String },
    /// The session backend failed.
    SessionUnavailable,
}

impl AuthenticationError {
    /// Returns true if the user may simply retry the login.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }

    /// Short machine-readable name used in logs and JSON bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntropyUnavailable => "entropy_unavailable",
            Self::ProviderNotConfigured => "provider_not_configured",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ExchangeRejected { .. } => "exchange_rejected",
            Self::InvalidIdToken { .. } => "invalid_id_token",
            Self::StateMismatch => "state_mismatch",
            Self::NoPendingAuthorization => "no_pending_authorization",
            Self::ProviderDenied { .. } => "provider_denied",
            Self::MissingCode => "missing_code",
            Self::AccessDenied { .. } => "access_denied",
            Self::MissingClaim { .. } => "missing_claim",
            Self::SessionUnavailable => "session_unavailable",
        }
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntropyUnavailable => {
                write!(f, "secure random source unavailable")
            }
            Self::ProviderNotConfigured => {
                write!(f, "identity provider is not configured")
            }
            Self::ProviderUnavailable { reason } => {
                write!(f, "identity provider unavailable: {reason}")
            }
            Self::ExchangeRejected { reason } => {
                write!(f, "authorization code exchange rejected: {reason}")
            }
            Self::InvalidIdToken { reason } => {
                write!(f, "ID token rejected: {reason}")
            }
            Self::StateMismatch => {
                write!(f, "callback state does not match pending authorization")
            }
            Self::NoPendingAuthorization => {
                write!(f, "no pending authorization for session")
            }
            Self::ProviderDenied { error } => {
                write!(f, "identity provider returned error: {error}")
            }
            Self::MissingCode => {
                write!(f, "callback is missing the authorization code")
            }
            Self::AccessDenied { subject } => {
                write!(f, "subject '{subject}' holds no platform role")
            }
            Self::MissingClaim { claim } => {
                write!(f, "missing required claim: {claim}")
            }
            Self::SessionUnavailable => {
                write!(f, "session storage unavailable")
            }
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from authorization guard checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// No identity is attached to the request.
    Unauthenticated,
    /// The identity does not satisfy the requirement.
    Forbidden {
        /// Role of the identity that was denied.
        role: Role,
        /// Description of the failed requirement, for logs only.
        requirement: String,
    },
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => {
                write!(f, "not authenticated")
            }
            Self::Forbidden { role, requirement } => {
                write!(f, "role {role} does not satisfy {requirement}")
            }
        }
    }
}

impl std::error::Error for AuthorizationError {}

/// Errors from session backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The backing store could not be reached or failed the query.
    Backend { details: String },
    /// A stored value could not be encoded or decoded.
    Serialization { key: String, details: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { details } => {
                write!(f, "session backend error: {details}")
            }
            Self::Serialization { key, details } => {
                write!(f, "session value '{key}' could not be serialized: {details}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors detected while validating configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A role has no entry in the permission table.
    UnmappedRole { role: Role },
    /// A role maps to an empty permission set.
    EmptyRole { role: Role },
    /// A role lists the same permission twice.
    DuplicatePermission { role: Role, permission: String },
    /// A configuration value is invalid.
    InvalidValue { field: String, reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnmappedRole { role } => {
                write!(f, "role {role} has no permission mapping")
            }
            Self::EmptyRole { role } => {
                write!(f, "role {role} maps to an empty permission set")
            }
            Self::DuplicatePermission { role, permission } => {
                write!(f, "role {role} lists permission '{permission}' more than once")
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "invalid configuration for '{field}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provider_unavailable_is_retryable() {
        assert!(
            AuthenticationError::ProviderUnavailable {
                reason: "timeout".to_string()
            }
            .is_retryable()
        );
        assert!(
            !AuthenticationError::ExchangeRejected {
                reason: "invalid_grant".to_string()
            }
            .is_retryable()
        );
        assert!(!AuthenticationError::StateMismatch.is_retryable());
        assert!(!AuthenticationError::EntropyUnavailable.is_retryable());
    }

    #[test]
    fn exchange_rejected_display() {
        let err = AuthenticationError::ExchangeRejected {
            reason: "invalid_grant".to_string(),
        };
        assert!(err.to_string().contains("rejected"));
        assert!(err.to_string().contains("invalid_grant"));
        assert_eq!(err.kind(), "exchange_rejected");
    }

    #[test]
    fn forbidden_display_names_role_and_requirement() {
        let err = AuthorizationError::Forbidden {
            role: Role::Member,
            requirement: "permission deploy:application".to_string(),
        };
        assert!(err.to_string().contains("member"));
        assert!(err.to_string().contains("deploy:application"));
    }

    #[test]
    fn unauthenticated_display() {
        assert_eq!(
            AuthorizationError::Unauthenticated.to_string(),
            "not authenticated"
        );
    }

    #[test]
    fn session_error_display() {
        let err = SessionError::Serialization {
            key: "oauth.pending".to_string(),
            details: "eof".to_string(),
        };
        assert!(err.to_string().contains("oauth.pending"));
    }
}
