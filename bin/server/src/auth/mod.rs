//! Authentication module for the workbench server.
//!
//! This module provides:
//! - Login, callback and logout routes over the OAuth2 authorization-code flow
//! - Postgres-backed session storage
//! - Identity extractors for Axum routes
//!
//! # Authorization Model
//!
//! Sessions carry one identity with one role and one organization. Handlers
//! resolve it through [`CurrentIdentity`] or [`RequireAuth`] and hand it to
//! the [`AuthorizationGuard`] before doing any work. Role changes at the
//! provider take effect on next login.

pub mod db;
pub mod middleware;
pub mod routes;

use crate::config::SessionConfig;
use workbench_access::{AuthFlow, AuthorizationGuard};

pub use middleware::{CurrentIdentity, RequireAdmin, RequireAuth};
pub use routes::{callback, error_page, login, logout, me};

/// Shared application state.
pub struct AppState {
    /// The login flow and its session store.
    pub flow: AuthFlow,
    /// Permission checks for protected routes.
    pub guard: AuthorizationGuard,
    /// Session configuration.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(flow: AuthFlow, guard: AuthorizationGuard, session_config: SessionConfig) -> Self {
        Self {
            flow,
            guard,
            session_config,
        }
    }
}
