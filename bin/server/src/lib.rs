//! workbench web server.
//!
//! This crate provides the HTTP surface for login and the protected
//! workbench APIs.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::auth::AppState;

/// Builds the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Auth routes
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/logout", get(auth::logout))
        .route("/auth/error", get(auth::error_page))
        .route("/auth/me", get(auth::me))
        // Protected API
        .route(
            "/api/projects",
            get(api::list_projects).post(api::create_project),
        )
        .route(
            "/api/organizations/{org_id}/deployments",
            post(api::create_deployment),
        )
        .route("/api/admin/members", get(api::list_members))
        .with_state(state)
}
