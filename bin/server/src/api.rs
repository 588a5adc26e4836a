//! Protected API routes.
//!
//! Each handler runs its guard checks before touching anything else. Bodies
//! are taken as raw bytes and parsed only once the caller is authorized.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use workbench_access::Permission;

use crate::auth::{AppState, CurrentIdentity, RequireAdmin};
use crate::error::ApiError;

/// Request body for project creation.
#[derive(Debug, Deserialize)]
pub struct NewProject {
    name: String,
}

/// Request body for a deployment.
#[derive(Debug, Deserialize)]
pub struct NewDeployment {
    application: String,
}

/// Lists the projects of the caller's organization.
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<Value>, ApiError> {
    let identity = state
        .guard
        .require_permission(identity.as_ref(), Permission::ReadProject)?;

    Ok(Json(json!({
        "organization_id": identity.organization_id(),
        "projects": [],
    })))
}

/// Creates a project in the caller's organization.
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let identity = state
        .guard
        .require_permission(identity.as_ref(), Permission::WriteProject)?;
    let project: NewProject = parse_body(&body)?;

    let name = project.name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidRequest {
            details: "project name must not be empty".to_string(),
        });
    }

    tracing::info!(
        subject = identity.subject_id(),
        organization = identity.organization_id(),
        project = name,
        "project created"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "organization_id": identity.organization_id(),
            "name": name,
        })),
    ))
}

/// Starts a deployment in an organization.
pub async fn create_deployment(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(organization_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let identity = state
        .guard
        .require_permission(identity.as_ref(), Permission::DeployApplication)?;
    state
        .guard
        .require_same_organization(Some(identity), &organization_id)?;
    let deployment: NewDeployment = parse_body(&body)?;

    tracing::info!(
        subject = identity.subject_id(),
        organization = %organization_id,
        application = %deployment.application,
        "deployment requested"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "organization_id": organization_id,
            "application": deployment.application,
            "status": "queued",
        })),
    ))
}

/// Lists the members of the caller's organization.
pub async fn list_members(RequireAdmin(identity): RequireAdmin) -> Json<Value> {
    Json(json!({
        "organization_id": identity.organization_id(),
        "members": [{
            "subject_id": identity.subject_id(),
            "email": identity.email(),
            "role": identity.role(),
        }],
    }))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidRequest {
        details: e.to_string(),
    })
}
