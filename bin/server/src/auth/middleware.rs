//! Authentication extractors for Axum.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use workbench_access::{AuthenticatedIdentity, AuthenticationError, AuthorizationError, Role};

use super::AppState;
use crate::error::ApiError;

/// Extractor for the identity of the current request, if any.
///
/// Fails only when the session backend is unavailable.
pub struct CurrentIdentity(pub Option<AuthenticatedIdentity>);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Authentication(AuthenticationError::SessionUnavailable))?;

        let cookie = jar
            .get(&app_state.session_config.cookie_name)
            .map(|c| c.value().to_string());
        let identity = app_state.flow.identity(cookie.as_deref()).await?;

        Ok(CurrentIdentity(identity))
    }
}

/// Extractor for requiring an authenticated identity.
///
/// Rejects with 401 when nobody is logged in.
pub struct RequireAuth(pub AuthenticatedIdentity);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentIdentity(identity) = CurrentIdentity::from_request_parts(parts, state).await?;
        identity
            .map(RequireAuth)
            .ok_or(ApiError::Authorization(AuthorizationError::Unauthenticated))
    }
}

/// Extractor for requiring the admin role or above.
pub struct RequireAdmin(pub AuthenticatedIdentity);

impl<S> FromRequestParts<S> for RequireAdmin
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let CurrentIdentity(identity) = CurrentIdentity::from_request_parts(parts, state).await?;

        app_state.guard.require_role(identity.as_ref(), Role::Admin)?;
        identity
            .map(RequireAdmin)
            .ok_or(ApiError::Authorization(AuthorizationError::Unauthenticated))
    }
}
