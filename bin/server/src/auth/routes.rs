//! Authentication routes for login, callback, logout and the current-identity endpoint.

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header::LOCATION},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use std::sync::Arc;
use time::Duration as TimeDuration;
use workbench_access::{AuthenticatedIdentity, CallbackParams, CallbackResult};

use super::{AppState, RequireAuth};
use crate::config::SessionConfig;
use crate::error::ApiError;

/// Where failed callbacks are sent.
const ERROR_PATH: &str = "/auth/error";

/// Query parameters for login initiation.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "redirectTo")]
    redirect_to: Option<String>,
}

/// Initiates the login flow by redirecting to the identity provider.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let cookie = session_cookie_value(&jar, &state.session_config);
    let redirect = state
        .flow
        .initiate(cookie.as_deref(), query.redirect_to.as_deref())
        .await?;

    let jar = jar.add(session_cookie(&state.session_config, redirect.session_cookie));
    Ok((jar, found(redirect.authorization_url.as_str())).into_response())
}

/// Handles the callback after the user authenticates with the identity provider.
///
/// Every failure lands on the same error page; the reason is only logged.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let cookie = session_cookie_value(&jar, &state.session_config);

    match state.flow.complete(cookie.as_deref(), params).await {
        CallbackResult::Authenticated {
            redirect_target,
            session_cookie: value,
            ..
        } => {
            let jar = jar.add(session_cookie(&state.session_config, value));
            (jar, found(redirect_target.as_str())).into_response()
        }
        CallbackResult::Failed(_) => found(ERROR_PATH),
    }
}

/// Logs out the user by destroying their session.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let cookie = session_cookie_value(&jar, &state.session_config);
    if let Err(e) = state.flow.logout(cookie.as_deref()).await {
        tracing::warn!(error = %e, "failed to destroy session on logout");
    }

    // Remove session cookie
    let remove_session = Cookie::build((state.session_config.cookie_name.clone(), ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    (jar.add(remove_session), found("/")).into_response()
}

/// Generic sign-in failure page.
pub async fn error_page() -> Html<&'static str> {
    Html(
        "<!doctype html>\
         <html lang=\"en\"><head><meta charset=\"utf-8\"><title>Sign-in failed</title></head>\
         <body><h1>Sign-in failed</h1>\
         <p>We could not sign you in. Please try again.</p>\
         <p><a href=\"/auth/login\">Sign in</a></p></body></html>",
    )
}

/// Returns the identity of the current session.
pub async fn me(RequireAuth(identity): RequireAuth) -> Json<AuthenticatedIdentity> {
    Json(identity)
}

fn session_cookie_value(jar: &CookieJar, config: &SessionConfig) -> Option<String> {
    jar.get(&config.cookie_name).map(|c| c.value().to_string())
}

fn session_cookie(config: &SessionConfig, value: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(config.duration_minutes))
        .build()
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_attributes() {
        let mut config = SessionConfig::with_secret("s".repeat(32));
        config.duration_minutes = 60;
        let cookie = session_cookie(&config, "abc.def".to_string());

        assert_eq!(cookie.name(), "workbench_session");
        assert_eq!(cookie.value(), "abc.def");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(TimeDuration::minutes(60)));
    }

    #[test]
    fn found_is_a_302() {
        let response = found("/projects");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/projects");
    }
}
