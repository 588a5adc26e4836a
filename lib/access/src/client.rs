//! Back-channel client for the OpenID Connect identity provider.
//!
//! Builds authorization URLs and exchanges authorization codes for tokens
//! using the openidconnect crate. The returned ID token is verified against
//! the configured issuer, the client id, its expiry and the login nonce
//! before any claim is used.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oauth2::{HttpRequest, HttpResponse, RequestTokenError};
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreJsonWebKeySet, CoreJwsSigningAlgorithm,
};
use openidconnect::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce,
    OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenResponse,
    TokenUrl,
};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::{AuthenticationError, ConfigurationError};
use crate::oauth::OAuthConfig;
use crate::pkce::{CodeVerifier, NonceToken, StateToken};
use crate::role::RoleGroups;

/// Claims describing the authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdClaims {
    /// The subject claim (unique user identifier from the provider).
    pub subject: String,
    /// Email address.
    pub email: Option<String>,
    /// Display name (from `name` or `preferred_username`).
    pub display_name: Option<String>,
    /// Group memberships from the configured groups claim.
    pub groups: Vec<String>,
    /// Organization from the configured organization claim.
    pub organization_id: Option<String>,
}

impl IdClaims {
    /// Creates claims for a subject with nothing else set.
    #[must_use]
    pub fn new(subject: String) -> Self {
        Self {
            subject,
            email: None,
            display_name: None,
            groups: Vec::new(),
            organization_id: None,
        }
    }

    /// Sets the email claim.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    /// Sets the groups.
    #[must_use]
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Sets the organization.
    #[must_use]
    pub fn with_organization(mut self, organization_id: Option<String>) -> Self {
        self.organization_id = organization_id;
        self
    }

    /// Extracts claims from a JSON claim set (ID token payload or userinfo).
    ///
    /// # Errors
    ///
    /// Returns `MissingClaim` if `sub` is absent or empty.
    pub fn from_json(
        payload: &serde_json::Value,
        groups_claim: &str,
        organization_claim: &str,
    ) -> Result<Self, AuthenticationError> {
        let string = |name: &str| {
            payload
                .get(name)
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let subject = string("sub").ok_or_else(|| AuthenticationError::MissingClaim {
            claim: "sub".to_string(),
        })?;

        // Providers emit either a list of groups or a single group string.
        let groups = match payload.get(groups_claim) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(group)) => vec![group.clone()],
            _ => Vec::new(),
        };

        Ok(Self::new(subject)
            .with_email(string("email"))
            .with_display_name(string("name").or_else(|| string("preferred_username")))
            .with_groups(groups)
            .with_organization(string(organization_claim)))
    }
}

/// Result of a successful code exchange.
#[derive(Clone)]
pub struct TokenExchange {
    access_token: String,
    claims: IdClaims,
}

impl TokenExchange {
    /// Creates an exchange result.
    #[must_use]
    pub fn new(access_token: String, claims: IdClaims) -> Self {
        Self {
            access_token,
            claims,
        }
    }

    /// Returns the provider access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the identity claims.
    #[must_use]
    pub fn claims(&self) -> &IdClaims {
        &self.claims
    }

    /// Consumes the result, returning the claims.
    #[must_use]
    pub fn into_claims(self) -> IdClaims {
        self.claims
    }
}

impl fmt::Debug for TokenExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchange")
            .field("access_token", &"[redacted]")
            .field("claims", &self.claims)
            .finish()
    }
}

/// The identity provider as seen by the login flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Builds the URL the browser is redirected to. The S256 challenge is
    /// derived from `verifier`; the verifier itself never leaves the server.
    fn authorization_url(
        &self,
        state: &StateToken,
        nonce: &NonceToken,
        verifier: &CodeVerifier,
    ) -> Url;

    /// Exchanges an authorization code for tokens and identity claims.
    ///
    /// An ID token must carry `nonce`.
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &CodeVerifier,
        nonce: &NonceToken,
    ) -> Result<TokenExchange, AuthenticationError>;

    /// Group names that grant each platform role.
    fn role_groups(&self) -> &RoleGroups;
}

/// Token endpoint error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

/// ID token signature algorithms accepted from the provider.
const ALLOWED_SIGNING_ALGS: [CoreJwsSigningAlgorithm; 3] = [
    CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
    CoreJwsSigningAlgorithm::EcdsaP256Sha256,
    CoreJwsSigningAlgorithm::HmacSha256,
];

/// OpenID Connect authorization-code client.
pub struct AuthorizationClient {
    config: OAuthConfig,
    client_id: ClientId,
    client_secret: ClientSecret,
    issuer: IssuerUrl,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    userinfo_url: Option<Url>,
    jwks_url: Option<Url>,
    role_groups: RoleGroups,
    http: reqwest::Client,
}

impl AuthorizationClient {
    /// Creates a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if an endpoint is not a valid URL or the
    /// HTTP client cannot be built.
    pub fn new(config: OAuthConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let invalid = |field: &str| {
            let field = field.to_string();
            move |e: url::ParseError| ConfigurationError::InvalidValue {
                field,
                reason: e.to_string(),
            }
        };
        let issuer = IssuerUrl::new(config.issuer().to_string()).map_err(invalid("oauth.issuer"))?;
        let auth_url =
            AuthUrl::new(config.authorize_url().to_string()).map_err(invalid("oauth.authorize_url"))?;
        let token_url =
            TokenUrl::new(config.token_url().to_string()).map_err(invalid("oauth.token_url"))?;
        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string())
            .map_err(invalid("oauth.redirect_uri"))?;
        let userinfo_url = config
            .userinfo_url()
            .map(|u| Url::parse(u).map_err(invalid("oauth.userinfo_url")))
            .transpose()?;
        let jwks_url = config
            .jwks_url()
            .map(|u| Url::parse(u).map_err(invalid("oauth.jwks_url")))
            .transpose()?;

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.exchange_timeout())
            .build()
            .map_err(|e| ConfigurationError::InvalidValue {
                field: "oauth".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            role_groups: config.role_groups(),
            config,
            issuer,
            auth_url,
            token_url,
            redirect_url,
            userinfo_url,
            jwks_url,
            http,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Builds the authorization endpoint URL for one login attempt.
    ///
    /// Deterministic in its inputs. Any query already on the configured
    /// endpoint is kept.
    #[must_use]
    pub fn build_authorization_url(
        &self,
        state: &StateToken,
        nonce: &NonceToken,
        verifier: &CodeVerifier,
    ) -> Url {
        let client = CoreClient::new(
            self.client_id.clone(),
            self.issuer.clone(),
            CoreJsonWebKeySet::new(Vec::new()),
        )
        .set_client_secret(self.client_secret.clone())
        .set_auth_uri(self.auth_url.clone())
        .set_token_uri(self.token_url.clone())
        .set_redirect_uri(self.redirect_url.clone());

        let pkce_challenge = PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(
            verifier.secret().to_string(),
        ));
        let state = state.as_str().to_string();
        let nonce = nonce.as_str().to_string();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                move || CsrfToken::new(state),
                move || Nonce::new(nonce),
            )
            .set_pkce_challenge(pkce_challenge);

        // openid is always requested
        for scope in self.config.scopes() {
            if scope != "openid" {
                auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
            }
        }

        let (auth_url, _, _) = auth_request.url();
        auth_url
    }

    /// Exchanges an authorization code at the token endpoint.
    ///
    /// # Errors
    ///
    /// - `ProviderUnavailable` on transport failures, timeouts, 5xx and 429
    /// - `ExchangeRejected` on any other error answer or a malformed body
    /// - `InvalidIdToken` if the ID token fails verification
    /// - `MissingClaim` if the claims lack a subject
    #[instrument(skip_all, fields(token_url = %self.token_url.as_str()))]
    pub async fn exchange(
        &self,
        code: &str,
        verifier: &CodeVerifier,
        nonce: &NonceToken,
    ) -> Result<TokenExchange, AuthenticationError> {
        let jwks = self.signing_keys().await?;
        let client = CoreClient::new(self.client_id.clone(), self.issuer.clone(), jwks)
            .set_client_secret(self.client_secret.clone())
            .set_auth_uri(self.auth_url.clone())
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let send = |request: HttpRequest| send_request(self.http.clone(), request);

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(verifier.secret().to_string()))
            .request_async(&send)
            .await
            .map_err(|e| match e {
                RequestTokenError::Request(failure) => {
                    warn!(error = %failure, "token endpoint request failed");
                    AuthenticationError::ProviderUnavailable {
                        reason: failure.reason,
                    }
                }
                RequestTokenError::ServerResponse(response) => {
                    AuthenticationError::ExchangeRejected {
                        reason: response.error().to_string(),
                    }
                }
                RequestTokenError::Parse(e, _) => AuthenticationError::ExchangeRejected {
                    reason: format!("malformed token response: {e}"),
                },
                RequestTokenError::Other(reason) => {
                    AuthenticationError::ExchangeRejected { reason }
                }
            })?;

        let access_token = token_response.access_token().secret().clone();

        let payload = match (token_response.id_token(), &self.userinfo_url) {
            (Some(id_token), _) => {
                let id_token_verifier = client
                    .id_token_verifier()
                    .set_allowed_algs(ALLOWED_SIGNING_ALGS);
                id_token
                    .claims(&id_token_verifier, &Nonce::new(nonce.as_str().to_string()))
                    .map_err(|e| {
                        warn!(error = %e, "ID token verification failed");
                        AuthenticationError::InvalidIdToken {
                            reason: e.to_string(),
                        }
                    })?;

                // Custom claims (groups, organization) are read from the
                // verified token's payload.
                let raw = serde_json::to_value(id_token).map_err(|e| {
                    AuthenticationError::InvalidIdToken {
                        reason: format!("failed to serialize id_token: {e}"),
                    }
                })?;
                let raw = raw.as_str().ok_or_else(|| AuthenticationError::InvalidIdToken {
                    reason: "id_token is not a compact JWT".to_string(),
                })?;
                decode_jwt_payload(raw)?
            }
            (None, Some(userinfo_url)) => self.fetch_userinfo(userinfo_url, &access_token).await?,
            (None, None) => {
                return Err(AuthenticationError::ExchangeRejected {
                    reason: "token response carries no id_token".to_string(),
                });
            }
        };

        let claims = IdClaims::from_json(
            &payload,
            self.config.groups_claim(),
            self.config.organization_claim(),
        )?;
        debug!(subject = %claims.subject, groups = claims.groups.len(), "code exchanged");

        Ok(TokenExchange::new(access_token, claims))
    }

    /// Loads the provider's signing keys. Without a JWKS endpoint the set is
    /// empty and only HMAC tokens keyed with the client secret verify.
    async fn signing_keys(&self) -> Result<CoreJsonWebKeySet, AuthenticationError> {
        let Some(jwks_url) = &self.jwks_url else {
            return Ok(CoreJsonWebKeySet::new(Vec::new()));
        };

        let response = self
            .http
            .get(jwks_url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| AuthenticationError::ExchangeRejected {
            reason: format!("malformed JWKS response: {e}"),
        })
    }

    async fn fetch_userinfo(
        &self,
        userinfo_url: &Url,
        access_token: &str,
    ) -> Result<serde_json::Value, AuthenticationError> {
        let response = self
            .http
            .get(userinfo_url.clone())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| AuthenticationError::ExchangeRejected {
            reason: format!("malformed userinfo response: {e}"),
        })
    }
}

#[async_trait]
impl IdentityProvider for AuthorizationClient {
    fn authorization_url(
        &self,
        state: &StateToken,
        nonce: &NonceToken,
        verifier: &CodeVerifier,
    ) -> Url {
        self.build_authorization_url(state, nonce, verifier)
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &CodeVerifier,
        nonce: &NonceToken,
    ) -> Result<TokenExchange, AuthenticationError> {
        self.exchange(code, verifier, nonce).await
    }

    fn role_groups(&self) -> &RoleGroups {
        &self.role_groups
    }
}

/// A token endpoint call that failed in a way worth retrying.
#[derive(Debug)]
struct TransientFailure {
    reason: String,
}

impl fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for TransientFailure {}

/// Sends a token endpoint request for the openidconnect client.
///
/// Transport errors, 5xx and 429 come back as `TransientFailure`; every
/// other answer is handed on for the client to parse.
async fn send_request(
    client: reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, TransientFailure> {
    let request = reqwest::Request::try_from(request).map_err(|e| TransientFailure {
        reason: format!("invalid request: {e}"),
    })?;

    let response = client.execute(request).await.map_err(|e| TransientFailure {
        reason: transport_reason(&e),
    })?;

    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TransientFailure {
            reason: format!("HTTP {}", status.as_u16()),
        });
    }

    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|e| TransientFailure {
        reason: transport_reason(&e),
    })?;

    let mut builder = http::Response::builder().status(status);
    if let Some(builder_headers) = builder.headers_mut() {
        *builder_headers = headers;
    }
    builder.body(body.to_vec()).map_err(|e| TransientFailure {
        reason: format!("invalid response: {e}"),
    })
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else {
        format!("request failed: {e}")
    }
}

fn transport_error(e: reqwest::Error) -> AuthenticationError {
    warn!(error = %e, "identity provider request failed");
    AuthenticationError::ProviderUnavailable {
        reason: transport_reason(&e),
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> AuthenticationError {
    let code = serde_json::from_slice::<TokenErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| "no error code".to_string());
    let reason = format!("HTTP {}: {code}", status.as_u16());

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AuthenticationError::ProviderUnavailable { reason }
    } else {
        AuthenticationError::ExchangeRejected { reason }
    }
}

/// Decodes the payload segment of a compact JWT whose signature has already
/// been verified.
fn decode_jwt_payload(token: &str) -> Result<serde_json::Value, AuthenticationError> {
    let rejected = |reason: String| AuthenticationError::InvalidIdToken { reason };

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(rejected("id_token is not a compact JWT".to_string()));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| rejected(format!("failed to decode id_token payload: {e}")))?;
    serde_json::from_slice(&payload)
        .map_err(|e| rejected(format!("failed to parse id_token payload: {e}")))
}
