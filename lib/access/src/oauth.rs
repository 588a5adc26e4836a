//! OAuth2 identity provider configuration.
//!
//! Describes how to reach an external OAuth2/OIDC provider for the
//! authorization-code flow with PKCE, and how to map its claims onto
//! platform identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::ConfigurationError;
use crate::role::RoleGroups;

/// Configuration for the OAuth2 identity provider.
///
/// Fields with defaults can be omitted when loading from environment variables.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// The provider's issuer identifier. ID tokens must carry it as `iss`.
    issuer: String,
    /// The provider's authorization endpoint.
    authorize_url: String,
    /// The provider's token endpoint.
    token_url: String,
    /// Optional userinfo endpoint, used when the token response has no ID token.
    #[serde(default)]
    userinfo_url: Option<String>,
    /// Optional JWKS endpoint with the provider's ID token signing keys.
    /// Without it only tokens signed with the client secret verify.
    #[serde(default)]
    jwks_url: Option<String>,
    /// The redirect URI registered with the provider. Sent byte-for-byte.
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// The claim containing the user's groups. Default: "groups"
    #[serde(default = "default_groups_claim")]
    groups_claim: String,
    /// The claim containing the user's organization. Default: "org_id"
    #[serde(default = "default_organization_claim")]
    organization_claim: String,
    #[serde(default = "default_member_group")]
    member_group: String,
    #[serde(default = "default_developer_group")]
    developer_group: String,
    #[serde(default = "default_admin_group")]
    admin_group: String,
    #[serde(default = "default_super_admin_group")]
    super_admin_group: String,
    /// Upper bound on each back-channel request. Default: 10
    #[serde(default = "default_exchange_timeout_seconds")]
    exchange_timeout_seconds: u64,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

fn default_organization_claim() -> String {
    "org_id".to_string()
}

fn default_member_group() -> String {
    RoleGroups::default().member
}

fn default_developer_group() -> String {
    RoleGroups::default().developer
}

fn default_admin_group() -> String {
    RoleGroups::default().admin
}

fn default_super_admin_group() -> String {
    RoleGroups::default().super_admin
}

fn default_exchange_timeout_seconds() -> u64 {
    10
}

impl OAuthConfig {
    /// Creates a new configuration with defaults for optional fields.
    #[must_use]
    pub fn new(
        client_id: String,
        client_secret: String,
        issuer: String,
        authorize_url: String,
        token_url: String,
        redirect_uri: String,
    ) -> Self {
        OAuthConfigBuilder::new(
            client_id,
            client_secret,
            issuer,
            authorize_url,
            token_url,
            redirect_uri,
        )
        .build()
    }

    /// Creates a configuration builder for more customization.
    #[must_use]
    pub fn builder(
        client_id: String,
        client_secret: String,
        issuer: String,
        authorize_url: String,
        token_url: String,
        redirect_uri: String,
    ) -> OAuthConfigBuilder {
        OAuthConfigBuilder::new(
            client_id,
            client_secret,
            issuer,
            authorize_url,
            token_url,
            redirect_uri,
        )
    }

    /// Checks that every endpoint parses as an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let endpoints = [
            ("oauth.issuer", Some(self.issuer.as_str())),
            ("oauth.authorize_url", Some(self.authorize_url.as_str())),
            ("oauth.token_url", Some(self.token_url.as_str())),
            ("oauth.redirect_uri", Some(self.redirect_uri.as_str())),
            ("oauth.userinfo_url", self.userinfo_url.as_deref()),
            ("oauth.jwks_url", self.jwks_url.as_deref()),
        ];
        for (field, value) in endpoints {
            if let Some(value) = value {
                Url::parse(value).map_err(|e| ConfigurationError::InvalidValue {
                    field: field.to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        if self.client_id.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "oauth.client_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.exchange_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "oauth.exchange_timeout_seconds".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the expected ID token issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the authorization endpoint.
    #[must_use]
    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    /// Returns the token endpoint.
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Returns the userinfo endpoint, if configured.
    #[must_use]
    pub fn userinfo_url(&self) -> Option<&str> {
        self.userinfo_url.as_deref()
    }

    /// Returns the JWKS endpoint, if configured.
    #[must_use]
    pub fn jwks_url(&self) -> Option<&str> {
        self.jwks_url.as_deref()
    }

    /// Returns the redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Returns the name of the claim containing user groups.
    #[must_use]
    pub fn groups_claim(&self) -> &str {
        &self.groups_claim
    }

    /// Returns the name of the claim containing the organization id.
    #[must_use]
    pub fn organization_claim(&self) -> &str {
        &self.organization_claim
    }

    /// Returns the group names that grant each role.
    #[must_use]
    pub fn role_groups(&self) -> RoleGroups {
        RoleGroups {
            member: self.member_group.clone(),
            developer: self.developer_group.clone(),
            admin: self.admin_group.clone(),
            super_admin: self.super_admin_group.clone(),
        }
    }

    /// Returns the back-channel request timeout.
    #[must_use]
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_seconds)
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("issuer", &self.issuer)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("jwks_url", &self.jwks_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Builder for `OAuthConfig`.
#[derive(Debug)]
pub struct OAuthConfigBuilder {
    client_id: String,
    client_secret: String,
    issuer: String,
    authorize_url: String,
    token_url: String,
    userinfo_url: Option<String>,
    jwks_url: Option<String>,
    redirect_uri: String,
    scopes: Vec<String>,
    groups_claim: String,
    organization_claim: String,
    role_groups: RoleGroups,
    exchange_timeout_seconds: u64,
}

impl OAuthConfigBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(
        client_id: String,
        client_secret: String,
        issuer: String,
        authorize_url: String,
        token_url: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            issuer,
            authorize_url,
            token_url,
            userinfo_url: None,
            jwks_url: None,
            redirect_uri,
            scopes: default_scopes().split(',').map(str::to_string).collect(),
            groups_claim: default_groups_claim(),
            organization_claim: default_organization_claim(),
            role_groups: RoleGroups::default(),
            exchange_timeout_seconds: default_exchange_timeout_seconds(),
        }
    }

    /// Sets the OAuth2 scopes to request.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the userinfo endpoint.
    #[must_use]
    pub fn userinfo_url(mut self, url: String) -> Self {
        self.userinfo_url = Some(url);
        self
    }

    /// Sets the JWKS endpoint.
    #[must_use]
    pub fn jwks_url(mut self, url: String) -> Self {
        self.jwks_url = Some(url);
        self
    }

    /// Sets the claim name for user groups.
    #[must_use]
    pub fn groups_claim(mut self, claim: String) -> Self {
        self.groups_claim = claim;
        self
    }

    /// Sets the claim name for the organization id.
    #[must_use]
    pub fn organization_claim(mut self, claim: String) -> Self {
        self.organization_claim = claim;
        self
    }

    /// Sets the group names that grant each role.
    #[must_use]
    pub fn role_groups(mut self, groups: RoleGroups) -> Self {
        self.role_groups = groups;
        self
    }

    /// Sets the back-channel request timeout in seconds.
    #[must_use]
    pub fn exchange_timeout_seconds(mut self, seconds: u64) -> Self {
        self.exchange_timeout_seconds = seconds;
        self
    }

    /// Builds the `OAuthConfig`.
    #[must_use]
    pub fn build(self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id,
            client_secret: self.client_secret,
            issuer: self.issuer,
            authorize_url: self.authorize_url,
            token_url: self.token_url,
            userinfo_url: self.userinfo_url,
            jwks_url: self.jwks_url,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes.join(","),
            groups_claim: self.groups_claim,
            organization_claim: self.organization_claim,
            member_group: self.role_groups.member,
            developer_group: self.role_groups.developer,
            admin_group: self.role_groups.admin,
            super_admin_group: self.role_groups.super_admin,
            exchange_timeout_seconds: self.exchange_timeout_seconds,
        }
    }
}
