//! The login flow: initiate, callback, logout and identity resolution.
//!
//! Per session the flow moves through:
//!
//! ```text
//! Idle --initiate--> PendingCallback --callback ok--> Authenticated
//!                          |                              |
//!                          +--callback failed--> Idle <---+-- logout / expiry
//! ```
//!
//! The pending authorization is taken out of the session before anything
//! about the callback is checked, so every callback consumes it exactly once.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::client::{IdClaims, IdentityProvider};
use crate::error::{AuthenticationError, SessionError};
use crate::identity::AuthenticatedIdentity;
use crate::pkce::{
    CodeVerifier, NonceToken, StateToken, generate_nonce, generate_state, generate_verifier,
};
use crate::redirect::RedirectTarget;
use crate::role::{Role, RoleGroups};
use crate::session::{SessionId, SessionStore};

/// Session key of the in-flight login attempt.
pub const PENDING_KEY: &str = "oauth.pending";

/// Session key of the authenticated identity.
pub const IDENTITY_KEY: &str = "auth.identity";

/// State of one login attempt, kept in the session until the callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    state: StateToken,
    nonce: NonceToken,
    code_verifier: CodeVerifier,
    redirect_target: RedirectTarget,
}

impl PendingAuthorization {
    /// Returns the post-login redirect target.
    #[must_use]
    pub fn redirect_target(&self) -> &RedirectTarget {
        &self.redirect_target
    }
}

/// Where a session stands in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Nothing in progress, nobody logged in.
    Idle,
    /// Redirected to the provider, waiting for the callback.
    PendingCallback,
    /// An identity is attached to the session.
    Authenticated,
}

/// Lifetimes of session entries written by the flow.
#[derive(Debug, Clone, Copy)]
pub struct FlowSettings {
    /// Lifetime of a pending authorization.
    pub pending_ttl: Duration,
    /// Lifetime of an identity, renewed on each resolved request.
    pub session_ttl: Duration,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::minutes(10),
            session_ttl: Duration::hours(8),
        }
    }
}

/// Result of login initiation.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Provider URL to redirect the browser to.
    pub authorization_url: Url,
    /// Committed session cookie value holding the pending authorization.
    pub session_cookie: String,
}

/// Query parameters received on the callback endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Result of processing a callback.
#[derive(Debug)]
pub enum CallbackResult {
    /// Login completed and a fresh session was established.
    Authenticated {
        /// The new identity.
        identity: Box<AuthenticatedIdentity>,
        /// Where to send the browser.
        redirect_target: RedirectTarget,
        /// Committed cookie value of the rotated session.
        session_cookie: String,
    },
    /// Login failed. The reason is for logs only.
    Failed(AuthenticationError),
}

/// Orchestrates the authorization-code flow with PKCE.
#[derive(Clone)]
pub struct AuthFlow {
    store: SessionStore,
    provider: Option<Arc<dyn IdentityProvider>>,
    settings: FlowSettings,
}

impl AuthFlow {
    /// Creates a flow. Without a provider, initiation reports
    /// `ProviderNotConfigured`.
    #[must_use]
    pub fn new(
        store: SessionStore,
        provider: Option<Arc<dyn IdentityProvider>>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    /// Returns the session store.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Returns the configured lifetimes.
    #[must_use]
    pub fn settings(&self) -> FlowSettings {
        self.settings
    }

    /// Returns true if an identity provider is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Starts a login attempt (`Idle -> PendingCallback`).
    ///
    /// Reuses the caller's session if its cookie verifies, otherwise starts a
    /// new one. Any earlier pending authorization in the session is replaced.
    ///
    /// # Errors
    ///
    /// `ProviderNotConfigured`, `EntropyUnavailable` or `SessionUnavailable`.
    pub async fn initiate(
        &self,
        session_cookie: Option<&str>,
        redirect_to: Option<&str>,
    ) -> Result<LoginRedirect, AuthenticationError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(AuthenticationError::ProviderNotConfigured)?;

        let state = generate_state()?;
        let nonce = generate_nonce()?;
        let code_verifier = generate_verifier()?;

        let session = match session_cookie.and_then(|c| self.store.resolve(c)) {
            Some(session) => session,
            None => self.store.create_session()?,
        };

        let pending = PendingAuthorization {
            redirect_target: RedirectTarget::parse_or_root(redirect_to),
            state,
            nonce,
            code_verifier,
        };
        self.store
            .put(&session, PENDING_KEY, &pending, self.settings.pending_ttl)
            .await
            .map_err(|report| session_failure(&session, report))?;

        let authorization_url =
            provider.authorization_url(&pending.state, &pending.nonce, &pending.code_verifier);
        info!(session = session.log_label(), "login initiated");

        Ok(LoginRedirect {
            authorization_url,
            session_cookie: self.store.commit(&session),
        })
    }

    /// Processes the provider callback.
    ///
    /// Success moves the session to `Authenticated` under a new session id;
    /// any failure leaves it without a pending authorization.
    pub async fn complete(
        &self,
        session_cookie: Option<&str>,
        params: CallbackParams,
    ) -> CallbackResult {
        let session = session_cookie.and_then(|c| self.store.resolve(c));
        match self.try_complete(session.as_ref(), params).await {
            Ok(result) => result,
            Err(err) => {
                log_failure(session.as_ref(), &err);
                CallbackResult::Failed(err)
            }
        }
    }

    async fn try_complete(
        &self,
        session: Option<&SessionId>,
        params: CallbackParams,
    ) -> Result<CallbackResult, AuthenticationError> {
        let session = session.ok_or(AuthenticationError::NoPendingAuthorization)?;

        let pending: PendingAuthorization = self
            .store
            .take(session, PENDING_KEY)
            .await
            .map_err(|report| session_failure(session, report))?
            .ok_or(AuthenticationError::NoPendingAuthorization)?;

        let received_state = params
            .state
            .as_deref()
            .ok_or(AuthenticationError::StateMismatch)?;
        if !pending.state.matches(received_state) {
            return Err(AuthenticationError::StateMismatch);
        }

        if let Some(error) = params.error {
            return Err(AuthenticationError::ProviderDenied { error });
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(AuthenticationError::MissingCode)?;

        let provider = self
            .provider
            .as_ref()
            .ok_or(AuthenticationError::ProviderNotConfigured)?;

        let exchange = provider
            .exchange_code(&code, &pending.code_verifier, &pending.nonce)
            .await?;
        let identity = identity_from_claims(exchange.into_claims(), provider.role_groups())?;

        // A fresh id on login keeps a pre-planted cookie from riding along.
        let fresh = self.store.create_session()?;
        self.store
            .put(&fresh, IDENTITY_KEY, &identity, self.settings.session_ttl)
            .await
            .map_err(|report| session_failure(&fresh, report))?;
        if let Err(report) = self.store.destroy(session).await {
            warn!(error = %report, session = session.log_label(), "failed to destroy pre-login session");
        }

        info!(
            subject = identity.subject_id(),
            role = %identity.role(),
            organization = identity.organization_id(),
            "login completed"
        );

        Ok(CallbackResult::Authenticated {
            identity: Box::new(identity),
            redirect_target: pending.redirect_target,
            session_cookie: self.store.commit(&fresh),
        })
    }

    /// Ends the session (`Authenticated -> Idle`), dropping identity and any
    /// pending authorization.
    ///
    /// # Errors
    ///
    /// `SessionUnavailable` if the backend fails.
    pub async fn logout(&self, session_cookie: Option<&str>) -> Result<(), AuthenticationError> {
        let Some(session) = session_cookie.and_then(|c| self.store.resolve(c)) else {
            return Ok(());
        };
        self.store
            .destroy(&session)
            .await
            .map_err(|report| session_failure(&session, report))?;
        info!(session = session.log_label(), "logged out");
        Ok(())
    }

    /// Resolves the identity attached to a session cookie, renewing its
    /// lifetime on success.
    ///
    /// # Errors
    ///
    /// `SessionUnavailable` if the backend fails.
    pub async fn identity(
        &self,
        session_cookie: Option<&str>,
    ) -> Result<Option<AuthenticatedIdentity>, AuthenticationError> {
        let Some(session) = session_cookie.and_then(|c| self.store.resolve(c)) else {
            return Ok(None);
        };
        let identity: Option<AuthenticatedIdentity> = self
            .store
            .get(&session, IDENTITY_KEY)
            .await
            .map_err(|report| session_failure(&session, report))?;

        if identity.is_some() {
            if let Err(report) = self
                .store
                .touch(&session, IDENTITY_KEY, self.settings.session_ttl)
                .await
            {
                warn!(error = %report, session = session.log_label(), "failed to renew session");
            }
        }
        Ok(identity)
    }

    /// Reports where a session stands in the flow.
    ///
    /// # Errors
    ///
    /// `SessionUnavailable` if the backend fails.
    pub async fn status(&self, session_cookie: Option<&str>) -> Result<FlowState, AuthenticationError> {
        let Some(session) = session_cookie.and_then(|c| self.store.resolve(c)) else {
            return Ok(FlowState::Idle);
        };
        let identity: Option<AuthenticatedIdentity> = self
            .store
            .get(&session, IDENTITY_KEY)
            .await
            .map_err(|report| session_failure(&session, report))?;
        if identity.is_some() {
            return Ok(FlowState::Authenticated);
        }
        let pending: Option<PendingAuthorization> = self
            .store
            .get(&session, PENDING_KEY)
            .await
            .map_err(|report| session_failure(&session, report))?;
        Ok(if pending.is_some() {
            FlowState::PendingCallback
        } else {
            FlowState::Idle
        })
    }
}

/// Maps provider claims onto a platform identity.
///
/// # Errors
///
/// `AccessDenied` when no group grants a role, `MissingClaim` when the email
/// or organization is absent.
pub fn identity_from_claims(
    claims: IdClaims,
    role_groups: &RoleGroups,
) -> Result<AuthenticatedIdentity, AuthenticationError> {
    let role = Role::from_groups(&claims.groups, role_groups).ok_or_else(|| {
        AuthenticationError::AccessDenied {
            subject: claims.subject.clone(),
        }
    })?;
    let email = claims.email.ok_or_else(|| AuthenticationError::MissingClaim {
        claim: "email".to_string(),
    })?;
    let organization_id = claims
        .organization_id
        .ok_or_else(|| AuthenticationError::MissingClaim {
            claim: "organization".to_string(),
        })?;
    let display_name = claims.display_name.unwrap_or_else(|| email.clone());

    Ok(AuthenticatedIdentity::new(
        claims.subject,
        email,
        display_name,
        role,
        organization_id,
    ))
}

fn session_failure(
    session: &SessionId,
    report: rootcause::prelude::Report<SessionError>,
) -> AuthenticationError {
    tracing::error!(error = %report, session = session.log_label(), "session backend failure");
    AuthenticationError::SessionUnavailable
}

fn log_failure(session: Option<&SessionId>, err: &AuthenticationError) {
    let session = session.map_or("none", SessionId::log_label);
    match err {
        AuthenticationError::StateMismatch => {
            warn!(audit = true, session, kind = err.kind(), "callback state mismatch, possible forgery");
        }
        AuthenticationError::InvalidIdToken { .. } => {
            warn!(audit = true, session, kind = err.kind(), error = %err, "ID token rejected");
        }
        AuthenticationError::ProviderUnavailable { .. } | AuthenticationError::SessionUnavailable => {
            warn!(session, kind = err.kind(), error = %err, "login failed, retryable");
        }
        _ => {
            info!(session, kind = err.kind(), error = %err, "login failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TokenExchange;
    use crate::pkce::derive_challenge;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct FakeProvider {
        groups: RoleGroups,
        outcome: Result<IdClaims, AuthenticationError>,
        exchanges: AtomicUsize,
        verifiers: Mutex<Vec<String>>,
        nonces: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn returning(outcome: Result<IdClaims, AuthenticationError>) -> Arc<Self> {
            Arc::new(Self {
                groups: RoleGroups::default(),
                outcome,
                exchanges: AtomicUsize::new(0),
                verifiers: Mutex::new(Vec::new()),
                nonces: Mutex::new(Vec::new()),
            })
        }

        fn developer() -> Arc<Self> {
            Self::returning(Ok(IdClaims::new("sub_dev".to_string())
                .with_email(Some("dev@example.com".to_string()))
                .with_display_name(Some("Dev".to_string()))
                .with_groups(vec!["workbench-developers".to_string()])
                .with_organization(Some("org_acme".to_string()))))
        }

        fn exchanges(&self) -> usize {
            self.exchanges.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_url(
            &self,
            state: &StateToken,
            nonce: &NonceToken,
            verifier: &CodeVerifier,
        ) -> Url {
            let mut url = Url::parse("https://idp.test/authorize").expect("url");
            url.query_pairs_mut()
                .append_pair("state", state.as_str())
                .append_pair("nonce", nonce.as_str())
                .append_pair("code_challenge", derive_challenge(verifier).as_str());
            url
        }

        async fn exchange_code(
            &self,
            _code: &str,
            verifier: &CodeVerifier,
            nonce: &NonceToken,
        ) -> Result<TokenExchange, AuthenticationError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            self.verifiers
                .lock()
                .expect("lock")
                .push(verifier.secret().to_string());
            self.nonces
                .lock()
                .expect("lock")
                .push(nonce.as_str().to_string());
            self.outcome
                .clone()
                .map(|claims| TokenExchange::new("access".to_string(), claims))
        }

        fn role_groups(&self) -> &RoleGroups {
            &self.groups
        }
    }

    fn flow_with(provider: Arc<FakeProvider>, settings: FlowSettings) -> AuthFlow {
        let store = SessionStore::in_memory(SECRET).expect("store");
        AuthFlow::new(store, Some(provider), settings)
    }

    fn flow(provider: Arc<FakeProvider>) -> AuthFlow {
        flow_with(provider, FlowSettings::default())
    }

    fn query(url: &Url, name: &str) -> String {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .expect("parameter present")
    }

    fn callback(state: &str) -> CallbackParams {
        CallbackParams {
            code: Some("code-1".to_string()),
            state: Some(state.to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn initiate_without_provider_fails() {
        let store = SessionStore::in_memory(SECRET).expect("store");
        let flow = AuthFlow::new(store, None, FlowSettings::default());
        assert!(!flow.is_configured());
        assert_eq!(
            flow.initiate(None, None).await.unwrap_err(),
            AuthenticationError::ProviderNotConfigured
        );
    }

    #[tokio::test]
    async fn full_login_establishes_identity() {
        let provider = FakeProvider::developer();
        let flow = flow(provider.clone());

        let login = flow.initiate(None, Some("/projects/7")).await.expect("initiate");
        assert_eq!(
            flow.status(Some(&login.session_cookie)).await.expect("status"),
            FlowState::PendingCallback
        );
        let state = query(&login.authorization_url, "state");

        let result = flow
            .complete(Some(&login.session_cookie), callback(&state))
            .await;
        let CallbackResult::Authenticated {
            identity,
            redirect_target,
            session_cookie,
        } = result
        else {
            panic!("expected success, got {result:?}");
        };

        assert_eq!(identity.role(), Role::Developer);
        assert_eq!(identity.organization_id(), "org_acme");
        assert_eq!(redirect_target.as_str(), "/projects/7");
        assert_ne!(session_cookie, login.session_cookie);

        let resolved = flow.identity(Some(&session_cookie)).await.expect("identity");
        assert_eq!(resolved.as_ref(), Some(identity.as_ref()));
        assert_eq!(
            flow.status(Some(&session_cookie)).await.expect("status"),
            FlowState::Authenticated
        );
        // The pre-login session carries nothing.
        assert_eq!(flow.identity(Some(&login.session_cookie)).await.expect("identity"), None);
    }

    #[tokio::test]
    async fn verifier_sent_on_exchange_matches_challenge() {
        let provider = FakeProvider::developer();
        let flow = flow(provider.clone());
        let login = flow.initiate(None, None).await.expect("initiate");
        let challenge = query(&login.authorization_url, "code_challenge");
        let state = query(&login.authorization_url, "state");

        flow.complete(Some(&login.session_cookie), callback(&state)).await;

        let verifiers = provider.verifiers.lock().expect("lock");
        let verifier = CodeVerifier::new(verifiers[0].clone());
        assert_eq!(derive_challenge(&verifier).as_str(), challenge);
        assert!(!login.authorization_url.as_str().contains(verifier.secret()));
    }

    #[tokio::test]
    async fn nonce_sent_on_exchange_matches_authorization_url() {
        let provider = FakeProvider::developer();
        let flow = flow(provider.clone());
        let login = flow.initiate(None, None).await.expect("initiate");
        let nonce = query(&login.authorization_url, "nonce");
        let state = query(&login.authorization_url, "state");
        assert_ne!(nonce, state);

        flow.complete(Some(&login.session_cookie), callback(&state)).await;

        let nonces = provider.nonces.lock().expect("lock");
        assert_eq!(*nonces, vec![nonce]);
    }

    #[tokio::test]
    async fn each_login_gets_a_fresh_nonce() {
        let flow = flow(FakeProvider::developer());
        let first = flow.initiate(None, None).await.expect("initiate");
        let second = flow.initiate(None, None).await.expect("initiate");
        assert_ne!(
            query(&first.authorization_url, "nonce"),
            query(&second.authorization_url, "nonce")
        );
    }

    #[tokio::test]
    async fn mismatched_state_fails_without_exchange() {
        let provider = FakeProvider::developer();
        let flow = flow(provider.clone());
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");

        let result = flow
            .complete(Some(&login.session_cookie), callback("forged-state"))
            .await;
        assert!(matches!(result, CallbackResult::Failed(AuthenticationError::StateMismatch)));
        assert_eq!(provider.exchanges(), 0);

        // The attempt is burnt: even the right state no longer works.
        let retry = flow.complete(Some(&login.session_cookie), callback(&state)).await;
        assert!(matches!(
            retry,
            CallbackResult::Failed(AuthenticationError::NoPendingAuthorization)
        ));
        assert_eq!(
            flow.status(Some(&login.session_cookie)).await.expect("status"),
            FlowState::Idle
        );
    }

    #[tokio::test]
    async fn missing_state_is_a_mismatch() {
        let flow = flow(FakeProvider::developer());
        let login = flow.initiate(None, None).await.expect("initiate");
        let params = CallbackParams {
            code: Some("code".to_string()),
            ..CallbackParams::default()
        };
        let result = flow.complete(Some(&login.session_cookie), params).await;
        assert!(matches!(result, CallbackResult::Failed(AuthenticationError::StateMismatch)));
    }

    #[tokio::test]
    async fn consumed_authorization_cannot_be_replayed() {
        let provider = FakeProvider::developer();
        let flow = flow(provider.clone());
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");

        let first = flow.complete(Some(&login.session_cookie), callback(&state)).await;
        assert!(matches!(first, CallbackResult::Authenticated { .. }));

        let second = flow.complete(Some(&login.session_cookie), callback(&state)).await;
        assert!(matches!(
            second,
            CallbackResult::Failed(AuthenticationError::NoPendingAuthorization)
        ));
        assert_eq!(provider.exchanges(), 1);
    }

    #[tokio::test]
    async fn second_initiation_invalidates_first_state() {
        let flow = flow(FakeProvider::developer());
        let first = flow.initiate(None, None).await.expect("initiate");
        let stale_state = query(&first.authorization_url, "state");

        let second = flow
            .initiate(Some(&first.session_cookie), None)
            .await
            .expect("initiate");
        assert_eq!(second.session_cookie, first.session_cookie);

        let result = flow
            .complete(Some(&second.session_cookie), callback(&stale_state))
            .await;
        assert!(matches!(result, CallbackResult::Failed(AuthenticationError::StateMismatch)));
    }

    #[tokio::test]
    async fn latest_initiation_succeeds() {
        let flow = flow(FakeProvider::developer());
        let first = flow.initiate(None, None).await.expect("initiate");
        let second = flow
            .initiate(Some(&first.session_cookie), None)
            .await
            .expect("initiate");
        let state = query(&second.authorization_url, "state");
        let result = flow.complete(Some(&second.session_cookie), callback(&state)).await;
        assert!(matches!(result, CallbackResult::Authenticated { .. }));
    }

    #[tokio::test]
    async fn callback_without_session_fails() {
        let flow = flow(FakeProvider::developer());
        let result = flow.complete(None, callback("anything")).await;
        assert!(matches!(
            result,
            CallbackResult::Failed(AuthenticationError::NoPendingAuthorization)
        ));
        let forged = flow.complete(Some("abc.def"), callback("anything")).await;
        assert!(matches!(
            forged,
            CallbackResult::Failed(AuthenticationError::NoPendingAuthorization)
        ));
    }

    #[tokio::test]
    async fn expired_pending_authorization_fails() {
        let settings = FlowSettings {
            pending_ttl: Duration::seconds(-1),
            ..FlowSettings::default()
        };
        let provider = FakeProvider::developer();
        let flow = flow_with(provider.clone(), settings);
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");

        let result = flow.complete(Some(&login.session_cookie), callback(&state)).await;
        assert!(matches!(
            result,
            CallbackResult::Failed(AuthenticationError::NoPendingAuthorization)
        ));
        assert_eq!(provider.exchanges(), 0);
    }

    #[tokio::test]
    async fn rejected_exchange_creates_no_identity() {
        let provider = FakeProvider::returning(Err(AuthenticationError::ExchangeRejected {
            reason: "invalid_grant".to_string(),
        }));
        let flow = flow(provider);
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");

        let result = flow.complete(Some(&login.session_cookie), callback(&state)).await;
        assert!(matches!(
            result,
            CallbackResult::Failed(AuthenticationError::ExchangeRejected { .. })
        ));
        assert_eq!(
            flow.status(Some(&login.session_cookie)).await.expect("status"),
            FlowState::Idle
        );
    }

    #[tokio::test]
    async fn provider_error_parameter_fails() {
        let provider = FakeProvider::developer();
        let flow = flow(provider.clone());
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");
        let params = CallbackParams {
            code: None,
            state: Some(state),
            error: Some("access_denied".to_string()),
        };
        let result = flow.complete(Some(&login.session_cookie), params).await;
        assert!(matches!(
            result,
            CallbackResult::Failed(AuthenticationError::ProviderDenied { .. })
        ));
        assert_eq!(provider.exchanges(), 0);
    }

    #[tokio::test]
    async fn missing_code_fails() {
        let flow = flow(FakeProvider::developer());
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");
        let params = CallbackParams {
            code: Some(String::new()),
            state: Some(state),
            error: None,
        };
        let result = flow.complete(Some(&login.session_cookie), params).await;
        assert!(matches!(result, CallbackResult::Failed(AuthenticationError::MissingCode)));
    }

    #[tokio::test]
    async fn subject_without_role_is_denied() {
        let provider = FakeProvider::returning(Ok(IdClaims::new("sub_x".to_string())
            .with_email(Some("x@example.com".to_string()))
            .with_groups(vec!["unrelated".to_string()])
            .with_organization(Some("org".to_string()))));
        let flow = flow(provider);
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");
        let result = flow.complete(Some(&login.session_cookie), callback(&state)).await;
        assert!(matches!(
            result,
            CallbackResult::Failed(AuthenticationError::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn foreign_redirect_target_falls_back_to_root() {
        let flow = flow(FakeProvider::developer());
        let login = flow
            .initiate(None, Some("https://evil.example.com/phish"))
            .await
            .expect("initiate");
        let state = query(&login.authorization_url, "state");
        let result = flow.complete(Some(&login.session_cookie), callback(&state)).await;
        let CallbackResult::Authenticated { redirect_target, .. } = result else {
            panic!("expected success");
        };
        assert_eq!(redirect_target, RedirectTarget::root());
    }

    #[tokio::test]
    async fn logout_returns_to_idle() {
        let flow = flow(FakeProvider::developer());
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");
        let CallbackResult::Authenticated { session_cookie, .. } =
            flow.complete(Some(&login.session_cookie), callback(&state)).await
        else {
            panic!("expected success");
        };

        flow.logout(Some(&session_cookie)).await.expect("logout");
        assert_eq!(flow.identity(Some(&session_cookie)).await.expect("identity"), None);
        assert_eq!(
            flow.status(Some(&session_cookie)).await.expect("status"),
            FlowState::Idle
        );
        flow.logout(None).await.expect("logout without session");
    }

    #[tokio::test]
    async fn expired_identity_resolves_to_none() {
        let settings = FlowSettings {
            session_ttl: Duration::seconds(-1),
            ..FlowSettings::default()
        };
        let flow = flow_with(FakeProvider::developer(), settings);
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");
        let CallbackResult::Authenticated { session_cookie, .. } =
            flow.complete(Some(&login.session_cookie), callback(&state)).await
        else {
            panic!("expected success");
        };
        assert_eq!(flow.identity(Some(&session_cookie)).await.expect("identity"), None);
    }

    #[tokio::test]
    async fn concurrent_callbacks_authenticate_once() {
        let provider = FakeProvider::developer();
        let flow = flow(provider.clone());
        let login = flow.initiate(None, None).await.expect("initiate");
        let state = query(&login.authorization_url, "state");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flow = flow.clone();
            let cookie = login.session_cookie.clone();
            let params = callback(&state);
            handles.push(tokio::spawn(async move {
                flow.complete(Some(&cookie), params).await
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if matches!(handle.await.expect("join"), CallbackResult::Authenticated { .. }) {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(provider.exchanges(), 1);
    }

    #[test]
    fn identity_requires_email_and_organization() {
        let groups = RoleGroups::default();
        let base = IdClaims::new("s".to_string()).with_groups(vec!["workbench-members".to_string()]);

        let no_email = identity_from_claims(base.clone().with_organization(Some("o".to_string())), &groups);
        assert!(matches!(no_email, Err(AuthenticationError::MissingClaim { ref claim }) if claim == "email"));

        let no_org = identity_from_claims(base.with_email(Some("e@example.com".to_string())), &groups);
        assert!(matches!(no_org, Err(AuthenticationError::MissingClaim { ref claim }) if claim == "organization"));
    }
}
