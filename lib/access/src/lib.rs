//! Authentication and authorization for workbench.
//!
//! This crate provides:
//! - The OAuth2 authorization-code flow with PKCE (`AuthFlow`, `AuthorizationClient`)
//! - Server-side sessions behind signed cookies (`SessionStore`, `SessionBackend`)
//! - Role-based access control (`Role`, `Permission`, `PermissionModel`)
//! - Request-level checks (`AuthorizationGuard`)
//!
//! # Access Control Model
//!
//! Every identity carries exactly one role and one organization:
//! - The role is derived from provider groups; the highest mapped group wins
//! - Roles grant a fixed set of permissions, each a superset of the one below
//! - Resources are scoped to an organization; only super admins cross that line
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use workbench_access::{
//!     AuthenticatedIdentity, AuthorizationGuard, Permission, PermissionModel, Role, RoleGroups,
//! };
//!
//! // Derive the role from provider groups
//! let groups = vec!["workbench-members".to_string(), "workbench-developers".to_string()];
//! let role = Role::from_groups(&groups, &RoleGroups::default()).unwrap();
//! assert_eq!(role, Role::Developer);
//!
//! let identity = AuthenticatedIdentity::new(
//!     "auth0|123456".to_string(),
//!     "alice@example.com".to_string(),
//!     "Alice".to_string(),
//!     role,
//!     "org_acme".to_string(),
//! );
//!
//! // Check permissions before acting
//! let guard = AuthorizationGuard::new(Arc::new(PermissionModel::load().unwrap()));
//! assert!(guard.require_permission(Some(&identity), Permission::WriteProject).is_ok());
//! assert!(guard.require_permission(Some(&identity), Permission::DeployApplication).is_err());
//! assert!(guard.require_same_organization(Some(&identity), "org_other").is_err());
//! ```

pub mod client;
pub mod error;
pub mod flow;
pub mod guard;
pub mod identity;
pub mod oauth;
pub mod permission;
pub mod pkce;
pub mod redirect;
pub mod role;
pub mod session;

// Re-export main types at crate root
pub use client::{AuthorizationClient, IdClaims, IdentityProvider, TokenExchange};
pub use error::{AuthenticationError, AuthorizationError, ConfigurationError, SessionError};
pub use flow::{
    AuthFlow, CallbackParams, CallbackResult, FlowSettings, FlowState, LoginRedirect,
    PendingAuthorization,
};
pub use guard::{AuthorizationGuard, bypasses_organization_scope};
pub use identity::AuthenticatedIdentity;
pub use oauth::{OAuthConfig, OAuthConfigBuilder};
pub use permission::{Permission, PermissionModel, RolePermissionSet};
pub use pkce::{CodeChallenge, CodeVerifier, NonceToken, StateToken};
pub use redirect::RedirectTarget;
pub use role::{Role, RoleGroups};
pub use session::{CookieSigner, MemorySessionBackend, SessionBackend, SessionId, SessionStore};
