//! Authorization decisions for protected operations.
//!
//! Handlers resolve the identity of the current request once and pass it in
//! explicitly. Every check either returns the identity or an
//! [`AuthorizationError`]; nothing is recorded and nothing is partially
//! applied. Call the guard before the protected operation starts.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::AuthorizationError;
use crate::identity::AuthenticatedIdentity;
use crate::permission::{Permission, PermissionModel};
use crate::role::Role;

/// Returns true if `role` may act on resources of any organization.
///
/// This is the only escape hatch from organization scoping.
#[must_use]
pub fn bypasses_organization_scope(role: Role) -> bool {
    role.is_super_admin()
}

/// Evaluates identities against the permission model.
#[derive(Debug, Clone)]
pub struct AuthorizationGuard {
    model: Arc<PermissionModel>,
}

impl AuthorizationGuard {
    /// Creates a guard over a validated model.
    #[must_use]
    pub fn new(model: Arc<PermissionModel>) -> Self {
        Self { model }
    }

    /// Returns the underlying permission model.
    #[must_use]
    pub fn model(&self) -> &PermissionModel {
        &self.model
    }

    /// Requires a single permission.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without identity, `Forbidden` if the role lacks it.
    pub fn require_permission<'a>(
        &self,
        identity: Option<&'a AuthenticatedIdentity>,
        permission: Permission,
    ) -> Result<&'a AuthenticatedIdentity, AuthorizationError> {
        let identity = authenticated(identity)?;
        if self.model.has_permission(identity.role(), permission) {
            Ok(identity)
        } else {
            Err(forbidden(identity, format!("permission {permission}")))
        }
    }

    /// Requires every listed permission.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without identity, `Forbidden` if any one is missing.
    pub fn require_all_permissions<'a>(
        &self,
        identity: Option<&'a AuthenticatedIdentity>,
        permissions: &[Permission],
    ) -> Result<&'a AuthenticatedIdentity, AuthorizationError> {
        let identity = authenticated(identity)?;
        if self.model.has_all(identity.role(), permissions) {
            Ok(identity)
        } else {
            Err(forbidden(identity, format!("all of {}", join(permissions))))
        }
    }

    /// Requires at least one of the listed permissions.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without identity, `Forbidden` if none is held.
    pub fn require_any_permission<'a>(
        &self,
        identity: Option<&'a AuthenticatedIdentity>,
        permissions: &[Permission],
    ) -> Result<&'a AuthenticatedIdentity, AuthorizationError> {
        let identity = authenticated(identity)?;
        if self.model.has_any(identity.role(), permissions) {
            Ok(identity)
        } else {
            Err(forbidden(identity, format!("any of {}", join(permissions))))
        }
    }

    /// Requires `role` or a role ranked above it.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without identity, `Forbidden` if the role ranks lower.
    pub fn require_role<'a>(
        &self,
        identity: Option<&'a AuthenticatedIdentity>,
        role: Role,
    ) -> Result<&'a AuthenticatedIdentity, AuthorizationError> {
        let identity = authenticated(identity)?;
        if identity.role().at_least(role) {
            Ok(identity)
        } else {
            Err(forbidden(identity, format!("role {role}")))
        }
    }

    /// Requires the resource to belong to the identity's organization.
    ///
    /// The super-admin role passes regardless; see
    /// [`bypasses_organization_scope`].
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without identity, `Forbidden` on a foreign organization.
    pub fn require_same_organization<'a>(
        &self,
        identity: Option<&'a AuthenticatedIdentity>,
        resource_organization_id: &str,
    ) -> Result<&'a AuthenticatedIdentity, AuthorizationError> {
        let identity = authenticated(identity)?;
        if identity.organization_id() == resource_organization_id {
            return Ok(identity);
        }
        if bypasses_organization_scope(identity.role()) {
            info!(
                subject = identity.subject_id(),
                home_organization = identity.organization_id(),
                resource_organization = resource_organization_id,
                "organization scope bypassed by super admin"
            );
            return Ok(identity);
        }
        Err(forbidden(identity, "same organization".to_string()))
    }
}

fn authenticated(
    identity: Option<&AuthenticatedIdentity>,
) -> Result<&AuthenticatedIdentity, AuthorizationError> {
    identity.ok_or(AuthorizationError::Unauthenticated)
}

fn forbidden(identity: &AuthenticatedIdentity, requirement: String) -> AuthorizationError {
    debug!(
        subject = identity.subject_id(),
        role = %identity.role(),
        requirement = %requirement,
        "authorization denied"
    );
    AuthorizationError::Forbidden {
        role: identity.role(),
        requirement,
    }
}

fn join(permissions: &[Permission]) -> String {
    permissions
        .iter()
        .map(Permission::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
