//! The authenticated identity stored in a session after login.

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Identity established by a successful token exchange.
///
/// Owned by the session store; request handlers only ever see a copy
/// resolved for the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    subject_id: String,
    email: String,
    display_name: String,
    role: Role,
    organization_id: String,
}

impl AuthenticatedIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(
        subject_id: String,
        email: String,
        display_name: String,
        role: Role,
        organization_id: String,
    ) -> Self {
        Self {
            subject_id,
            email,
            display_name,
            role,
            organization_id,
        }
    }

    /// Returns the provider subject identifier.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Returns the email address.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the platform role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the organization the identity belongs to.
    #[must_use]
    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_serialization_roundtrip() {
        let identity = AuthenticatedIdentity::new(
            "sub_123".to_string(),
            "dev@example.com".to_string(),
            "Dev".to_string(),
            Role::Developer,
            "org_1".to_string(),
        );
        let json = serde_json::to_string(&identity).expect("serialize");
        assert!(json.contains("\"role\":\"developer\""));
        let parsed: AuthenticatedIdentity = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(identity, parsed);
    }
}
