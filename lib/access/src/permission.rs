//! Static role-to-permission mapping and set-membership evaluation.
//!
//! The table is built from an exhaustive match over [`Role`] and validated
//! once at startup via [`PermissionModel::load`]. After that the model is
//! immutable and shared across requests.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;
use crate::role::Role;

/// A named capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    ReadProject,
    WriteProject,
    DeleteProject,
    ReadFile,
    WriteFile,
    ReadDeployment,
    DeployApplication,
    ManageMembers,
    ManageOrganization,
}

impl Permission {
    /// Every permission.
    pub const ALL: [Permission; 9] = [
        Permission::ReadProject,
        Permission::WriteProject,
        Permission::DeleteProject,
        Permission::ReadFile,
        Permission::WriteFile,
        Permission::ReadDeployment,
        Permission::DeployApplication,
        Permission::ManageMembers,
        Permission::ManageOrganization,
    ];

    /// Returns the wire name, e.g. `read:project`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadProject => "read:project",
            Self::WriteProject => "write:project",
            Self::DeleteProject => "delete:project",
            Self::ReadFile => "read:file",
            Self::WriteFile => "write:file",
            Self::ReadDeployment => "read:deployment",
            Self::DeployApplication => "deploy:application",
            Self::ManageMembers => "manage:members",
            Self::ManageOrganization => "manage:organization",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission '{s}'"))
    }
}

impl TryFrom<String> for Permission {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.as_str().to_string()
    }
}

/// Grants of the standard table. The match is exhaustive, so adding a role
/// without grants does not compile.
fn standard_grants(role: Role) -> Vec<Permission> {
    use Permission::*;

    match role {
        Role::Member => vec![ReadProject],
        Role::Developer => vec![ReadProject, WriteProject, ReadFile, WriteFile, ReadDeployment],
        Role::Admin => vec![
            ReadProject,
            WriteProject,
            DeleteProject,
            ReadFile,
            WriteFile,
            ReadDeployment,
            DeployApplication,
            ManageMembers,
        ],
        Role::SuperAdmin => Permission::ALL.to_vec(),
    }
}

/// Unvalidated role-to-permission table.
#[derive(Debug, Clone, Default)]
pub struct RolePermissionSet {
    entries: HashMap<Role, Vec<Permission>>,
}

impl RolePermissionSet {
    /// The table shipped with the platform.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_entries(Role::ALL.iter().map(|role| (*role, standard_grants(*role))))
    }

    /// Builds a table from explicit entries.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (Role, Vec<Permission>)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Checks that the table is total, non-empty and free of duplicates.
    ///
    /// # Errors
    ///
    /// Returns the first violation found, in role rank order.
    pub fn validate(self) -> Result<PermissionModel, ConfigurationError> {
        let mut grants = HashMap::with_capacity(Role::ALL.len());

        for role in Role::ALL {
            let listed = self
                .entries
                .get(&role)
                .ok_or(ConfigurationError::UnmappedRole { role })?;

            if listed.is_empty() {
                return Err(ConfigurationError::EmptyRole { role });
            }

            let mut set = HashSet::with_capacity(listed.len());
            for permission in listed {
                if !set.insert(*permission) {
                    return Err(ConfigurationError::DuplicatePermission {
                        role,
                        permission: permission.to_string(),
                    });
                }
            }
            grants.insert(role, set);
        }

        Ok(PermissionModel { grants })
    }
}

/// Validated, immutable permission model.
#[derive(Debug, Clone)]
pub struct PermissionModel {
    grants: HashMap<Role, HashSet<Permission>>,
}

impl PermissionModel {
    /// Builds and validates the standard table.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the table is not well formed.
    pub fn load() -> Result<Self, ConfigurationError> {
        let model = RolePermissionSet::standard().validate()?;
        tracing::debug!(roles = model.grants.len(), "permission model loaded");
        Ok(model)
    }

    /// Returns true iff `permission` is granted to `role`.
    #[must_use]
    pub fn has_permission(&self, role: Role, permission: Permission) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|set| set.contains(&permission))
    }

    /// Returns true if every permission is granted. Vacuously true when empty.
    #[must_use]
    pub fn has_all(&self, role: Role, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.has_permission(role, *p))
    }

    /// Returns true if at least one permission is granted. False when empty.
    #[must_use]
    pub fn has_any(&self, role: Role, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.has_permission(role, *p))
    }

    /// Returns the permissions granted to `role`.
    pub fn permissions(&self, role: Role) -> impl Iterator<Item = Permission> + '_ {
        self.grants.get(&role).into_iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> PermissionModel {
        PermissionModel::load().expect("standard table is valid")
    }

    #[test]
    fn has_permission_matches_table_for_every_pair() {
        let model = model();
        for role in Role::ALL {
            let granted = standard_grants(role);
            for permission in Permission::ALL {
                assert_eq!(
                    model.has_permission(role, permission),
                    granted.contains(&permission),
                    "{role} / {permission}"
                );
            }
        }
    }

    #[test]
    fn member_reads_projects_only() {
        let model = model();
        let granted: Vec<_> = model.permissions(Role::Member).collect();
        assert_eq!(granted, vec![Permission::ReadProject]);
        assert!(!model.has_permission(Role::Member, Permission::DeployApplication));
    }

    #[test]
    fn super_admin_holds_everything() {
        let model = model();
        assert!(model.has_all(Role::SuperAdmin, &Permission::ALL));
    }

    #[test]
    fn has_all_requires_every_permission() {
        let model = model();
        let wanted = [Permission::ReadProject, Permission::DeployApplication];
        assert!(!model.has_all(Role::Developer, &wanted));
        assert!(model.has_all(Role::Admin, &wanted));
        assert!(model.has_all(Role::Member, &[]));
    }

    #[test]
    fn has_any_requires_one_permission() {
        let model = model();
        let wanted = [Permission::DeployApplication, Permission::ReadProject];
        assert!(model.has_any(Role::Member, &wanted));
        assert!(!model.has_any(Role::Member, &[Permission::WriteFile]));
        assert!(!model.has_any(Role::SuperAdmin, &[]));
    }

    #[test]
    fn validate_rejects_unmapped_role() {
        let table = RolePermissionSet::from_entries(
            Role::ALL
                .iter()
                .filter(|r| **r != Role::Admin)
                .map(|r| (*r, standard_grants(*r))),
        );
        assert_eq!(
            table.validate().unwrap_err(),
            ConfigurationError::UnmappedRole { role: Role::Admin }
        );
    }

    #[test]
    fn validate_rejects_empty_role() {
        let table = RolePermissionSet::from_entries(Role::ALL.iter().map(|r| {
            let grants = if *r == Role::Developer {
                Vec::new()
            } else {
                standard_grants(*r)
            };
            (*r, grants)
        }));
        assert_eq!(
            table.validate().unwrap_err(),
            ConfigurationError::EmptyRole {
                role: Role::Developer
            }
        );
    }

    #[test]
    fn validate_rejects_duplicates() {
        let table = RolePermissionSet::from_entries(Role::ALL.iter().map(|r| {
            let mut grants = standard_grants(*r);
            if *r == Role::Member {
                grants.push(Permission::ReadProject);
            }
            (*r, grants)
        }));
        assert!(matches!(
            table.validate().unwrap_err(),
            ConfigurationError::DuplicatePermission { role: Role::Member, .. }
        ));
    }

    #[test]
    fn permission_wire_names_roundtrip() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>(), Ok(permission));
        }
        let json = serde_json::to_string(&Permission::DeployApplication).expect("serialize");
        assert_eq!(json, "\"deploy:application\"");
        assert!(serde_json::from_str::<Permission>("\"launch:rocket\"").is_err());
    }
}
