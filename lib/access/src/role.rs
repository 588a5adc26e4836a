//! Roles and their derivation from identity provider groups.
//!
//! Every authenticated identity carries exactly one role. Roles are ranked:
//! a higher role satisfies any `require_role` check for a lower one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform role held by an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access to projects.
    Member,
    /// Edits projects and files.
    Developer,
    /// Deploys applications and manages members of an organization.
    Admin,
    /// Operator of the whole platform; may act across organizations.
    SuperAdmin,
}

impl Role {
    /// Every role, lowest rank first.
    pub const ALL: [Role; 4] = [Role::Member, Role::Developer, Role::Admin, Role::SuperAdmin];

    /// Returns the wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Developer => "developer",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    /// Returns true if this role ranks at or above `other`.
    #[must_use]
    pub fn at_least(&self, other: Role) -> bool {
        *self >= other
    }

    /// Returns true for the platform operator role.
    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        matches!(self, Self::SuperAdmin)
    }

    /// Derives the highest role granted by a list of provider group names.
    ///
    /// Returns `None` when no group grants platform access.
    #[must_use]
    pub fn from_groups(groups: &[String], mapping: &RoleGroups) -> Option<Self> {
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|role| groups.iter().any(|g| g == mapping.group_for(*role)))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// Provider group names that grant each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGroups {
    pub member: String,
    pub developer: String,
    pub admin: String,
    pub super_admin: String,
}

impl RoleGroups {
    /// Returns the group name that grants `role`.
    #[must_use]
    pub fn group_for(&self, role: Role) -> &str {
        match role {
            Role::Member => &self.member,
            Role::Developer => &self.developer,
            Role::Admin => &self.admin,
            Role::SuperAdmin => &self.super_admin,
        }
    }
}

impl Default for RoleGroups {
    fn default() -> Self {
        Self {
            member: "workbench-members".to_string(),
            developer: "workbench-developers".to_string(),
            admin: "workbench-admins".to_string(),
            super_admin: "workbench-super-admins".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn roles_are_ranked() {
        assert!(Role::SuperAdmin.at_least(Role::Admin));
        assert!(Role::Admin.at_least(Role::Developer));
        assert!(Role::Developer.at_least(Role::Member));
        assert!(Role::Member.at_least(Role::Member));
        assert!(!Role::Member.at_least(Role::Developer));
    }

    #[test]
    fn only_super_admin_is_super_admin() {
        assert!(Role::SuperAdmin.is_super_admin());
        for role in &Role::ALL[..3] {
            assert!(!role.is_super_admin());
        }
    }

    #[test]
    fn from_groups_no_matching_groups() {
        let mapping = RoleGroups::default();
        assert_eq!(Role::from_groups(&groups(&["other", "unrelated"]), &mapping), None);
        assert_eq!(Role::from_groups(&[], &mapping), None);
    }

    #[test]
    fn from_groups_picks_highest_role() {
        let mapping = RoleGroups::default();
        let role = Role::from_groups(
            &groups(&["workbench-members", "workbench-admins", "workbench-developers"]),
            &mapping,
        );
        assert_eq!(role, Some(Role::Admin));
    }

    #[test]
    fn from_groups_member_only() {
        let mapping = RoleGroups::default();
        assert_eq!(
            Role::from_groups(&groups(&["workbench-members"]), &mapping),
            Some(Role::Member)
        );
    }

    #[test]
    fn role_serialization_format() {
        let json = serde_json::to_string(&Role::SuperAdmin).expect("serialize");
        assert_eq!(json, "\"super_admin\"");
        let json = serde_json::to_string(&Role::Member).expect("serialize");
        assert_eq!(json, "\"member\"");
    }

    #[test]
    fn role_parses_from_wire_name() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("owner".parse::<Role>().is_err());
    }
}
