//! Role templates: the archetypes each organization's initial roles are
//! instantiated from.
//!
//! | Template | Flags            | Description                                    |
//! |----------|------------------|------------------------------------------------|
//! | Admin    | system           | Full access to all resources and settings      |
//! | Member   | default          | Day-to-day issue reporting and triage          |
//! | Guest    | system           | Public read access and issue reporting         |
//!
//! Grant sets are derived from the policy matrix, never listed here, so the
//! matrix and the seeded roles cannot drift apart.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::catalog::Permission;
use super::matrix::{AccessLevel, PolicyMatrix};
use super::models::{Organization, OrganizationId, Role};

/// Predefined role archetypes. The enum value — not the role name — is the
/// identity of an organization's template "slot", so renaming an instantiated
/// role does not detach it from its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleTemplate {
    Admin,
    Member,
    Guest,
}

/// Raised when a stored template key is not recognized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown role template: {0}")]
pub struct UnknownTemplate(pub String);

impl RoleTemplate {
    /// Stable storage key for the template slot.
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
            Self::Guest => "GUEST",
        }
    }

    /// Default human-readable name for a fresh instantiation.
    pub const fn default_name(&self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Member => "Member",
            Self::Guest => "Guest",
        }
    }

    /// The matrix column this template draws its grants from.
    pub const fn access_level(&self) -> AccessLevel {
        match self {
            Self::Admin => AccessLevel::Admin,
            Self::Member => AccessLevel::Member,
            Self::Guest => AccessLevel::Guest,
        }
    }

    /// System roles cannot be deleted, renamed, or re-granted.
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::Admin | Self::Guest)
    }

    /// Exactly one template per organization is the default-role slot.
    pub const fn is_default(&self) -> bool {
        matches!(self, Self::Member)
    }

    /// The grant set derived from the policy matrix.
    pub fn permissions(&self) -> HashSet<Permission> {
        PolicyMatrix::grants_for(self.access_level())
    }

    /// Instantiate this template as a role for an organization.
    pub fn to_role(&self, organization_id: OrganizationId) -> Role {
        let mut role = Role::new(organization_id, self.default_name(), self.permissions())
            .from_template(*self);
        role.is_system = self.is_system();
        role.is_default = self.is_default();
        role
    }

    /// All templates, in instantiation order.
    pub fn all() -> [RoleTemplate; 3] {
        [Self::Admin, Self::Member, Self::Guest]
    }

    /// Instantiate every template for a new organization.
    pub fn all_for(organization: &Organization) -> Vec<Role> {
        Self::all()
            .into_iter()
            .map(|t| t.to_role(organization.id))
            .collect()
    }
}

impl fmt::Display for RoleTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for RoleTemplate {
    type Err = UnknownTemplate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "MEMBER" => Ok(Self::Member),
            "GUEST" => Ok(Self::Guest),
            other => Err(UnknownTemplate(other.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
