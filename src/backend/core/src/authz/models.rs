//! Tenancy data models: Organization, User, Membership, Role, and their identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use super::catalog::Permission;
use super::templates::RoleTemplate;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Strongly-typed user identifier, owned by the identity provider.
    UserId
);
entity_id!(
    /// Strongly-typed organization (tenant) identifier.
    OrganizationId
);
entity_id!(
    /// Strongly-typed membership identifier.
    MembershipId
);
entity_id!(
    /// Strongly-typed role identifier.
    RoleId
);

// ═══════════════════════════════════════════════════════════════════════════════
// Organization (tenant boundary)
// ═══════════════════════════════════════════════════════════════════════════════

/// An organization (tenant). Every scoped entity carries its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Subdomain used for tenant resolution (`acme` in `acme.upkeep.app`).
    pub subdomain: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, subdomain: impl Into<String>) -> Self {
        Self {
            id: OrganizationId::new(),
            name: name.into(),
            subdomain: subdomain.into(),
            created_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// User
// ═══════════════════════════════════════════════════════════════════════════════

/// A user identity. The identity provider owns authentication; this is the
/// profile mirror referenced by memberships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Membership
// ═══════════════════════════════════════════════════════════════════════════════

/// Links exactly one user to exactly one organization with exactly one role.
///
/// Unique on `(user_id, organization_id)` — a user holds at most one
/// membership per organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub role_id: RoleId,
    pub joined_at: DateTime<Utc>,
    /// Who invited this user, when the membership came from an invitation.
    pub invited_by: Option<UserId>,
}

impl Membership {
    pub fn new(user_id: UserId, organization_id: OrganizationId, role_id: RoleId) -> Self {
        Self {
            id: MembershipId::new(),
            user_id,
            organization_id,
            role_id,
            joined_at: Utc::now(),
            invited_by: None,
        }
    }

    pub fn with_inviter(mut self, inviter: UserId) -> Self {
        self.invited_by = Some(inviter);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// A role groups a set of granted permissions under a named identity,
/// scoped to exactly one organization.
///
/// System roles are immutable through normal mutation paths. Exactly one role
/// per organization carries `is_default`; orphaned memberships fall back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    /// Human-readable name; editable on non-system roles.
    pub name: String,
    /// The template slot this role occupies, if it was instantiated from one.
    /// Slot identity survives renames.
    pub template: Option<RoleTemplate>,
    pub is_system: bool,
    pub is_default: bool,
    /// Directly granted permissions. Effective permissions are the dependency
    /// closure of this set, computed by the catalog.
    pub permissions: HashSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Create a custom (non-system, non-default) role.
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        permissions: HashSet<Permission>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RoleId::new(),
            organization_id,
            name: name.into(),
            template: None,
            is_system: false,
            is_default: false,
            permissions,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark this as a protected system role.
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Mark this as the organization's default role.
    pub fn default_role(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Record the template slot this role occupies.
    pub fn from_template(mut self, template: RoleTemplate) -> Self {
        self.template = Some(template);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ids_distinct() {
        let a = RoleId::new();
        let b = RoleId::new();
        assert_ne!(a, b);
        assert_eq!(a, RoleId::from(a.as_uuid()));
    }

    #[test]
    fn test_organization_creation() {
        let org = Organization::new("Acme Amusements", "acme");
        assert_eq!(org.name, "Acme Amusements");
        assert_eq!(org.subdomain, "acme");
    }

    #[test]
    fn test_membership_links_one_user_one_org_one_role() {
        let user = User::new("alice@example.com");
        let org = Organization::new("Acme", "acme");
        let role_id = RoleId::new();

        let membership = Membership::new(user.id, org.id, role_id);
        assert_eq!(membership.user_id, user.id);
        assert_eq!(membership.organization_id, org.id);
        assert_eq!(membership.role_id, role_id);
        assert!(membership.invited_by.is_none());

        let invited = membership.clone().with_inviter(user.id);
        assert_eq!(invited.invited_by, Some(user.id));
    }

    #[test]
    fn test_role_builders() {
        let org = Organization::new("Acme", "acme");
        let role = Role::new(org.id, "Technician", HashSet::new());
        assert!(!role.is_system);
        assert!(!role.is_default);
        assert!(role.template.is_none());

        let system = Role::new(org.id, "Admin", HashSet::new())
            .system()
            .from_template(RoleTemplate::Admin);
        assert!(system.is_system);
        assert_eq!(system.template, Some(RoleTemplate::Admin));
    }
}
