//! Policy matrix: the single source of truth for access-level grants.
//!
//! One static table, two consumers that must never diverge:
//!
//! 1. Role-template seeding derives each template's initial permission set
//!    from the `Allowed` cells of its access-level column.
//! 2. Human-facing permission documentation is rendered from the same rows.
//!
//! `OwnerOnly` cells mark permissions a member may exercise against resources
//! they own (e.g. editing their own issue report). They are not part of the
//! blanket template grant; call sites perform the ownership check.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::catalog::Permission;

// ═══════════════════════════════════════════════════════════════════════════════
// Access levels and rules
// ═══════════════════════════════════════════════════════════════════════════════

/// The access-level columns of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Admin,
    Member,
    Guest,
}

impl AccessLevel {
    pub fn all() -> [AccessLevel; 3] {
        [Self::Admin, Self::Member, Self::Guest]
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Admin => "Admin",
            Self::Member => "Member",
            Self::Guest => "Guest",
        };
        f.write_str(s)
    }
}

/// A single cell of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRule {
    Allowed,
    Denied,
    /// Allowed only against resources the caller owns; checked at the call
    /// site, excluded from the template grant.
    OwnerOnly,
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allowed => "Allowed",
            Self::Denied => "Denied",
            Self::OwnerOnly => "Owner only",
        };
        f.write_str(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// The matrix
// ═══════════════════════════════════════════════════════════════════════════════

/// One row of the policy matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixRow {
    pub permission: Permission,
    pub admin: AccessRule,
    pub member: AccessRule,
    pub guest: AccessRule,
}

impl MatrixRow {
    pub const fn rule(&self, level: AccessLevel) -> AccessRule {
        match level {
            AccessLevel::Admin => self.admin,
            AccessLevel::Member => self.member,
            AccessLevel::Guest => self.guest,
        }
    }
}

use AccessRule::{Allowed, Denied, OwnerOnly};

const fn row(
    permission: Permission,
    admin: AccessRule,
    member: AccessRule,
    guest: AccessRule,
) -> MatrixRow {
    MatrixRow {
        permission,
        admin,
        member,
        guest,
    }
}

/// The policy matrix. Rows are grouped by resource category and cover the
/// entire permission catalog.
pub const POLICY_MATRIX: &[MatrixRow] = &[
    // Issues — guests may view and report; members triage; admins do everything.
    row(Permission::IssueView, Allowed, Allowed, Allowed),
    row(Permission::IssueCreate, Allowed, Allowed, Allowed),
    row(Permission::IssueEdit, Allowed, OwnerOnly, Denied),
    row(Permission::IssueAssign, Allowed, Allowed, Denied),
    row(Permission::IssueDelete, Allowed, Denied, Denied),
    // Machines — admin-managed assets, publicly visible.
    row(Permission::MachineView, Allowed, Allowed, Allowed),
    row(Permission::MachineCreate, Allowed, Denied, Denied),
    row(Permission::MachineEdit, Allowed, Denied, Denied),
    row(Permission::MachineDelete, Allowed, Denied, Denied),
    // Locations — admin-managed, publicly visible.
    row(Permission::LocationView, Allowed, Allowed, Allowed),
    row(Permission::LocationCreate, Allowed, Denied, Denied),
    row(Permission::LocationEdit, Allowed, Denied, Denied),
    row(Permission::LocationDelete, Allowed, Denied, Denied),
    // Attachments.
    row(Permission::AttachmentView, Allowed, Allowed, Allowed),
    row(Permission::AttachmentCreate, Allowed, Allowed, Denied),
    row(Permission::AttachmentDelete, Allowed, OwnerOnly, Denied),
    // Organization administration.
    row(Permission::OrganizationManage, Allowed, Denied, Denied),
    row(Permission::RoleManage, Allowed, Denied, Denied),
    row(Permission::UserManage, Allowed, Denied, Denied),
    row(Permission::AdminViewAnalytics, Allowed, Denied, Denied),
];

/// Lookup and derivation helpers over [`POLICY_MATRIX`].
pub struct PolicyMatrix;

impl PolicyMatrix {
    /// The rule for a permission at an access level.
    pub fn rule_for(permission: Permission, level: AccessLevel) -> AccessRule {
        POLICY_MATRIX
            .iter()
            .find(|r| r.permission == permission)
            .map(|r| r.rule(level))
            // Absent rows deny; the coverage test keeps this branch dead.
            .unwrap_or(AccessRule::Denied)
    }

    /// The permission grant derived from the `Allowed` cells of a column.
    /// This is what role-template seeding consumes.
    pub fn grants_for(level: AccessLevel) -> HashSet<Permission> {
        POLICY_MATRIX
            .iter()
            .filter(|r| r.rule(level) == AccessRule::Allowed)
            .map(|r| r.permission)
            .collect()
    }

    /// Render the matrix as a markdown table for human-facing documentation.
    pub fn render_markdown() -> String {
        let mut out = String::from("| Permission | Admin | Member | Guest |\n");
        out.push_str("|------------|-------|--------|-------|\n");

        let mut current_resource = "";
        for row in POLICY_MATRIX {
            let resource = row.permission.resource();
            if resource != current_resource {
                current_resource = resource;
                out.push_str(&format!("| **{}** | | | |\n", resource));
            }
            out.push_str(&format!(
                "| `{}` | {} | {} | {} |\n",
                row.permission, row.admin, row.member, row.guest
            ));
        }

        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_covers_entire_catalog() {
        for permission in Permission::ALL {
            assert!(
                POLICY_MATRIX.iter().any(|r| r.permission == permission),
                "matrix is missing a row for {}",
                permission
            );
        }
        assert_eq!(POLICY_MATRIX.len(), Permission::ALL.len());
    }

    #[test]
    fn test_matrix_has_no_duplicate_rows() {
        for (i, row) in POLICY_MATRIX.iter().enumerate() {
            assert!(
                !POLICY_MATRIX[i + 1..]
                    .iter()
                    .any(|r| r.permission == row.permission),
                "duplicate row for {}",
                row.permission
            );
        }
    }

    #[test]
    fn test_admin_column_allows_everything() {
        for row in POLICY_MATRIX {
            assert_eq!(row.admin, AccessRule::Allowed);
        }
    }

    #[test]
    fn test_guest_grants_are_read_and_report_only() {
        let grants = PolicyMatrix::grants_for(AccessLevel::Guest);
        assert!(grants.contains(&Permission::IssueView));
        assert!(grants.contains(&Permission::IssueCreate));
        assert!(grants.contains(&Permission::MachineView));
        assert!(!grants.contains(&Permission::IssueEdit));
        assert!(!grants.contains(&Permission::UserManage));
    }

    #[test]
    fn test_owner_only_excluded_from_grants() {
        let grants = PolicyMatrix::grants_for(AccessLevel::Member);
        assert_eq!(
            PolicyMatrix::rule_for(Permission::IssueEdit, AccessLevel::Member),
            AccessRule::OwnerOnly
        );
        assert!(!grants.contains(&Permission::IssueEdit));
    }

    #[test]
    fn test_rule_lookup() {
        assert_eq!(
            PolicyMatrix::rule_for(Permission::IssueDelete, AccessLevel::Member),
            AccessRule::Denied
        );
        assert_eq!(
            PolicyMatrix::rule_for(Permission::IssueDelete, AccessLevel::Admin),
            AccessRule::Allowed
        );
    }

    #[test]
    fn test_markdown_covers_every_row() {
        let doc = PolicyMatrix::render_markdown();
        for row in POLICY_MATRIX {
            assert!(
                doc.contains(&format!("`{}`", row.permission)),
                "rendered docs are missing {}",
                row.permission
            );
        }
        assert!(doc.contains("Owner only"));
    }
}
