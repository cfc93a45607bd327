//! Permission catalog: the closed set of permission identifiers and their
//! dependency edges.
//!
//! Permissions follow the format `resource:action` (`issue:delete`). The set
//! is a closed enumeration so an unknown permission name is a parse error at
//! the storage boundary, never a silent always-false check at a call site.
//!
//! Dependencies form a DAG of "implies" edges: granting `issue:delete`
//! implies `issue:edit`, which implies `issue:view`. The catalog expands a
//! granted set to its transitive closure; the expansion is idempotent,
//! monotone, and deterministic.

use petgraph::graphmap::DiGraphMap;
use petgraph::{algo::is_cyclic_directed, Direction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::models::Role;

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// The closed set of permissions understood by the platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Permission {
    // Issues
    IssueView,
    IssueCreate,
    IssueEdit,
    IssueAssign,
    IssueDelete,

    // Machines
    MachineView,
    MachineCreate,
    MachineEdit,
    MachineDelete,

    // Locations
    LocationView,
    LocationCreate,
    LocationEdit,
    LocationDelete,

    // Attachments
    AttachmentView,
    AttachmentCreate,
    AttachmentDelete,

    // Organization administration
    OrganizationManage,
    RoleManage,
    UserManage,
    AdminViewAnalytics,
}

/// Raised when a stored or user-supplied permission name is not in the catalog.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl Permission {
    /// Every permission in the catalog, in documentation order.
    pub const ALL: [Permission; 20] = [
        Self::IssueView,
        Self::IssueCreate,
        Self::IssueEdit,
        Self::IssueAssign,
        Self::IssueDelete,
        Self::MachineView,
        Self::MachineCreate,
        Self::MachineEdit,
        Self::MachineDelete,
        Self::LocationView,
        Self::LocationCreate,
        Self::LocationEdit,
        Self::LocationDelete,
        Self::AttachmentView,
        Self::AttachmentCreate,
        Self::AttachmentDelete,
        Self::OrganizationManage,
        Self::RoleManage,
        Self::UserManage,
        Self::AdminViewAnalytics,
    ];

    /// Canonical `resource:action` form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IssueView => "issue:view",
            Self::IssueCreate => "issue:create",
            Self::IssueEdit => "issue:edit",
            Self::IssueAssign => "issue:assign",
            Self::IssueDelete => "issue:delete",
            Self::MachineView => "machine:view",
            Self::MachineCreate => "machine:create",
            Self::MachineEdit => "machine:edit",
            Self::MachineDelete => "machine:delete",
            Self::LocationView => "location:view",
            Self::LocationCreate => "location:create",
            Self::LocationEdit => "location:edit",
            Self::LocationDelete => "location:delete",
            Self::AttachmentView => "attachment:view",
            Self::AttachmentCreate => "attachment:create",
            Self::AttachmentDelete => "attachment:delete",
            Self::OrganizationManage => "organization:manage",
            Self::RoleManage => "role:manage",
            Self::UserManage => "user:manage",
            Self::AdminViewAnalytics => "admin:view_analytics",
        }
    }

    /// The resource category (`issue` in `issue:delete`).
    pub fn resource(&self) -> &'static str {
        self.as_str().split_once(':').map(|(r, _)| r).unwrap_or("")
    }

    /// The action (`delete` in `issue:delete`).
    pub fn action(&self) -> &'static str {
        self.as_str().split_once(':').map(|(_, a)| a).unwrap_or("")
    }

    /// Direct dependency edges: holding `self` implies holding each of these.
    pub const fn requires(&self) -> &'static [Permission] {
        match self {
            Self::IssueCreate => &[Self::IssueView],
            Self::IssueEdit => &[Self::IssueView],
            Self::IssueAssign => &[Self::IssueView],
            Self::IssueDelete => &[Self::IssueEdit],

            Self::MachineCreate => &[Self::MachineView],
            Self::MachineEdit => &[Self::MachineView],
            Self::MachineDelete => &[Self::MachineEdit],

            Self::LocationCreate => &[Self::LocationView],
            Self::LocationEdit => &[Self::LocationView],
            Self::LocationDelete => &[Self::LocationEdit],

            // Attachments hang off issues.
            Self::AttachmentCreate => &[Self::AttachmentView, Self::IssueView],
            Self::AttachmentDelete => &[Self::AttachmentView],

            Self::OrganizationManage => &[Self::UserManage, Self::RoleManage],
            Self::AdminViewAnalytics => &[Self::IssueView],

            Self::IssueView
            | Self::MachineView
            | Self::LocationView
            | Self::AttachmentView
            | Self::RoleManage
            | Self::UserManage => &[],
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

impl TryFrom<String> for Permission {
    type Error = UnknownPermission;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Permission> for String {
    fn from(p: Permission) -> Self {
        p.as_str().to_string()
    }
}

impl From<UnknownPermission> for crate::error::UpkeepError {
    fn from(error: UnknownPermission) -> Self {
        crate::error::UpkeepError::new(
            crate::error::ErrorCode::UnknownPermission,
            error.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission Catalog
// ═══════════════════════════════════════════════════════════════════════════════

/// The static dependency graph over the permission catalog, plus the closure
/// operations built on it.
///
/// Constructed once at bootstrap and read-only afterward; cheap to share
/// behind an `Arc`.
#[derive(Debug)]
pub struct PermissionCatalog {
    /// Edges point from a permission to each permission it implies.
    graph: DiGraphMap<Permission, ()>,
}

impl PermissionCatalog {
    /// Build the catalog from the code-defined dependency table.
    ///
    /// The dependency table is a compile-time constant; a cycle in it is a
    /// defect in this crate, caught here at startup.
    pub fn new() -> Self {
        let mut graph = DiGraphMap::new();
        for permission in Permission::ALL {
            graph.add_node(permission);
            for &required in permission.requires() {
                graph.add_edge(permission, required, ());
            }
        }
        assert!(
            !is_cyclic_directed(&graph),
            "permission dependency graph must be acyclic"
        );
        Self { graph }
    }

    /// Expand a granted set to its transitive dependency closure.
    ///
    /// Idempotent and monotone; the result is a set, so iteration order of
    /// the input never affects the output.
    pub fn expand(&self, granted: &HashSet<Permission>) -> HashSet<Permission> {
        let mut closed = HashSet::with_capacity(granted.len());
        let mut stack: Vec<Permission> = granted.iter().copied().collect();

        while let Some(permission) = stack.pop() {
            if closed.insert(permission) {
                stack.extend(
                    self.graph
                        .neighbors_directed(permission, Direction::Outgoing),
                );
            }
        }

        closed
    }

    /// Membership test against the expanded grant set of a role.
    pub fn role_has_permission(&self, role: &Role, permission: Permission) -> bool {
        self.expand(&role.permissions).contains(&permission)
    }

    /// All permissions reachable from a single grant, including itself.
    pub fn closure_of(&self, permission: Permission) -> HashSet<Permission> {
        let mut single = HashSet::with_capacity(1);
        single.insert(permission);
        self.expand(&single)
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
