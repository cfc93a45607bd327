#![allow(clippy::result_large_err)]
//! # Upkeep Core
//!
//! Authorization and tenant-context resolution engine for the Upkeep
//! multi-tenant maintenance tracking platform.
//!
//! ## Architecture
//!
//! - **Permission Catalog**: closed permission enumeration with a static dependency DAG
//! - **Policy Matrix**: one table feeding both role-template seeding and permission docs
//! - **Role Templates**: Admin/Member/Guest archetypes instantiated per organization
//! - **Membership Store**: pluggable persistence (PostgreSQL, in-memory)
//! - **Tenant Context Resolver**: request identity + tenant hint resolved into an
//!   `AuthContext`, memoized single-flight per request
//! - **Access Control Gate**: the single enforcement choke-point every guarded
//!   operation calls through
//! - **Role Service**: template instantiation, guarded updates, atomic
//!   delete-and-reassign

pub mod authz;
pub mod config;
pub mod error;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, UpkeepError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::authz::catalog::{Permission, PermissionCatalog};
    pub use crate::authz::context::{
        AuthContext, AuthorizedContext, RequestIdentity, RequestScope, TenantRequest,
        TenantResolver,
    };
    pub use crate::authz::gate::{
        require_all, require_any, require_member_access, require_permission, MemberAccess,
        RedirectTarget,
    };
    pub use crate::authz::matrix::{AccessLevel, AccessRule, PolicyMatrix};
    pub use crate::authz::middleware::{RequirePermissionLayer, RequirePermissionService};
    pub use crate::authz::models::{
        Membership, MembershipId, Organization, OrganizationId, Role, RoleId, User, UserId,
    };
    pub use crate::authz::service::{RoleOverrides, RolePatch, RoleService};
    pub use crate::authz::templates::RoleTemplate;
    pub use crate::error::{
        ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, UpkeepError,
    };
    pub use crate::store::{Database, MembershipStore, MemoryStore};
}
