//! Authorization and multi-tenancy core.
//!
//! This module provides:
//! - **Models**: Organization, User, Membership, Role data structures
//! - **Permission Catalog**: closed permission enumeration with dependency expansion
//! - **Policy Matrix**: the single source of truth for template grants and docs
//! - **Role Templates**: Admin, Member, Guest archetypes with derived permission sets
//! - **Tenant Context Resolver**: request → `AuthContext`, single-flight per request
//! - **Access Control Gate**: request-level and call-site permission enforcement
//! - **Role Service**: administrative role lifecycle with invariant protection
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use upkeep_core::prelude::*;
//!
//! let catalog = Arc::new(PermissionCatalog::new());
//! let resolver = TenantResolver::new(store.clone(), catalog.clone());
//!
//! // Resolve once per request, check as often as needed.
//! let scope = RequestScope::new();
//! let context = resolver.resolve(&scope, &request).await?;
//! let authorized = require_permission(context, Permission::IssueDelete)?;
//!
//! // Or enforce at the router level:
//! let app = Router::new()
//!     .route("/api/v1/issues/:id", delete(delete_issue))
//!     .layer(RequirePermissionLayer::new(
//!         resolver.clone(),
//!         Permission::IssueDelete,
//!         "upkeep.app",
//!     ));
//! ```

pub mod catalog;
pub mod context;
pub mod gate;
pub mod matrix;
pub mod middleware;
pub mod models;
pub mod service;
pub mod templates;

pub use catalog::{Permission, PermissionCatalog, UnknownPermission};
pub use context::{
    AuthContext, AuthorizedContext, RequestIdentity, RequestScope, TenantRequest, TenantResolver,
};
pub use gate::{
    require_all, require_any, require_member_access, require_permission, MemberAccess,
    RedirectTarget,
};
pub use matrix::{AccessLevel, AccessRule, PolicyMatrix};
pub use middleware::{RequirePermissionLayer, RequirePermissionService};
pub use models::{Membership, MembershipId, Organization, OrganizationId, Role, RoleId, User, UserId};
pub use service::{RoleOverrides, RolePatch, RoleService};
pub use templates::RoleTemplate;
