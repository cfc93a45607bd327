//! Membership storage.
//!
//! [`MembershipStore`] is the persistence seam for the authorization core.
//! Every service takes its store as an explicit constructor argument — there
//! is no module-level database handle — so implementations can be swapped per
//! deployment and per test.
//!
//! Two implementations ship with the crate:
//! - [`postgres::Database`]: sqlx/PostgreSQL, the production path. Every
//!   tenant-scoped query carries an `organization_id` predicate; database
//!   row-level security, when configured, is an independent backstop that
//!   application logic never relies on.
//! - [`memory::MemoryStore`]: in-process state for tests and embedders, with
//!   the same atomicity semantics for multi-row operations.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::Database;

use async_trait::async_trait;

use crate::authz::models::{
    Membership, MembershipId, Organization, OrganizationId, Role, RoleId, User, UserId,
};
use crate::authz::templates::RoleTemplate;
use crate::error::Result;

/// Persistence operations for organizations, users, memberships, and roles.
///
/// Contract notes:
/// - `insert_membership` enforces uniqueness on `(user_id, organization_id)`.
/// - `insert_role` and `update_role` enforce at most one default role per
///   organization.
/// - `delete_role_reassigning_members` is atomic: either every membership on
///   the role moves to the fallback role and the role row is gone, or nothing
///   changed. A membership must never observe a deleted role.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Organizations
    // ─────────────────────────────────────────────────────────────────────────

    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>>;

    async fn organization_by_subdomain(&self, subdomain: &str) -> Result<Option<Organization>>;

    async fn insert_organization(&self, organization: &Organization) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    async fn user(&self, id: UserId) -> Result<Option<User>>;

    async fn upsert_user(&self, user: &User) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    async fn membership(&self, id: MembershipId) -> Result<Option<Membership>>;

    /// The membership linking a user to an organization, if any. This is the
    /// tenant-isolation lookup on the request hot path.
    async fn membership_for_user(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>>;

    async fn memberships_in_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Membership>>;

    async fn insert_membership(&self, membership: &Membership) -> Result<()>;

    async fn set_membership_role(&self, id: MembershipId, role_id: RoleId) -> Result<()>;

    async fn delete_membership(&self, id: MembershipId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    async fn role(&self, id: RoleId) -> Result<Option<Role>>;

    async fn roles_in_organization(&self, organization_id: OrganizationId) -> Result<Vec<Role>>;

    /// The organization's single default role.
    async fn default_role(&self, organization_id: OrganizationId) -> Result<Option<Role>>;

    /// The role occupying an organization's template slot, matched by
    /// template identity rather than name.
    async fn role_for_template(
        &self,
        organization_id: OrganizationId,
        template: RoleTemplate,
    ) -> Result<Option<Role>>;

    async fn insert_role(&self, role: &Role) -> Result<()>;

    async fn update_role(&self, role: &Role) -> Result<()>;

    /// Atomically reassign every membership on `role_id` to
    /// `fallback_role_id` and delete the role row. Returns the number of
    /// reassigned memberships.
    async fn delete_role_reassigning_members(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        fallback_role_id: RoleId,
    ) -> Result<u64>;
}
