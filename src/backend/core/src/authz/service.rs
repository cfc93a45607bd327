//! Role and membership administration.
//!
//! These operations run off the request hot path but uphold the same
//! invariants the gate relies on:
//! - system roles are immutable through every mutation path here
//! - each organization keeps exactly one default role
//! - deleting a role reassigns its members to the default role atomically
//! - an organization never loses its last member with user management access

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, UpkeepError};
use crate::store::MembershipStore;

use super::catalog::{Permission, PermissionCatalog};
use super::models::{
    Membership, MembershipId, Organization, OrganizationId, Role, RoleId, User, UserId,
};
use super::templates::RoleTemplate;

// ═══════════════════════════════════════════════════════════════════════════════
// Inputs
// ═══════════════════════════════════════════════════════════════════════════════

/// Optional overrides applied when instantiating a template role.
#[derive(Debug, Clone, Default)]
pub struct RoleOverrides {
    pub name: Option<String>,
}

impl RoleOverrides {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Partial update for a non-system role.
#[derive(Debug, Clone, Default)]
pub struct RolePatch {
    pub name: Option<String>,
    pub permissions: Option<HashSet<Permission>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Administrative role/membership lifecycle operations.
#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn MembershipStore>,
    catalog: Arc<PermissionCatalog>,
}

impl RoleService {
    pub fn new(store: Arc<dyn MembershipStore>, catalog: Arc<PermissionCatalog>) -> Self {
        Self { store, catalog }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Organization onboarding
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a new organization and instantiate every role template for it.
    pub async fn bootstrap_organization(&self, organization: &Organization) -> Result<Vec<Role>> {
        self.store.insert_organization(organization).await?;

        let mut roles = Vec::with_capacity(RoleTemplate::all().len());
        for template in RoleTemplate::all() {
            roles.push(
                self.create_template_role(organization.id, template, RoleOverrides::default())
                    .await?,
            );
        }

        info!(
            organization_id = %organization.id,
            subdomain = %organization.subdomain,
            "Bootstrapped organization roles"
        );
        Ok(roles)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Instantiate a template role for an organization, or reconcile the
    /// existing one.
    ///
    /// The slot is matched by template identity, not name, so a rename never
    /// detaches a role from its template and is never silently undone: when
    /// the slot is occupied only the system/default flags are reconciled.
    pub async fn create_template_role(
        &self,
        organization_id: OrganizationId,
        template: RoleTemplate,
        overrides: RoleOverrides,
    ) -> Result<Role> {
        if let Some(mut existing) = self
            .store
            .role_for_template(organization_id, template)
            .await?
        {
            if existing.is_system != template.is_system()
                || existing.is_default != template.is_default()
            {
                existing.is_system = template.is_system();
                existing.is_default = template.is_default();
                existing.updated_at = chrono::Utc::now();
                self.store.update_role(&existing).await?;
                info!(
                    role_id = %existing.id,
                    template = %template,
                    "Reconciled template role flags"
                );
            }
            return Ok(existing);
        }

        let mut role = template.to_role(organization_id);
        if let Some(name) = overrides.name {
            role.name = name;
        }
        self.store.insert_role(&role).await?;
        info!(
            role_id = %role.id,
            organization_id = %organization_id,
            template = %template,
            name = %role.name,
            "Created template role"
        );
        Ok(role)
    }

    /// Create a custom role with an explicit permission set.
    pub async fn create_custom_role(
        &self,
        organization_id: OrganizationId,
        name: impl Into<String>,
        permissions: HashSet<Permission>,
    ) -> Result<Role> {
        let role = Role::new(organization_id, name, permissions);
        self.store.insert_role(&role).await?;
        info!(role_id = %role.id, organization_id = %organization_id, "Created custom role");
        Ok(role)
    }

    /// Apply a patch to a non-system role.
    pub async fn update_role(&self, role_id: RoleId, patch: RolePatch) -> Result<Role> {
        let mut role = self
            .store
            .role(role_id)
            .await?
            .ok_or_else(|| UpkeepError::not_found("role", role_id.to_string()))?;

        if role.is_system && (patch.name.is_some() || patch.permissions.is_some()) {
            warn!(role_id = %role_id, "Rejected mutation of system role");
            return Err(UpkeepError::invariant_violation(
                "System roles cannot be modified",
            ));
        }

        if let Some(name) = patch.name {
            role.name = name;
        }
        if let Some(permissions) = patch.permissions {
            role.permissions = permissions;
        }
        role.updated_at = chrono::Utc::now();

        self.store.update_role(&role).await?;
        Ok(role)
    }

    /// Delete a non-system role, atomically reassigning every member holding
    /// it to the organization's default role.
    pub async fn delete_role(&self, role_id: RoleId) -> Result<()> {
        let role = self
            .store
            .role(role_id)
            .await?
            .ok_or_else(|| UpkeepError::not_found("role", role_id.to_string()))?;

        if role.is_system {
            warn!(role_id = %role_id, name = %role.name, "Rejected deletion of system role");
            return Err(UpkeepError::invariant_violation(
                "System roles cannot be deleted",
            ));
        }
        if role.is_default {
            warn!(role_id = %role_id, name = %role.name, "Rejected deletion of default role");
            return Err(UpkeepError::invariant_violation(
                "The organization's default role cannot be deleted",
            ));
        }

        let fallback = self
            .store
            .default_role(role.organization_id)
            .await?
            .ok_or_else(|| {
                UpkeepError::internal(format!(
                    "organization {} has no default role",
                    role.organization_id
                ))
            })?;

        let reassigned = self
            .store
            .delete_role_reassigning_members(role.organization_id, role.id, fallback.id)
            .await?;

        info!(
            role_id = %role_id,
            organization_id = %role.organization_id,
            fallback_role_id = %fallback.id,
            reassigned,
            "Deleted role and reassigned members"
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a user to an organization, falling back to the default role when
    /// none is given.
    pub async fn add_member(
        &self,
        user: &User,
        organization_id: OrganizationId,
        role_id: Option<RoleId>,
        invited_by: Option<UserId>,
    ) -> Result<Membership> {
        let role = match role_id {
            Some(id) => self
                .store
                .role(id)
                .await?
                .ok_or_else(|| UpkeepError::not_found("role", id.to_string()))?,
            None => self
                .store
                .default_role(organization_id)
                .await?
                .ok_or_else(|| {
                    UpkeepError::internal(format!(
                        "organization {} has no default role",
                        organization_id
                    ))
                })?,
        };
        if role.organization_id != organization_id {
            return Err(UpkeepError::invariant_violation(
                "Role belongs to a different organization",
            ));
        }

        self.store.upsert_user(user).await?;

        let mut membership = Membership::new(user.id, organization_id, role.id);
        membership.invited_by = invited_by;
        self.store.insert_membership(&membership).await?;

        info!(
            membership_id = %membership.id,
            user_id = %user.id,
            organization_id = %organization_id,
            role = %role.name,
            "Added member"
        );
        Ok(membership)
    }

    /// Move a membership onto a different role in the same organization.
    pub async fn assign_role(
        &self,
        membership_id: MembershipId,
        role_id: RoleId,
    ) -> Result<Membership> {
        let mut membership = self
            .store
            .membership(membership_id)
            .await?
            .ok_or_else(|| UpkeepError::not_found("membership", membership_id.to_string()))?;

        let role = self
            .store
            .role(role_id)
            .await?
            .ok_or_else(|| UpkeepError::not_found("role", role_id.to_string()))?;
        if role.organization_id != membership.organization_id {
            return Err(UpkeepError::invariant_violation(
                "Role belongs to a different organization",
            ));
        }

        self.ensure_not_last_user_manager(&membership, Some(&role))
            .await?;

        self.store.set_membership_role(membership_id, role_id).await?;
        membership.role_id = role_id;

        info!(
            membership_id = %membership_id,
            role_id = %role_id,
            "Reassigned membership role"
        );
        Ok(membership)
    }

    /// Remove a membership from its organization.
    pub async fn remove_member(&self, membership_id: MembershipId) -> Result<()> {
        let membership = self
            .store
            .membership(membership_id)
            .await?
            .ok_or_else(|| UpkeepError::not_found("membership", membership_id.to_string()))?;

        self.ensure_not_last_user_manager(&membership, None).await?;

        self.store.delete_membership(membership_id).await?;
        info!(
            membership_id = %membership_id,
            organization_id = %membership.organization_id,
            "Removed member"
        );
        Ok(())
    }

    /// Reject the mutation when it would leave the organization with nobody
    /// whose expanded grants include `user:manage`.
    ///
    /// `replacement` is the role the membership is moving to, when the
    /// mutation is a reassignment rather than a removal.
    async fn ensure_not_last_user_manager(
        &self,
        membership: &Membership,
        replacement: Option<&Role>,
    ) -> Result<()> {
        let current_role = self
            .store
            .role(membership.role_id)
            .await?
            .ok_or_else(|| {
                UpkeepError::internal(format!(
                    "membership {} references missing role {}",
                    membership.id, membership.role_id
                ))
            })?;

        // Only losing a user:manage holder can violate the invariant.
        if !self
            .catalog
            .role_has_permission(&current_role, Permission::UserManage)
        {
            return Ok(());
        }
        if let Some(role) = replacement {
            if self.catalog.role_has_permission(role, Permission::UserManage) {
                return Ok(());
            }
        }

        let memberships = self
            .store
            .memberships_in_organization(membership.organization_id)
            .await?;
        let roles: HashMap<RoleId, Role> = self
            .store
            .roles_in_organization(membership.organization_id)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let remaining_managers = memberships
            .iter()
            .filter(|m| m.id != membership.id)
            .filter(|m| {
                roles
                    .get(&m.role_id)
                    .is_some_and(|r| self.catalog.role_has_permission(r, Permission::UserManage))
            })
            .count();

        if remaining_managers == 0 {
            warn!(
                membership_id = %membership.id,
                organization_id = %membership.organization_id,
                "Rejected removal of last user manager"
            );
            return Err(UpkeepError::invariant_violation(
                "Cannot remove the organization's last member with user management access",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
