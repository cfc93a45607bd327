//! In-memory membership store.
//!
//! Backs the test suites and embedded deployments. All state lives behind a
//! single `parking_lot::RwLock`; multi-row operations mutate a scratch copy
//! and swap it in on success, so a failure mid-operation leaves the committed
//! state untouched — the same observable atomicity the PostgreSQL
//! implementation gets from transactions.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::authz::models::{
    Membership, MembershipId, Organization, OrganizationId, Role, RoleId, User, UserId,
};
use crate::authz::templates::RoleTemplate;
use crate::error::{ErrorCode, Result, UpkeepError};

use super::MembershipStore;

#[derive(Debug, Default, Clone)]
struct State {
    organizations: HashMap<OrganizationId, Organization>,
    users: HashMap<UserId, User>,
    memberships: HashMap<MembershipId, Membership>,
    roles: HashMap<RoleId, Role>,
}

/// In-process [`MembershipStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    /// Read-query counter, used by callers asserting single-flight behavior.
    lookups: AtomicU64,
    /// Fault injection: fail the next multi-row operation after it has
    /// prepared (but not committed) its changes.
    fail_next_transaction: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read queries served since construction.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Arrange for the next multi-row operation to fail mid-flight. The
    /// committed state is left untouched, mimicking a rolled-back
    /// transaction.
    pub fn fail_next_transaction(&self) {
        self.fail_next_transaction.store(true, Ordering::SeqCst);
    }

    fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::SeqCst);
    }

    fn check_default_uniqueness(state: &State, role: &Role) -> Result<()> {
        if role.is_default {
            let other_default = state.roles.values().any(|r| {
                r.organization_id == role.organization_id && r.is_default && r.id != role.id
            });
            if other_default {
                return Err(UpkeepError::invariant_violation(
                    "Organization already has a default role",
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Organizations
    // ─────────────────────────────────────────────────────────────────────────

    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>> {
        self.record_lookup();
        Ok(self.state.read().organizations.get(&id).cloned())
    }

    async fn organization_by_subdomain(&self, subdomain: &str) -> Result<Option<Organization>> {
        self.record_lookup();
        Ok(self
            .state
            .read()
            .organizations
            .values()
            .find(|o| o.subdomain == subdomain)
            .cloned())
    }

    async fn insert_organization(&self, organization: &Organization) -> Result<()> {
        let mut state = self.state.write();
        if state.organizations.contains_key(&organization.id)
            || state
                .organizations
                .values()
                .any(|o| o.subdomain == organization.subdomain)
        {
            return Err(UpkeepError::duplicate("organization"));
        }
        state
            .organizations
            .insert(organization.id, organization.clone());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        self.record_lookup();
        Ok(self.state.read().users.get(&id).cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.state.write().users.insert(user.id, user.clone());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    async fn membership(&self, id: MembershipId) -> Result<Option<Membership>> {
        self.record_lookup();
        Ok(self.state.read().memberships.get(&id).cloned())
    }

    async fn membership_for_user(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>> {
        self.record_lookup();
        Ok(self
            .state
            .read()
            .memberships
            .values()
            .find(|m| m.user_id == user_id && m.organization_id == organization_id)
            .cloned())
    }

    async fn memberships_in_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Membership>> {
        self.record_lookup();
        Ok(self
            .state
            .read()
            .memberships
            .values()
            .filter(|m| m.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<()> {
        let mut state = self.state.write();
        let exists = state.memberships.values().any(|m| {
            m.user_id == membership.user_id && m.organization_id == membership.organization_id
        });
        if exists || state.memberships.contains_key(&membership.id) {
            return Err(UpkeepError::duplicate("membership"));
        }
        state.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    async fn set_membership_role(&self, id: MembershipId, role_id: RoleId) -> Result<()> {
        let mut state = self.state.write();
        let membership = state
            .memberships
            .get_mut(&id)
            .ok_or_else(|| UpkeepError::not_found("membership", id.to_string()))?;
        membership.role_id = role_id;
        Ok(())
    }

    async fn delete_membership(&self, id: MembershipId) -> Result<()> {
        let mut state = self.state.write();
        state
            .memberships
            .remove(&id)
            .ok_or_else(|| UpkeepError::not_found("membership", id.to_string()))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    async fn role(&self, id: RoleId) -> Result<Option<Role>> {
        self.record_lookup();
        Ok(self.state.read().roles.get(&id).cloned())
    }

    async fn roles_in_organization(&self, organization_id: OrganizationId) -> Result<Vec<Role>> {
        self.record_lookup();
        Ok(self
            .state
            .read()
            .roles
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn default_role(&self, organization_id: OrganizationId) -> Result<Option<Role>> {
        self.record_lookup();
        Ok(self
            .state
            .read()
            .roles
            .values()
            .find(|r| r.organization_id == organization_id && r.is_default)
            .cloned())
    }

    async fn role_for_template(
        &self,
        organization_id: OrganizationId,
        template: RoleTemplate,
    ) -> Result<Option<Role>> {
        self.record_lookup();
        Ok(self
            .state
            .read()
            .roles
            .values()
            .find(|r| r.organization_id == organization_id && r.template == Some(template))
            .cloned())
    }

    async fn insert_role(&self, role: &Role) -> Result<()> {
        let mut state = self.state.write();
        if state.roles.contains_key(&role.id) {
            return Err(UpkeepError::duplicate("role"));
        }
        Self::check_default_uniqueness(&state, role)?;
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> Result<()> {
        let mut state = self.state.write();
        if !state.roles.contains_key(&role.id) {
            return Err(UpkeepError::not_found("role", role.id.to_string()));
        }
        Self::check_default_uniqueness(&state, role)?;
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role_reassigning_members(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        fallback_role_id: RoleId,
    ) -> Result<u64> {
        let mut state = self.state.write();

        // Apply to a scratch copy; commit by swapping.
        let mut scratch = state.clone();
        let mut reassigned = 0u64;
        for membership in scratch.memberships.values_mut() {
            if membership.organization_id == organization_id && membership.role_id == role_id {
                membership.role_id = fallback_role_id;
                reassigned += 1;
            }
        }

        if self.fail_next_transaction.swap(false, Ordering::SeqCst) {
            return Err(UpkeepError::new(
                ErrorCode::DatabaseTransactionFailed,
                "Transaction aborted",
            ));
        }

        scratch
            .roles
            .remove(&role_id)
            .filter(|r| r.organization_id == organization_id)
            .ok_or_else(|| UpkeepError::not_found("role", role_id.to_string()))?;

        *state = scratch;
        Ok(reassigned)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn org_with_roles() -> (Organization, Role, Role) {
        let org = Organization::new("Acme", "acme");
        let default = Role::new(org.id, "Member", HashSet::new()).default_role();
        let custom = Role::new(org.id, "Technician", HashSet::new());
        (org, default, custom)
    }

    #[tokio::test]
    async fn test_membership_unique_per_user_and_org() {
        let store = MemoryStore::new();
        let (org, default, _) = org_with_roles();
        store.insert_organization(&org).await.unwrap();
        store.insert_role(&default).await.unwrap();

        let user = User::new("a@example.com");
        store
            .insert_membership(&Membership::new(user.id, org.id, default.id))
            .await
            .unwrap();

        let err = store
            .insert_membership(&Membership::new(user.id, org.id, default.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateRecord);
    }

    #[tokio::test]
    async fn test_same_user_may_join_two_organizations() {
        let store = MemoryStore::new();
        let (org_a, default_a, _) = org_with_roles();
        let org_b = Organization::new("Rival", "rival");
        let default_b = Role::new(org_b.id, "Member", HashSet::new()).default_role();
        store.insert_organization(&org_a).await.unwrap();
        store.insert_organization(&org_b).await.unwrap();
        store.insert_role(&default_a).await.unwrap();
        store.insert_role(&default_b).await.unwrap();

        let user = User::new("a@example.com");
        store
            .insert_membership(&Membership::new(user.id, org_a.id, default_a.id))
            .await
            .unwrap();
        store
            .insert_membership(&Membership::new(user.id, org_b.id, default_b.id))
            .await
            .unwrap();

        assert!(store
            .membership_for_user(user.id, org_a.id)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .membership_for_user(user.id, org_b.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_one_default_role_per_organization() {
        let store = MemoryStore::new();
        let (org, default, _) = org_with_roles();
        store.insert_organization(&org).await.unwrap();
        store.insert_role(&default).await.unwrap();

        let second_default = Role::new(org.id, "Also Default", HashSet::new()).default_role();
        let err = store.insert_role(&second_default).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvariantViolation);
    }

    #[tokio::test]
    async fn test_duplicate_subdomain_rejected() {
        let store = MemoryStore::new();
        let org = Organization::new("Acme", "acme");
        store.insert_organization(&org).await.unwrap();

        let clash = Organization::new("Other Acme", "acme");
        let err = store.insert_organization(&clash).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateRecord);
    }

    #[tokio::test]
    async fn test_reassigning_delete_moves_only_matching_memberships() {
        let store = MemoryStore::new();
        let (org, default, custom) = org_with_roles();
        store.insert_organization(&org).await.unwrap();
        store.insert_role(&default).await.unwrap();
        store.insert_role(&custom).await.unwrap();

        let keeper = Membership::new(UserId::new(), org.id, default.id);
        let mover = Membership::new(UserId::new(), org.id, custom.id);
        store.insert_membership(&keeper).await.unwrap();
        store.insert_membership(&mover).await.unwrap();

        let reassigned = store
            .delete_role_reassigning_members(org.id, custom.id, default.id)
            .await
            .unwrap();
        assert_eq!(reassigned, 1);

        assert!(store.role(custom.id).await.unwrap().is_none());
        let moved = store.membership(mover.id).await.unwrap().unwrap();
        assert_eq!(moved.role_id, default.id);
        let kept = store.membership(keeper.id).await.unwrap().unwrap();
        assert_eq!(kept.role_id, default.id);
    }

    #[tokio::test]
    async fn test_injected_failure_rolls_back() {
        let store = MemoryStore::new();
        let (org, default, custom) = org_with_roles();
        store.insert_organization(&org).await.unwrap();
        store.insert_role(&default).await.unwrap();
        store.insert_role(&custom).await.unwrap();

        let member = Membership::new(UserId::new(), org.id, custom.id);
        store.insert_membership(&member).await.unwrap();

        store.fail_next_transaction();
        let err = store
            .delete_role_reassigning_members(org.id, custom.id, default.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DatabaseTransactionFailed);

        // Nothing moved, nothing deleted.
        assert!(store.role(custom.id).await.unwrap().is_some());
        let unchanged = store.membership(member.id).await.unwrap().unwrap();
        assert_eq!(unchanged.role_id, custom.id);

        // The failpoint is one-shot.
        store
            .delete_role_reassigning_members(org.id, custom.id, default.id)
            .await
            .unwrap();
        assert!(store.role(custom.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_counter_tracks_reads_only() {
        let store = MemoryStore::new();
        let org = Organization::new("Acme", "acme");
        store.insert_organization(&org).await.unwrap();
        assert_eq!(store.lookup_count(), 0);

        store.organization(org.id).await.unwrap();
        store.organization_by_subdomain("acme").await.unwrap();
        assert_eq!(store.lookup_count(), 2);
    }
}
