//! Integration tests for tenant context resolution and the access control gate.

use std::collections::HashSet;
use std::sync::Arc;

use upkeep_core::error::ErrorCode;
use upkeep_core::prelude::*;

struct Harness {
    store: Arc<MemoryStore>,
    resolver: TenantResolver,
    service: RoleService,
    org: Organization,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(PermissionCatalog::new());
        let resolver = TenantResolver::new(store.clone(), catalog.clone());
        let service = RoleService::new(store.clone(), catalog);

        let org = Organization::new("Acme Amusements", "acme");
        service.bootstrap_organization(&org).await.unwrap();

        Self {
            store,
            resolver,
            service,
            org,
        }
    }

    async fn role(&self, template: RoleTemplate) -> Role {
        self.store
            .role_for_template(self.org.id, template)
            .await
            .unwrap()
            .expect("template role missing")
    }

    async fn member(&self, email: &str, template: RoleTemplate) -> User {
        let user = User::new(email);
        let role = self.role(template).await;
        self.service
            .add_member(&user, self.org.id, Some(role.id), None)
            .await
            .unwrap();
        user
    }

    fn request_for(&self, user: &User) -> TenantRequest {
        TenantRequest::for_identity(RequestIdentity::new(user.id, user.email.clone()))
            .with_subdomain(self.org.subdomain.clone())
    }

    async fn resolve(&self, request: &TenantRequest) -> AuthContext {
        let scope = RequestScope::new();
        self.resolver.resolve(&scope, request).await.unwrap().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_resolution_chain() {
    let h = Harness::new().await;
    let user = h.member("alice@example.com", RoleTemplate::Member).await;

    let context = h.resolve(&h.request_for(&user)).await;
    let ctx = context.authorized().expect("member should resolve");

    assert_eq!(ctx.user.id, user.id);
    assert_eq!(ctx.organization.id, h.org.id);
    assert_eq!(ctx.membership.user_id, user.id);
    assert_eq!(ctx.role.template, Some(RoleTemplate::Member));
}

#[tokio::test]
async fn test_tenant_isolation_end_to_end() {
    let h = Harness::new().await;
    let user = h.member("alice@example.com", RoleTemplate::Admin).await;

    // A second tenant with its own roles; the user is no member of it.
    let rival = Organization::new("Rival Arcades", "rival");
    h.service.bootstrap_organization(&rival).await.unwrap();

    let request = TenantRequest::for_identity(RequestIdentity::new(user.id, user.email.clone()))
        .with_subdomain("rival");
    let context = h.resolve(&request).await;

    // Admin in one tenant means nothing in another.
    assert!(matches!(context, AuthContext::Unauthorized { .. }));
    let err = require_permission(&context, Permission::IssueView).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MembershipMissing);
}

#[tokio::test]
async fn test_role_change_visible_to_next_request_only() {
    let h = Harness::new().await;
    h.member("root@example.com", RoleTemplate::Admin).await;
    let user = h.member("alice@example.com", RoleTemplate::Admin).await;
    let request = h.request_for(&user);

    // An in-flight request resolves once and keeps that view.
    let scope = RequestScope::new();
    let before = h.resolver.resolve(&scope, &request).await.unwrap();
    assert!(require_permission(before, Permission::RoleManage).is_ok());

    let membership = h
        .store
        .membership_for_user(user.id, h.org.id)
        .await
        .unwrap()
        .unwrap();
    let member_role = h.role(RoleTemplate::Member).await;
    h.service
        .assign_role(membership.id, member_role.id)
        .await
        .unwrap();

    // Same scope: the memoized context still grants the old role.
    let stale = h.resolver.resolve(&scope, &request).await.unwrap();
    assert!(require_permission(stale, Permission::RoleManage).is_ok());

    // A fresh request observes the demotion.
    let context = h.resolve(&request).await;
    let err = require_permission(&context, Permission::RoleManage).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn test_deleted_role_never_observed_by_fresh_request() {
    let h = Harness::new().await;
    h.member("root@example.com", RoleTemplate::Admin).await;

    let custom = h
        .service
        .create_custom_role(
            h.org.id,
            "Technician",
            [Permission::IssueEdit].into_iter().collect(),
        )
        .await
        .unwrap();
    let user = User::new("tech@example.com");
    h.service
        .add_member(&user, h.org.id, Some(custom.id), None)
        .await
        .unwrap();

    h.service.delete_role(custom.id).await.unwrap();

    // The membership survived on the default role; resolution never trips
    // over the deleted row.
    let context = h.resolve(&h.request_for(&user)).await;
    let ctx = context.authorized().expect("member should still resolve");
    assert_eq!(ctx.role.template, Some(RoleTemplate::Member));
}

// ─────────────────────────────────────────────────────────────────────────────
// Gate semantics
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gate_matches_policy_matrix() {
    let h = Harness::new().await;
    let admin = h.member("admin@example.com", RoleTemplate::Admin).await;
    let member = h.member("member@example.com", RoleTemplate::Member).await;
    let guest = h.member("guest@example.com", RoleTemplate::Guest).await;

    let admin_ctx = h.resolve(&h.request_for(&admin)).await;
    let member_ctx = h.resolve(&h.request_for(&member)).await;
    let guest_ctx = h.resolve(&h.request_for(&guest)).await;

    assert!(require_permission(&admin_ctx, Permission::IssueDelete).is_ok());
    assert!(require_permission(&member_ctx, Permission::IssueDelete).is_err());
    assert!(require_permission(&guest_ctx, Permission::IssueDelete).is_err());

    assert!(require_permission(&member_ctx, Permission::IssueAssign).is_ok());
    assert!(require_permission(&guest_ctx, Permission::IssueAssign).is_err());

    // Guests may still view and report.
    assert!(require_permission(&guest_ctx, Permission::IssueView).is_ok());
    assert!(require_permission(&guest_ctx, Permission::IssueCreate).is_ok());
}

#[tokio::test]
async fn test_both_enforcement_idioms_agree() {
    let h = Harness::new().await;
    let member = h.member("member@example.com", RoleTemplate::Member).await;
    let context = h.resolve(&h.request_for(&member)).await;

    for permission in [
        Permission::IssueView,
        Permission::IssueDelete,
        Permission::RoleManage,
        Permission::MachineView,
    ] {
        let throwing = require_permission(&context, permission).is_ok();
        let interactive = require_member_access(&context, permission)
            .map(|a| a.is_granted())
            .unwrap_or(false);
        assert_eq!(
            throwing, interactive,
            "idioms disagree on {}",
            permission
        );
    }
}

#[tokio::test]
async fn test_interactive_idiom_redirects_instead_of_failing() {
    let h = Harness::new().await;
    let user = h.member("alice@example.com", RoleTemplate::Member).await;

    let anonymous = h.resolve(&TenantRequest::anonymous()).await;
    let access = require_member_access(&anonymous, Permission::IssueView).unwrap();
    assert!(matches!(
        access,
        MemberAccess::Redirect(RedirectTarget::Login)
    ));

    // Identity without a tenant hint prompts for organization selection.
    let request = TenantRequest::for_identity(RequestIdentity::new(user.id, user.email.clone()));
    let no_org = h.resolve(&request).await;
    let access = require_member_access(&no_org, Permission::IssueView).unwrap();
    assert!(matches!(
        access,
        MemberAccess::Redirect(RedirectTarget::SelectOrganization)
    ));
}

#[tokio::test]
async fn test_denial_message_reveals_nothing_but_the_permission() {
    let h = Harness::new().await;
    let guest = h.member("guest@example.com", RoleTemplate::Guest).await;
    let context = h.resolve(&h.request_for(&guest)).await;

    let err = require_permission(&context, Permission::MachineDelete).unwrap_err();
    assert_eq!(err.user_message(), "Insufficient permissions: machine:delete");
}

// ─────────────────────────────────────────────────────────────────────────────
// Expansion properties over real role data
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_expansion_idempotent_and_monotone_for_seeded_roles() {
    let h = Harness::new().await;
    let catalog = h.resolver.catalog();

    for template in RoleTemplate::all() {
        let role = h.role(template).await;
        let once = catalog.expand(&role.permissions);
        let twice = catalog.expand(&once);

        assert_eq!(once, twice, "{} expansion must be idempotent", template);
        assert!(
            role.permissions.is_subset(&once),
            "{} expansion must contain the grant",
            template
        );
    }
}

#[tokio::test]
async fn test_dependencies_hold_for_every_seeded_role() {
    let h = Harness::new().await;
    let catalog = h.resolver.catalog();

    // If a role holds p and p requires q, the role must pass a check for q.
    for template in RoleTemplate::all() {
        let role = h.role(template).await;
        for &held in &catalog.expand(&role.permissions) {
            for &required in held.requires() {
                assert!(
                    catalog.role_has_permission(&role, required),
                    "{} holds {} but fails its dependency {}",
                    template,
                    held,
                    required
                );
            }
        }
    }
}

#[tokio::test]
async fn test_revoking_one_grant_keeps_independent_grants() {
    let h = Harness::new().await;
    h.member("root@example.com", RoleTemplate::Admin).await;
    let catalog = h.resolver.catalog().clone();

    let role = h
        .service
        .create_custom_role(
            h.org.id,
            "Triager",
            [Permission::IssueDelete, Permission::IssueEdit]
                .into_iter()
                .collect(),
        )
        .await
        .unwrap();

    let patched = h
        .service
        .update_role(
            role.id,
            RolePatch {
                name: None,
                permissions: Some([Permission::IssueEdit].into_iter().collect()),
            },
        )
        .await
        .unwrap();

    assert!(catalog.role_has_permission(&patched, Permission::IssueEdit));
    assert!(!catalog.role_has_permission(&patched, Permission::IssueDelete));
}

// ─────────────────────────────────────────────────────────────────────────────
// Single-flight behavior under concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_checks_share_one_resolution() {
    let h = Harness::new().await;
    let user = h.member("alice@example.com", RoleTemplate::Member).await;
    let request = h.request_for(&user);

    let scope = RequestScope::new();
    let baseline = h.store.lookup_count();

    let (a, b, c) = tokio::join!(
        h.resolver.resolve(&scope, &request),
        h.resolver.resolve(&scope, &request),
        h.resolver.resolve(&scope, &request),
    );
    for context in [a.unwrap(), b.unwrap(), c.unwrap()] {
        assert!(context.is_authorized());
    }

    // organization + membership + role, exactly once.
    assert_eq!(h.store.lookup_count() - baseline, 3);
}

#[tokio::test]
async fn test_memoization_never_crosses_requests() {
    let h = Harness::new().await;
    let user = h.member("alice@example.com", RoleTemplate::Member).await;
    let request = h.request_for(&user);

    let first = RequestScope::new();
    h.resolver.resolve(&first, &request).await.unwrap();
    let after_first = h.store.lookup_count();

    let second = RequestScope::new();
    h.resolver.resolve(&second, &request).await.unwrap();
    assert!(h.store.lookup_count() > after_first);
}

// ─────────────────────────────────────────────────────────────────────────────
// Store-level isolation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_membership_lookup_is_organization_scoped() {
    let h = Harness::new().await;
    let user = h.member("alice@example.com", RoleTemplate::Member).await;

    let rival = Organization::new("Rival Arcades", "rival");
    h.service.bootstrap_organization(&rival).await.unwrap();

    assert!(h
        .store
        .membership_for_user(user.id, h.org.id)
        .await
        .unwrap()
        .is_some());
    assert!(h
        .store
        .membership_for_user(user.id, rival.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_membership_points_into_its_own_organization() {
    let h = Harness::new().await;
    let user = h.member("alice@example.com", RoleTemplate::Member).await;

    let membership: Membership = h
        .store
        .membership_for_user(user.id, h.org.id)
        .await
        .unwrap()
        .unwrap();
    let role = h.store.role(membership.role_id).await.unwrap().unwrap();
    assert_eq!(role.organization_id, membership.organization_id);
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy matrix as the single source of truth
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_seeded_grants_and_docs_derive_from_one_table() {
    let h = Harness::new().await;

    for template in RoleTemplate::all() {
        let role = h.role(template).await;
        let expected: HashSet<Permission> = PolicyMatrix::grants_for(template.access_level());
        assert_eq!(role.permissions, expected, "{} drifted from the matrix", template);
    }

    let docs = PolicyMatrix::render_markdown();
    for permission in Permission::ALL {
        assert!(docs.contains(permission.as_str()));
    }
}
