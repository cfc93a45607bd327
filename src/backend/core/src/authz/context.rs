//! Tenant context resolution.
//!
//! Turns a request (verified identity + tenant hint) into an [`AuthContext`]:
//! identity → organization → membership → role → expanded permission set.
//!
//! Resolution is memoized per logical request through a [`RequestScope`]:
//! concurrent calls within one request observe exactly one storage lookup
//! chain. Nothing is cached across requests — membership and role rows can
//! change between them.
//!
//! Business failures (no identity, unknown tenant, no membership) are
//! variants, not errors; only storage failures surface as errors. Callers
//! decide which variants are acceptable.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, UpkeepError};
use crate::store::MembershipStore;

use super::catalog::{Permission, PermissionCatalog};
use super::models::{Membership, Organization, OrganizationId, Role, User, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Request inputs
// ═══════════════════════════════════════════════════════════════════════════════

/// A verified identity handed over by the external identity provider.
///
/// This core never validates credentials itself; by the time a
/// `RequestIdentity` exists, authentication has already succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_id: UserId,
    pub email: String,
    pub name: Option<String>,
    /// Organization id embedded in the identity token, when present.
    /// Trusted over the subdomain because the token is verified and the
    /// Host header is not.
    pub organization_claim: Option<OrganizationId>,
}

impl RequestIdentity {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            name: None,
            organization_claim: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_organization_claim(mut self, organization_id: OrganizationId) -> Self {
        self.organization_claim = Some(organization_id);
        self
    }

    fn to_user(&self) -> User {
        User {
            id: self.user_id,
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

/// The per-request metadata the resolver consumes.
#[derive(Debug, Clone)]
pub struct TenantRequest {
    /// Verified identity, absent for anonymous requests.
    pub identity: Option<RequestIdentity>,
    /// Tenant subdomain extracted from the request host, if any.
    pub subdomain: Option<String>,
    /// Correlation id for logging.
    pub request_id: String,
}

impl TenantRequest {
    pub fn anonymous() -> Self {
        Self {
            identity: None,
            subdomain: None,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn for_identity(identity: RequestIdentity) -> Self {
        Self {
            identity: Some(identity),
            subdomain: None,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AuthContext
// ═══════════════════════════════════════════════════════════════════════════════

/// The outcome of tenant context resolution.
///
/// Every caller matches exhaustively; there is no partially-populated context
/// and no nullable field to forget to check.
#[derive(Debug, Clone)]
pub enum AuthContext {
    /// No valid identity on the request.
    Unauthenticated,
    /// Valid identity, but no resolvable tenant (bad subdomain, missing claim).
    NoOrganization { user: User },
    /// Valid identity and tenant, but no membership links them.
    Unauthorized {
        user: User,
        organization: Organization,
    },
    /// Fully resolved.
    Authorized(AuthorizedContext),
}

impl AuthContext {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }

    pub fn authorized(&self) -> Option<&AuthorizedContext> {
        match self {
            Self::Authorized(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// A fully resolved, organization-scoped permission context.
#[derive(Debug, Clone)]
pub struct AuthorizedContext {
    pub user: User,
    pub organization: Organization,
    pub membership: Membership,
    pub role: Role,
    /// The dependency closure of the role's grants, expanded once at
    /// resolution time and reused for every check in the request.
    pub permissions: HashSet<Permission>,
}

impl AuthorizedContext {
    /// Membership test against the pre-expanded grant set.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request scope (single-flight memoization)
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-request memo cell for the resolved context.
///
/// Create one per logical request and drop it with the request. Concurrent
/// `resolve` calls through the same scope coalesce into a single resolution;
/// later calls return the memoized context without touching storage.
#[derive(Debug, Default)]
pub struct RequestScope {
    resolved: OnceCell<AuthContext>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self {
            resolved: OnceCell::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tenant Resolver
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves requests into [`AuthContext`]s against the membership store.
#[derive(Clone)]
pub struct TenantResolver {
    store: Arc<dyn MembershipStore>,
    catalog: Arc<PermissionCatalog>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn MembershipStore>, catalog: Arc<PermissionCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn catalog(&self) -> &Arc<PermissionCatalog> {
        &self.catalog
    }

    /// Resolve the context for a request, memoized in `scope`.
    pub async fn resolve<'a>(
        &self,
        scope: &'a RequestScope,
        request: &TenantRequest,
    ) -> Result<&'a AuthContext> {
        scope
            .resolved
            .get_or_try_init(|| self.resolve_uncached(request))
            .await
    }

    /// One pass through identity → organization → membership → role.
    async fn resolve_uncached(&self, request: &TenantRequest) -> Result<AuthContext> {
        let Some(identity) = &request.identity else {
            debug!(request_id = %request.request_id, "No identity on request");
            return Ok(AuthContext::Unauthenticated);
        };
        let user = identity.to_user();

        let Some(organization) = self.resolve_organization(identity, request).await? else {
            debug!(
                request_id = %request.request_id,
                user_id = %user.id,
                "No organization resolvable for request"
            );
            return Ok(AuthContext::NoOrganization { user });
        };

        // Keyed on (user, organization): a membership in another tenant can
        // never satisfy this lookup.
        let Some(membership) = self
            .store
            .membership_for_user(user.id, organization.id)
            .await?
        else {
            debug!(
                request_id = %request.request_id,
                user_id = %user.id,
                organization_id = %organization.id,
                "Identity has no membership in resolved organization"
            );
            return Ok(AuthContext::Unauthorized { user, organization });
        };

        let role = self.store.role(membership.role_id).await?.ok_or_else(|| {
            // The atomic delete-and-reassign path makes this unreachable;
            // hitting it means the store is corrupt.
            warn!(
                membership_id = %membership.id,
                role_id = %membership.role_id,
                "Membership points at a missing role"
            );
            UpkeepError::internal(format!(
                "membership {} references missing role {}",
                membership.id, membership.role_id
            ))
        })?;

        if role.organization_id != organization.id {
            warn!(
                role_id = %role.id,
                role_organization_id = %role.organization_id,
                organization_id = %organization.id,
                "Membership role belongs to a different organization"
            );
            return Err(UpkeepError::internal(format!(
                "role {} crosses tenant boundary",
                role.id
            )));
        }

        let permissions = self.catalog.expand(&role.permissions);
        debug!(
            request_id = %request.request_id,
            user_id = %user.id,
            organization_id = %organization.id,
            role = %role.name,
            permission_count = permissions.len(),
            "Resolved authorized context"
        );

        Ok(AuthContext::Authorized(AuthorizedContext {
            user,
            organization,
            membership,
            role,
            permissions,
        }))
    }

    async fn resolve_organization(
        &self,
        identity: &RequestIdentity,
        request: &TenantRequest,
    ) -> Result<Option<Organization>> {
        if let Some(organization_id) = identity.organization_claim {
            return self.store.organization(organization_id).await;
        }
        if let Some(subdomain) = &request.subdomain {
            return self.store.organization_by_subdomain(subdomain).await;
        }
        Ok(None)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
