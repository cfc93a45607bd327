//! Axum middleware that enforces a required permission per route.
//!
//! The host application's authentication layer verifies credentials and
//! injects a [`RequestIdentity`] into request extensions; this middleware
//! resolves the tenant context from that identity plus the request host,
//! runs the gate, and injects the resolved [`AuthorizedContext`] for
//! downstream handlers.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use uuid::Uuid;

use crate::error::UpkeepError;

use super::catalog::Permission;
use super::context::{AuthorizedContext, RequestIdentity, RequestScope, TenantRequest, TenantResolver};
use super::gate::require_permission;

// ═══════════════════════════════════════════════════════════════════════════════
// Handler extractor
// ═══════════════════════════════════════════════════════════════════════════════

/// Axum extractor for the resolved [`AuthorizedContext`].
///
/// Available in any handler behind a [`RequirePermissionLayer`]; the context
/// was resolved and checked once by the middleware, so extraction never
/// touches storage.
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthorizedContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthorizedContext>()
            .cloned()
            .ok_or_else(|| {
                UpkeepError::internal(
                    "authorized context not available; apply RequirePermissionLayer to this route",
                )
                .into_response()
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps routes with tenant resolution and permission enforcement.
///
/// # Example
///
/// ```rust,ignore
/// use upkeep_core::prelude::*;
///
/// let app = Router::new()
///     .route("/api/v1/issues/:id", delete(delete_issue))
///     .layer(RequirePermissionLayer::new(
///         resolver.clone(),
///         Permission::IssueDelete,
///         "upkeep.app",
///     ));
/// ```
#[derive(Clone)]
pub struct RequirePermissionLayer {
    resolver: TenantResolver,
    permission: Permission,
    /// Base domain the tenant subdomain hangs off (`acme.upkeep.app`).
    base_domain: String,
}

impl RequirePermissionLayer {
    pub fn new(
        resolver: TenantResolver,
        permission: Permission,
        base_domain: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            permission,
            base_domain: base_domain.into(),
        }
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            resolver: self.resolver.clone(),
            permission: self.permission,
            base_domain: self.base_domain.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that resolves the tenant context and enforces one permission.
#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    resolver: TenantResolver,
    permission: Permission,
    base_domain: String,
}

impl<S> Service<Request<Body>> for RequirePermissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let resolver = self.resolver.clone();
        let permission = self.permission;
        let base_domain = self.base_domain.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let tenant_request = tenant_request_for(&request, &base_domain);

            // One scope per request: every check behind this middleware
            // shares a single resolution.
            let scope = RequestScope::new();
            let context = match resolver.resolve(&scope, &tenant_request).await {
                Ok(context) => context,
                Err(error) => return Ok(error.into_response()),
            };

            let authorized = match require_permission(context, permission) {
                Ok(ctx) => ctx.clone(),
                Err(error) => return Ok(error.into_response()),
            };

            request.extensions_mut().insert(authorized);
            inner.call(request).await
        })
    }
}

/// Assemble the resolver input from request metadata.
fn tenant_request_for(request: &Request<Body>, base_domain: &str) -> TenantRequest {
    let identity = request.extensions().get::<RequestIdentity>().cloned();

    let subdomain = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(|host| subdomain_of(host, base_domain));

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut tenant_request = match identity {
        Some(identity) => TenantRequest::for_identity(identity),
        None => TenantRequest::anonymous(),
    };
    if let Some(subdomain) = subdomain {
        tenant_request = tenant_request.with_subdomain(subdomain);
    }
    tenant_request.with_request_id(request_id)
}

/// Extract the tenant label from `host` relative to the base domain.
///
/// `acme.upkeep.app` against `upkeep.app` yields `acme`; the bare base domain, an
/// unrelated host, or a nested label yield nothing.
fn subdomain_of(host: &str, base_domain: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    let label = host.strip_suffix(base_domain)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(label.to_ascii_lowercase())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::catalog::PermissionCatalog;
    use crate::authz::models::{Membership, Organization, User};
    use crate::authz::templates::RoleTemplate;
    use crate::store::{MembershipStore, MemoryStore};
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[test]
    fn test_subdomain_extraction() {
        assert_eq!(
            subdomain_of("acme.upkeep.app", "upkeep.app"),
            Some("acme".to_string())
        );
        assert_eq!(
            subdomain_of("ACME.upkeep.app:8080", "upkeep.app"),
            Some("acme".to_string())
        );
        assert_eq!(subdomain_of("upkeep.app", "upkeep.app"), None);
        assert_eq!(subdomain_of("evil-upkeep.app", "upkeep.app"), None);
        assert_eq!(subdomain_of("a.b.upkeep.app", "upkeep.app"), None);
        assert_eq!(subdomain_of("example.com", "upkeep.app"), None);
    }

    async fn seeded_resolver() -> (TenantResolver, User) {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(PermissionCatalog::new());

        let org = Organization::new("Acme Amusements", "acme");
        store.insert_organization(&org).await.unwrap();
        let mut member_role_id = None;
        for role in RoleTemplate::all_for(&org) {
            if role.template == Some(RoleTemplate::Member) {
                member_role_id = Some(role.id);
            }
            store.insert_role(&role).await.unwrap();
        }

        let user = User::new("alice@example.com");
        store.upsert_user(&user).await.unwrap();
        store
            .insert_membership(&Membership::new(user.id, org.id, member_role_id.unwrap()))
            .await
            .unwrap();

        (TenantResolver::new(store, catalog), user)
    }

    async fn ok_handler(request: Request<Body>) -> Result<Response, Infallible> {
        assert!(
            request.extensions().get::<AuthorizedContext>().is_some(),
            "handler must see the resolved context"
        );
        Ok(StatusCode::OK.into_response())
    }

    #[tokio::test]
    async fn test_anonymous_request_is_unauthorized() {
        let (resolver, _user) = seeded_resolver().await;
        let service = RequirePermissionLayer::new(resolver, Permission::IssueView, "upkeep.app")
            .layer(tower::service_fn(ok_handler));

        let request = Request::builder()
            .header(header::HOST, "acme.upkeep.app")
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_member_passes_granted_permission() {
        let (resolver, user) = seeded_resolver().await;
        let service = RequirePermissionLayer::new(resolver, Permission::IssueCreate, "upkeep.app")
            .layer(tower::service_fn(ok_handler));

        let mut request = Request::builder()
            .header(header::HOST, "acme.upkeep.app")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(RequestIdentity::new(user.id, user.email.clone()));

        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_member_denied_missing_permission() {
        let (resolver, user) = seeded_resolver().await;
        let service = RequirePermissionLayer::new(resolver, Permission::RoleManage, "upkeep.app")
            .layer(tower::service_fn(ok_handler));

        let mut request = Request::builder()
            .header(header::HOST, "acme.upkeep.app")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(RequestIdentity::new(user.id, user.email.clone()));

        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_not_found() {
        let (resolver, user) = seeded_resolver().await;
        let service = RequirePermissionLayer::new(resolver, Permission::IssueView, "upkeep.app")
            .layer(tower::service_fn(ok_handler));

        let mut request = Request::builder()
            .header(header::HOST, "ghost.upkeep.app")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(RequestIdentity::new(user.id, user.email.clone()));

        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
