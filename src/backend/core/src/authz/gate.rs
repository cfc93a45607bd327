//! Access control gate: the single enforcement choke-point.
//!
//! Every guarded operation funnels through [`require_permission`] or one of
//! its wrappers. A passing check has no side effect — the guarded mutation
//! happens in caller code after the gate returns.
//!
//! Two enforcement idioms with different failure semantics:
//! - [`require_permission`] throws typed errors for programmatic/API call
//!   sites; the transport boundary maps them to 401/403/404 responses.
//! - [`require_member_access`] is for interactive call sites: missing
//!   authentication or tenant produces a redirect outcome instead of an
//!   error, while membership and permission failures still error.
//!
//! Both route through the same resolution and expansion, so there is exactly
//! one source of truth for "is this allowed".

use metrics::counter;
use tracing::{debug, warn};

use crate::error::{Result, UpkeepError};

use super::catalog::Permission;
use super::context::{AuthContext, AuthorizedContext};

// ═══════════════════════════════════════════════════════════════════════════════
// Throwing form
// ═══════════════════════════════════════════════════════════════════════════════

/// Require a fully resolved member context, mapping each resolution variant
/// to its error.
fn member_context(context: &AuthContext) -> Result<&AuthorizedContext> {
    match context {
        AuthContext::Unauthenticated => Err(UpkeepError::unauthenticated()),
        AuthContext::NoOrganization { .. } => Err(UpkeepError::tenant_unresolved()),
        AuthContext::Unauthorized { .. } => Err(UpkeepError::membership_missing()),
        AuthContext::Authorized(ctx) => Ok(ctx),
    }
}

/// Require `permission` in the context's expanded grant set.
///
/// Returns the authorized context on success so callers can reach the
/// organization scope without re-matching.
pub fn require_permission(
    context: &AuthContext,
    permission: Permission,
) -> Result<&AuthorizedContext> {
    let ctx = member_context(context)?;

    if ctx.has_permission(permission) {
        debug!(
            user_id = %ctx.user.id,
            organization_id = %ctx.organization.id,
            permission = %permission,
            role = %ctx.role.name,
            "Permission granted"
        );
        return Ok(ctx);
    }

    warn!(
        user_id = %ctx.user.id,
        organization_id = %ctx.organization.id,
        permission = %permission,
        role = %ctx.role.name,
        "Permission denied"
    );
    counter!(
        "upkeep_gate_denials_total",
        "permission" => permission.as_str(),
    )
    .increment(1);

    Err(UpkeepError::permission_denied(permission))
}

/// Require every permission in `permissions`.
pub fn require_all<'a>(
    context: &'a AuthContext,
    permissions: &[Permission],
) -> Result<&'a AuthorizedContext> {
    let mut ctx = member_context(context)?;
    for &permission in permissions {
        ctx = require_permission(context, permission)?;
    }
    Ok(ctx)
}

/// Require at least one permission in `permissions`.
pub fn require_any<'a>(
    context: &'a AuthContext,
    permissions: &[Permission],
) -> Result<&'a AuthorizedContext> {
    let ctx = member_context(context)?;
    for &permission in permissions {
        if ctx.has_permission(permission) {
            return require_permission(context, permission);
        }
    }

    // Report the first requirement; the caller asked for any of them.
    match permissions.first() {
        Some(&permission) => require_permission(context, permission),
        None => Ok(ctx),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Context-with-fallback form
// ═══════════════════════════════════════════════════════════════════════════════

/// Where an interactive flow should send the user instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
    /// No identity: prompt for sign-in.
    Login,
    /// Identity but no tenant: prompt for organization selection.
    SelectOrganization,
}

/// Outcome of the interactive enforcement idiom.
#[derive(Debug)]
pub enum MemberAccess<'a> {
    Granted(&'a AuthorizedContext),
    Redirect(RedirectTarget),
}

impl MemberAccess<'_> {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Interactive variant of [`require_permission`].
///
/// Authentication and tenant failures degrade to a redirect outcome;
/// membership and permission failures still error, with the same generic
/// messages as the throwing form.
pub fn require_member_access(
    context: &AuthContext,
    permission: Permission,
) -> Result<MemberAccess<'_>> {
    match context {
        AuthContext::Unauthenticated => Ok(MemberAccess::Redirect(RedirectTarget::Login)),
        AuthContext::NoOrganization { .. } => {
            Ok(MemberAccess::Redirect(RedirectTarget::SelectOrganization))
        }
        AuthContext::Unauthorized { .. } | AuthContext::Authorized(_) => {
            require_permission(context, permission).map(MemberAccess::Granted)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
