//! PostgreSQL membership store.
//!
//! Uses sqlx over the tables `organizations`, `users`, `memberships`,
//! `roles`, and `role_permissions`. Every query against a tenant-scoped table
//! carries an `organization_id` predicate — tenant isolation by construction.
//! Database row-level-security policies, when present, enforce the same
//! boundary independently; nothing here assumes they exist.
//!
//! Permission names are hydrated through the catalog enumeration, so a stale
//! or mistyped row fails loudly at load time instead of silently denying.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::authz::catalog::Permission;
use crate::authz::models::{
    Membership, MembershipId, Organization, OrganizationId, Role, RoleId, User, UserId,
};
use crate::authz::templates::RoleTemplate;
use crate::config::DatabaseConfig;
use crate::error::{Result, UpkeepError};

use super::MembershipStore;

/// Database connection pool and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (e.g. one shared with the host application).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| UpkeepError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Attach permission rows to bare role rows.
    fn assemble_roles(
        rows: Vec<RoleRow>,
        permission_rows: Vec<RolePermissionRow>,
    ) -> Result<Vec<Role>> {
        let mut grants: HashMap<Uuid, HashSet<Permission>> = HashMap::new();
        for row in permission_rows {
            let permission: Permission = row.permission.parse()?;
            grants.entry(row.role_id).or_default().insert(permission);
        }

        rows.into_iter()
            .map(|row| {
                let permissions = grants.remove(&row.id).unwrap_or_default();
                row.into_role(permissions)
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    subdomain: String,
    created_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: OrganizationId(row.id),
            name: row.name,
            subdomain: row.subdomain,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId(row.id),
            email: row.email,
            name: row.name,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    id: Uuid,
    user_id: Uuid,
    organization_id: Uuid,
    role_id: Uuid,
    joined_at: DateTime<Utc>,
    invited_by: Option<Uuid>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Self {
            id: MembershipId(row.id),
            user_id: UserId(row.user_id),
            organization_id: OrganizationId(row.organization_id),
            role_id: RoleId(row.role_id),
            joined_at: row.joined_at,
            invited_by: row.invited_by.map(UserId),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    template: Option<String>,
    is_system: bool,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn into_role(self, permissions: HashSet<Permission>) -> Result<Role> {
        let template = self
            .template
            .as_deref()
            .map(str::parse::<RoleTemplate>)
            .transpose()
            .map_err(|e| UpkeepError::validation(e.to_string()))?;

        Ok(Role {
            id: RoleId(self.id),
            organization_id: OrganizationId(self.organization_id),
            name: self.name,
            template,
            is_system: self.is_system,
            is_default: self.is_default,
            permissions,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RolePermissionRow {
    role_id: Uuid,
    permission: String,
}

const ROLE_COLUMNS: &str =
    "id, organization_id, name, template, is_system, is_default, created_at, updated_at";

// ═══════════════════════════════════════════════════════════════════════════════
// MembershipStore implementation
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl MembershipStore for Database {
    // ─────────────────────────────────────────────────────────────────────────
    // Organizations
    // ─────────────────────────────────────────────────────────────────────────

    async fn organization(&self, id: OrganizationId) -> Result<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, subdomain, created_at FROM organizations WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn organization_by_subdomain(&self, subdomain: &str) -> Result<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, subdomain, created_at FROM organizations WHERE subdomain = $1",
        )
        .bind(subdomain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_organization(&self, organization: &Organization) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, subdomain, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(organization.id.0)
        .bind(&organization.name)
        .bind(&organization.subdomain)
        .bind(organization.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, email, name FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, name = EXCLUDED.name
            "#,
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(&user.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    async fn membership(&self, id: MembershipId) -> Result<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT id, user_id, organization_id, role_id, joined_at, invited_by
            FROM memberships
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn membership_for_user(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
    ) -> Result<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT id, user_id, organization_id, role_id, joined_at, invited_by
            FROM memberships
            WHERE user_id = $1 AND organization_id = $2
            "#,
        )
        .bind(user_id.0)
        .bind(organization_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn memberships_in_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT id, user_id, organization_id, role_id, joined_at, invited_by
            FROM memberships
            WHERE organization_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (id, user_id, organization_id, role_id, joined_at, invited_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(membership.id.0)
        .bind(membership.user_id.0)
        .bind(membership.organization_id.0)
        .bind(membership.role_id.0)
        .bind(membership.joined_at)
        .bind(membership.invited_by.map(|u| u.0))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_membership_role(&self, id: MembershipId, role_id: RoleId) -> Result<()> {
        let result = sqlx::query("UPDATE memberships SET role_id = $2 WHERE id = $1")
            .bind(id.0)
            .bind(role_id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UpkeepError::not_found("membership", id.to_string()));
        }
        Ok(())
    }

    async fn delete_membership(&self, id: MembershipId) -> Result<()> {
        let result = sqlx::query("DELETE FROM memberships WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UpkeepError::not_found("membership", id.to_string()));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    async fn role(&self, id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let permission_rows = sqlx::query_as::<_, RolePermissionRow>(
            "SELECT role_id, permission FROM role_permissions WHERE role_id = $1",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let roles = Self::assemble_roles(vec![row], permission_rows)?;
        Ok(roles.into_iter().next())
    }

    async fn roles_in_organization(&self, organization_id: OrganizationId) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE organization_id = $1 ORDER BY created_at"
        ))
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;

        let permission_rows = sqlx::query_as::<_, RolePermissionRow>(
            r#"
            SELECT rp.role_id, rp.permission
            FROM role_permissions rp
            JOIN roles r ON r.id = rp.role_id
            WHERE r.organization_id = $1
            "#,
        )
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;

        Self::assemble_roles(rows, permission_rows)
    }

    async fn default_role(&self, organization_id: OrganizationId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE organization_id = $1 AND is_default = TRUE"
        ))
        .bind(organization_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let id = row.id;

        let permission_rows = sqlx::query_as::<_, RolePermissionRow>(
            "SELECT role_id, permission FROM role_permissions WHERE role_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let roles = Self::assemble_roles(vec![row], permission_rows)?;
        Ok(roles.into_iter().next())
    }

    async fn role_for_template(
        &self,
        organization_id: OrganizationId,
        template: RoleTemplate,
    ) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE organization_id = $1 AND template = $2"
        ))
        .bind(organization_id.0)
        .bind(template.key())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let id = row.id;

        let permission_rows = sqlx::query_as::<_, RolePermissionRow>(
            "SELECT role_id, permission FROM role_permissions WHERE role_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let roles = Self::assemble_roles(vec![row], permission_rows)?;
        Ok(roles.into_iter().next())
    }

    async fn insert_role(&self, role: &Role) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if role.is_default {
            let existing: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM roles
                WHERE organization_id = $1 AND is_default = TRUE AND id <> $2
                "#,
            )
            .bind(role.organization_id.0)
            .bind(role.id.0)
            .fetch_one(&mut *tx)
            .await?;
            if existing > 0 {
                return Err(UpkeepError::invariant_violation(
                    "Organization already has a default role",
                ));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO roles (id, organization_id, name, template, is_system, is_default, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(role.id.0)
        .bind(role.organization_id.0)
        .bind(&role.name)
        .bind(role.template.map(|t| t.key()))
        .bind(role.is_system)
        .bind(role.is_default)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await?;

        for permission in &role.permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, permission) VALUES ($1, $2)")
                .bind(role.id.0)
                .bind(permission.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if role.is_default {
            let existing: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM roles
                WHERE organization_id = $1 AND is_default = TRUE AND id <> $2
                "#,
            )
            .bind(role.organization_id.0)
            .bind(role.id.0)
            .fetch_one(&mut *tx)
            .await?;
            if existing > 0 {
                return Err(UpkeepError::invariant_violation(
                    "Organization already has a default role",
                ));
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $3, template = $4, is_system = $5, is_default = $6, updated_at = $7
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(role.id.0)
        .bind(role.organization_id.0)
        .bind(&role.name)
        .bind(role.template.map(|t| t.key()))
        .bind(role.is_system)
        .bind(role.is_default)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UpkeepError::not_found("role", role.id.to_string()));
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role.id.0)
            .execute(&mut *tx)
            .await?;
        for permission in &role.permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, permission) VALUES ($1, $2)")
                .bind(role.id.0)
                .bind(permission.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_role_reassigning_members(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
        fallback_role_id: RoleId,
    ) -> Result<u64> {
        // One transaction: a crash between the reassignment and the delete
        // must never leave a membership pointing at a deleted role.
        let mut tx = self.pool.begin().await?;

        let reassigned = sqlx::query(
            r#"
            UPDATE memberships
            SET role_id = $3
            WHERE organization_id = $1 AND role_id = $2
            "#,
        )
        .bind(organization_id.0)
        .bind(role_id.0)
        .bind(fallback_role_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id.0)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM roles WHERE id = $1 AND organization_id = $2")
            .bind(role_id.0)
            .bind(organization_id.0)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(UpkeepError::not_found("role", role_id.to_string()));
        }

        tx.commit().await?;
        Ok(reassigned)
    }
}
