//! PostgreSQL implementation of the durable stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::{
    ApiKey, FailedLogin, LockoutPolicy, MfaEnrollment, Permission, Principal, PrincipalStatus,
    Role,
};
use crate::services::error::AuthError;
use crate::services::store::{ApiKeyStore, CredentialStore, RoleStore};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct PrincipalRow {
    principal_id: Uuid,
    tenant_id: Uuid,
    username: String,
    credential_hash: String,
    roles: Vec<Uuid>,
    failed_attempts: i32,
    lockout_count: i32,
    locked_until: Option<DateTime<Utc>>,
    status_code: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<PrincipalRow> for Principal {
    fn from(r: PrincipalRow) -> Self {
        Self {
            principal_id: r.principal_id,
            tenant_id: r.tenant_id,
            username: r.username,
            credential_hash: r.credential_hash,
            roles: r.roles.into_iter().collect(),
            failed_attempts: r.failed_attempts.max(0) as u32,
            lockout_count: r.lockout_count.max(0) as u32,
            locked_until: r.locked_until,
            status: PrincipalStatus::from_code(&r.status_code),
            created_utc: r.created_utc,
            updated_utc: r.updated_utc,
        }
    }
}

#[derive(FromRow)]
struct RoleRow {
    role_id: Uuid,
    tenant_id: Option<Uuid>,
    role_name: String,
    permissions: Vec<String>,
    created_utc: DateTime<Utc>,
}

/// Stored permissions that no longer parse are dropped, never widened.
fn parse_stored(raw: Vec<String>, owner: Uuid) -> BTreeSet<Permission> {
    raw.into_iter()
        .filter_map(|p| match Permission::parse(&p) {
            Ok(perm) => Some(perm),
            Err(_) => {
                tracing::warn!(owner = %owner, permission = %p, "Ignoring unparseable stored permission");
                None
            }
        })
        .collect()
}

impl From<RoleRow> for Role {
    fn from(r: RoleRow) -> Self {
        Self {
            role_id: r.role_id,
            tenant_id: r.tenant_id,
            name: r.role_name,
            permissions: parse_stored(r.permissions, r.role_id),
            created_utc: r.created_utc,
        }
    }
}

#[derive(FromRow)]
struct ApiKeyRow {
    key_id: Uuid,
    principal_id: Uuid,
    tenant_id: Uuid,
    key_name: String,
    secret_hash: String,
    scopes: Vec<String>,
    created_utc: DateTime<Utc>,
    expiry_utc: Option<DateTime<Utc>>,
    last_used_utc: Option<DateTime<Utc>>,
    revoked_utc: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(r: ApiKeyRow) -> Self {
        Self {
            key_id: r.key_id,
            principal_id: r.principal_id,
            tenant_id: r.tenant_id,
            name: r.key_name,
            secret_hash: r.secret_hash,
            scopes: parse_stored(r.scopes, r.key_id),
            created_utc: r.created_utc,
            expiry_utc: r.expiry_utc,
            last_used_utc: r.last_used_utc,
            revoked_utc: r.revoked_utc,
        }
    }
}

#[derive(FromRow)]
struct MfaRow {
    principal_id: Uuid,
    secret_ciphertext: Vec<u8>,
    created_utc: DateTime<Utc>,
    confirmed_utc: Option<DateTime<Utc>>,
}

fn map_unique(err: sqlx::Error, what: &str) -> AuthError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AuthError::Conflict(format!("{} already exists", what))
        }
        _ => err.into(),
    }
}

fn not_found_if_zero(rows: u64, principal_id: Uuid) -> Result<(), AuthError> {
    if rows == 0 {
        Err(AuthError::NotFound(format!("principal {}", principal_id)))
    } else {
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn insert_principal(&self, principal: &Principal) -> Result<(), AuthError> {
        let roles: Vec<Uuid> = principal.roles.iter().copied().collect();
        sqlx::query(
            r#"
            INSERT INTO principals
                (principal_id, tenant_id, username, credential_hash, roles,
                 failed_attempts, lockout_count, locked_until, status_code, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(principal.principal_id)
        .bind(principal.tenant_id)
        .bind(&principal.username)
        .bind(&principal.credential_hash)
        .bind(&roles)
        .bind(principal.failed_attempts as i32)
        .bind(principal.lockout_count as i32)
        .bind(principal.locked_until)
        .bind(principal.status.as_str())
        .bind(principal.created_utc)
        .bind(principal.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "username"))?;
        Ok(())
    }

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, AuthError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT * FROM principals WHERE principal_id = $1",
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Principal::from))
    }

    async fn find_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<Principal>, AuthError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT * FROM principals WHERE tenant_id = $1 AND lower(username) = lower($2)",
        )
        .bind(tenant_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Principal::from))
    }

    async fn update_lockout(&self, principal: &Principal) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE principals
            SET failed_attempts = $2, lockout_count = $3, locked_until = $4, updated_utc = now()
            WHERE principal_id = $1
            "#,
        )
        .bind(principal.principal_id)
        .bind(principal.failed_attempts as i32)
        .bind(principal.lockout_count as i32)
        .bind(principal.locked_until)
        .execute(&self.pool)
        .await?;
        not_found_if_zero(result.rows_affected(), principal.principal_id)
    }

    async fn record_failed_attempt(
        &self,
        principal_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailedLogin, AuthError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent failures for this principal
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT * FROM principals WHERE principal_id = $1 FOR UPDATE",
        )
        .bind(principal_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AuthError::NotFound(format!("principal {}", principal_id)))?;

        let mut principal = Principal::from(row);
        let outcome = principal.apply_failed_login(policy, now);

        sqlx::query(
            r#"
            UPDATE principals
            SET failed_attempts = $2, lockout_count = $3, locked_until = $4, updated_utc = now()
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id)
        .bind(outcome.failed_attempts as i32)
        .bind(outcome.lockout_count as i32)
        .bind(outcome.locked_until)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn update_credential(
        &self,
        principal_id: Uuid,
        credential_hash: &str,
    ) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE principals SET credential_hash = $2, updated_utc = now() WHERE principal_id = $1",
        )
        .bind(principal_id)
        .bind(credential_hash)
        .execute(&self.pool)
        .await?;
        not_found_if_zero(result.rows_affected(), principal_id)
    }

    async fn set_status(
        &self,
        principal_id: Uuid,
        status: PrincipalStatus,
    ) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE principals SET status_code = $2, updated_utc = now() WHERE principal_id = $1",
        )
        .bind(principal_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        not_found_if_zero(result.rows_affected(), principal_id)
    }

    async fn grant_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE principals
            SET roles = CASE WHEN $2 = ANY(roles) THEN roles ELSE array_append(roles, $2) END,
                updated_utc = now()
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        not_found_if_zero(result.rows_affected(), principal_id)
    }

    async fn revoke_role(&self, principal_id: Uuid, role_id: Uuid) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE principals SET roles = array_remove(roles, $2), updated_utc = now() WHERE principal_id = $1",
        )
        .bind(principal_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        not_found_if_zero(result.rows_affected(), principal_id)
    }

    async fn get_mfa_enrollment(
        &self,
        principal_id: Uuid,
    ) -> Result<Option<MfaEnrollment>, AuthError> {
        let Some(row) = sqlx::query_as::<_, MfaRow>(
            "SELECT * FROM mfa_enrollments WHERE principal_id = $1",
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT code_hash FROM mfa_backup_codes WHERE principal_id = $1 AND used_utc IS NULL",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(MfaEnrollment {
            principal_id: row.principal_id,
            secret_ciphertext: row.secret_ciphertext,
            backup_code_hashes: codes.into_iter().collect(),
            created_utc: row.created_utc,
            confirmed_utc: row.confirmed_utc,
        }))
    }

    async fn put_mfa_enrollment(&self, enrollment: &MfaEnrollment) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO mfa_enrollments (principal_id, secret_ciphertext, created_utc, confirmed_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (principal_id) DO UPDATE
            SET secret_ciphertext = EXCLUDED.secret_ciphertext,
                created_utc = EXCLUDED.created_utc,
                confirmed_utc = EXCLUDED.confirmed_utc
            "#,
        )
        .bind(enrollment.principal_id)
        .bind(&enrollment.secret_ciphertext)
        .bind(enrollment.created_utc)
        .bind(enrollment.confirmed_utc)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM mfa_backup_codes WHERE principal_id = $1")
            .bind(enrollment.principal_id)
            .execute(&mut *tx)
            .await?;

        let hashes: Vec<String> = enrollment.backup_code_hashes.iter().cloned().collect();
        if !hashes.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO mfa_backup_codes (principal_id, code_hash)
                SELECT $1, unnest($2::text[])
                "#,
            )
            .bind(enrollment.principal_id)
            .bind(&hashes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_mfa_enrollment(&self, principal_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM mfa_enrollments WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        principal_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_backup_codes SET used_utc = now()
            WHERE principal_id = $1 AND code_hash = $2 AND used_utc IS NULL
            "#,
        )
        .bind(principal_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<(), AuthError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            AuthError::from(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for Database {
    async fn insert_role(&self, role: &Role) -> Result<(), AuthError> {
        let permissions: Vec<String> = role.permissions.iter().map(|p| p.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, tenant_id, role_name, permissions, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(role.role_id)
        .bind(role.tenant_id)
        .bind(&role.name)
        .bind(&permissions)
        .bind(role.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "role"))?;
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, AuthError> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Role::from))
    }

    async fn find_role_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, AuthError> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT * FROM roles WHERE tenant_id IS NOT DISTINCT FROM $1 AND role_name = $2",
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Role::from))
    }

    async fn find_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, AuthError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE role_id = ANY($1)")
            .bind(role_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }
}

#[async_trait]
impl ApiKeyStore for Database {
    async fn insert_key(&self, key: &ApiKey) -> Result<(), AuthError> {
        let scopes: Vec<String> = key.scopes.iter().map(|p| p.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO api_keys
                (key_id, principal_id, tenant_id, key_name, secret_hash, scopes,
                 created_utc, expiry_utc, last_used_utc, revoked_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(key.key_id)
        .bind(key.principal_id)
        .bind(key.tenant_id)
        .bind(&key.name)
        .bind(&key.secret_hash)
        .bind(&scopes)
        .bind(key.created_utc)
        .bind(key.expiry_utc)
        .bind(key.last_used_utc)
        .bind(key.revoked_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_key(&self, key_id: Uuid) -> Result<Option<ApiKey>, AuthError> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ApiKey::from))
    }

    async fn list_keys(&self, principal_id: Uuid) -> Result<Vec<ApiKey>, AuthError> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT * FROM api_keys WHERE principal_id = $1 ORDER BY created_utc",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn revoke_key(
        &self,
        principal_id: Uuid,
        key_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys SET revoked_utc = $3
            WHERE key_id = $1 AND principal_id = $2 AND revoked_utc IS NULL
            "#,
        )
        .bind(key_id)
        .bind(principal_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_key(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query("UPDATE api_keys SET last_used_utc = $2 WHERE key_id = $1")
            .bind(key_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
