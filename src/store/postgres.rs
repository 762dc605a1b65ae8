//! PostgreSQL backends.
//!
//! # Single active provider
//!
//! Two layers keep at most one row with `is_active = true`:
//! 1. Every write that can set `is_active` first takes
//!    `LOCK TABLE provider_credentials IN SHARE ROW EXCLUSIVE MODE`. The mode
//!    conflicts with itself, so activators queue up and each one clears and
//!    sets inside its own transaction.
//! 2. The partial unique index `provider_credentials_single_active` rejects a
//!    second active row outright. Such a violation surfaces as
//!    [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Acquire, Postgres, Transaction};
use uuid::Uuid;

use super::{AuditLog, CredentialRepository, SessionRepository, StoreError};
use crate::crypto::{CryptoEngine, EncryptedSecret};
use crate::db::DbPool;
use crate::models::audit::{AuditLogEntry, NewAuditEntry};
use crate::models::credential::{CredentialRecord, CredentialRow, NewCredential, TestStatus};
use crate::models::user::{Role, SessionRecord, UserRecord};

const CREDENTIAL_COLUMNS: &str = "id, provider, model_id, secret_iv, secret_ciphertext, secret_tag, \
     is_active, test_status, last_tested_at, created_by, created_at, updated_at";

const LOCK_CREDENTIALS: &str = "LOCK TABLE provider_credentials IN SHARE ROW EXCLUSIVE MODE";

fn into_record(row: CredentialRow) -> Result<CredentialRecord, StoreError> {
    CredentialRecord::try_from(row).map_err(StoreError::Corrupt)
}

/// Unique violations on `provider_credentials` can only come from the
/// single-active index.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict;
        }
    }
    StoreError::Database(err)
}

async fn insert_audit<'e, E>(executor: E, entry: &NewAuditEntry) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_log (action, actor_id, target_table, target_id, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.action.as_str())
    .bind(entry.actor_id)
    .bind(entry.target_table)
    .bind(entry.target_id)
    .bind(&entry.payload)
    .execute(executor)
    .await?;

    Ok(())
}

/// Write the audit entry under a savepoint of the mutation's transaction.
///
/// An audit failure rolls back to the savepoint only; the caller's mutation
/// stays in the transaction and commits.
async fn write_audit(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewAuditEntry,
) -> Result<(), sqlx::Error> {
    let mut savepoint = Acquire::begin(&mut *tx).await?;

    match insert_audit(&mut *savepoint, entry).await {
        Ok(()) => savepoint.commit().await,
        Err(e) => {
            tracing::warn!(
                action = entry.action.as_str(),
                target_id = ?entry.target_id,
                error = %e,
                "audit log write failed; mutation is kept"
            );
            savepoint.rollback().await
        }
    }
}

pub struct PgCredentialRepository {
    pool: DbPool,
}

impl PgCredentialRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn insert(
        &self,
        credential: NewCredential,
        make_active: bool,
        audit: NewAuditEntry,
    ) -> Result<CredentialRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        if make_active {
            sqlx::query(LOCK_CREDENTIALS).execute(&mut *tx).await?;
            sqlx::query(
                "UPDATE provider_credentials SET is_active = false, updated_at = NOW() WHERE is_active",
            )
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            r#"
            INSERT INTO provider_credentials (
                id, provider, model_id, secret_iv, secret_ciphertext, secret_tag,
                is_active, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(credential.id)
        .bind(credential.provider.as_str())
        .bind(&credential.model_id)
        .bind(&credential.secret.iv)
        .bind(&credential.secret.ciphertext)
        .bind(&credential.secret.tag)
        .bind(make_active)
        .bind(credential.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_write_error)?;

        write_audit(&mut tx, &audit).await?;
        tx.commit().await.map_err(map_write_error)?;

        into_record(row)
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_record).collect()
    }

    async fn fetch(&self, id: Uuid) -> Result<CredentialRecord, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        into_record(row)
    }

    async fn fetch_active(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials WHERE is_active"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_record).transpose()
    }

    async fn activate(&self, id: Uuid, audit: NewAuditEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes against every other activation and insert-as-active
        sqlx::query(LOCK_CREDENTIALS).execute(&mut *tx).await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM provider_credentials WHERE id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        if !exists {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        }

        sqlx::query(
            r#"
            UPDATE provider_credentials
            SET is_active = false,
                updated_at = NOW()
            WHERE is_active AND id <> $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        sqlx::query(
            r#"
            UPDATE provider_credentials
            SET is_active = true,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        write_audit(&mut tx, &audit).await?;

        // Commit both flips atomically; nothing partial is ever visible
        tx.commit().await.map_err(map_write_error)?;

        Ok(())
    }

    async fn rotate(
        &self,
        id: Uuid,
        secret: EncryptedSecret,
        audit: NewAuditEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE provider_credentials
            SET secret_iv = $2,
                secret_ciphertext = $3,
                secret_tag = $4,
                test_status = 'not_tested',
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&secret.iv)
        .bind(&secret.ciphertext)
        .bind(&secret.tag)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        }

        write_audit(&mut tx, &audit).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn set_test_status(
        &self,
        id: Uuid,
        status: TestStatus,
        tested_at: Option<DateTime<Utc>>,
        audit: Option<NewAuditEntry>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // A verdict only lands on a row still marked `testing`: a rotation
        // during the test has reset it to `not_tested` and must win.
        let only_if_testing = matches!(status, TestStatus::Success | TestStatus::Failed);

        let updated = sqlx::query(
            r#"
            UPDATE provider_credentials
            SET test_status = $2,
                last_tested_at = COALESCE($3, last_tested_at)
            WHERE id = $1 AND (NOT $4 OR test_status = 'testing')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(tested_at)
        .bind(only_if_testing)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM provider_credentials WHERE id = $1)",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;

            if !exists {
                return Err(StoreError::NotFound);
            }
            tracing::info!(credential_id = %id, "test verdict discarded; credential changed during test");
            return Ok(());
        }

        if let Some(audit) = audit {
            write_audit(&mut tx, &audit).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid, audit: NewAuditEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM provider_credentials WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        }

        write_audit(&mut tx, &audit).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn rekey(
        &self,
        from: &CryptoEngine,
        to: &CryptoEngine,
        audit: NewAuditEntry,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(LOCK_CREDENTIALS).execute(&mut *tx).await?;

        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials"
        ))
        .fetch_all(&mut *tx)
        .await?;

        let count = rows.len();
        for row in rows {
            let record = into_record(row)?;
            // Any row that fails to decrypt aborts the whole rekey
            let plaintext = from.decrypt(&record.secret)?;
            let sealed = to.encrypt(&plaintext)?;

            sqlx::query(
                r#"
                UPDATE provider_credentials
                SET secret_iv = $2,
                    secret_ciphertext = $3,
                    secret_tag = $4
                WHERE id = $1
                "#,
            )
            .bind(record.id)
            .bind(&sealed.iv)
            .bind(&sealed.ciphertext)
            .bind(&sealed.tag)
            .execute(&mut *tx)
            .await?;
        }

        write_audit(&mut tx, &audit).await?;
        tx.commit().await?;

        Ok(count)
    }
}

pub struct PgAuditLog {
    pool: DbPool,
}

impl PgAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        insert_audit(&self.pool, &entry).await?;
        Ok(())
    }

    async fn entries_for_target(&self, target_id: Uuid) -> Result<Vec<AuditLogEntry>, StoreError> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, action, actor_id, target_table, target_id, payload, created_at
            FROM audit_log
            WHERE target_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

pub struct PgSessionRepository {
    pool: DbPool,
}

impl PgSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username, password_hash, role, is_active, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<UserRecord, StoreError> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (username, password_hash, role)
            VALUES ($1, $2, $3)
            RETURNING id, username, password_hash, role, is_active, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO sessions (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        let session = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT s.id AS session_id,
                   u.id AS user_id,
                   u.username,
                   u.role,
                   u.is_active AS user_is_active,
                   s.expires_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
