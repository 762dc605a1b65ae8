//! Durable storage behind the credential subsystem.
//!
//! Each concern is a trait with two backends:
//! - [`postgres`]: production, on a shared `PgPool`
//! - [`memory`]: single-process, used by tests and local tooling
//!
//! # Audit policy
//!
//! Every mutating [`CredentialRepository`] method takes the [`NewAuditEntry`]
//! describing it. Backends write that entry together with the mutation, inside
//! the same transaction, under a savepoint. When the audit write itself fails,
//! the savepoint is rolled back, the failure is logged at `warn`, and the
//! mutation still commits: audit is a best-effort side channel and a committed
//! credential change is never undone because its audit row could not be stored.
//! The reverse never happens: a failed mutation commits nothing and returns
//! its error, whatever became of the audit write.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::{CryptoEngine, CryptoError, EncryptedSecret};
use crate::models::audit::{AuditLogEntry, NewAuditEntry};
use crate::models::credential::{CredentialRecord, NewCredential, TestStatus};
use crate::models::user::{Role, SessionRecord, UserRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// The single-active constraint rejected the write. Callers retry.
    #[error("single-active constraint violated by a concurrent activation")]
    Conflict,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert a credential. With `make_active` the activation flip happens in
    /// the same transaction, so the row is never visible as a second active one.
    async fn insert(
        &self,
        credential: NewCredential,
        make_active: bool,
        audit: NewAuditEntry,
    ) -> Result<CredentialRecord, StoreError>;

    /// Every credential, newest first.
    async fn list(&self) -> Result<Vec<CredentialRecord>, StoreError>;

    async fn fetch(&self, id: Uuid) -> Result<CredentialRecord, StoreError>;

    async fn fetch_active(&self) -> Result<Option<CredentialRecord>, StoreError>;

    /// Clear `is_active` everywhere and set it on `id`, atomically and
    /// serialized against other activations.
    async fn activate(&self, id: Uuid, audit: NewAuditEntry) -> Result<(), StoreError>;

    /// Replace the ciphertext and reset `test_status` to `not_tested`.
    async fn rotate(
        &self,
        id: Uuid,
        secret: EncryptedSecret,
        audit: NewAuditEntry,
    ) -> Result<(), StoreError>;

    async fn set_test_status(
        &self,
        id: Uuid,
        status: TestStatus,
        tested_at: Option<DateTime<Utc>>,
        audit: Option<NewAuditEntry>,
    ) -> Result<(), StoreError>;

    /// Hard delete.
    async fn delete(&self, id: Uuid, audit: NewAuditEntry) -> Result<(), StoreError>;

    /// Re-encrypt every stored secret from `from` to `to` in one transaction.
    /// Returns the number of rows rewritten.
    async fn rekey(
        &self,
        from: &CryptoEngine,
        to: &CryptoEngine,
        audit: NewAuditEntry,
    ) -> Result<usize, StoreError>;
}

/// Append-only log for events that are not themselves a credential mutation
/// (logins, logouts) and read access for operators.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> Result<(), StoreError>;

    async fn entries_for_target(&self, target_id: Uuid) -> Result<Vec<AuditLogEntry>, StoreError>;
}

/// Append with the best-effort policy: failures are logged, never returned.
pub async fn append_best_effort(log: &dyn AuditLog, entry: NewAuditEntry) {
    let action = entry.action;
    if let Err(e) = log.append(entry).await {
        tracing::warn!(action = action.as_str(), error = %e, "audit log write failed");
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<UserRecord, StoreError>;

    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    /// Session joined with its user. Expiry and user status are checked by the caller.
    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError>;

    async fn delete_session(&self, session_id: Uuid) -> Result<(), StoreError>;
}
