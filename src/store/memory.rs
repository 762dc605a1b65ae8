//! Process-local backends.
//!
//! Same contracts as the Postgres backends, with a mutex standing in for the
//! transaction: every operation, including its audit entry, happens under one
//! lock acquisition.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{AuditLog, CredentialRepository, SessionRepository, StoreError};
use crate::crypto::{CryptoEngine, EncryptedSecret};
use crate::models::audit::{AuditLogEntry, NewAuditEntry};
use crate::models::credential::{CredentialRecord, NewCredential, TestStatus};
use crate::models::user::{Role, SessionRecord, UserRecord};

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
    fail_writes: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent append fail, to exercise the best-effort policy.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().clone()
    }

    fn try_append(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "audit log unavailable".to_string(),
            )));
        }
        self.entries.lock().push(AuditLogEntry::from_new(entry));
        Ok(())
    }

    /// In-transaction flavour: failures are logged and swallowed.
    fn record_with_mutation(&self, entry: NewAuditEntry) {
        let action = entry.action;
        let target_id = entry.target_id;
        if let Err(e) = self.try_append(entry) {
            tracing::warn!(
                action = action.as_str(),
                target_id = ?target_id,
                error = %e,
                "audit log write failed; mutation is kept"
            );
        }
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        self.try_append(entry)
    }

    async fn entries_for_target(&self, target_id: Uuid) -> Result<Vec<AuditLogEntry>, StoreError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| e.target_id == Some(target_id))
            .cloned()
            .collect())
    }
}

pub struct InMemoryCredentialRepository {
    rows: Mutex<Vec<CredentialRecord>>,
    audit: Arc<InMemoryAuditLog>,
}

impl InMemoryCredentialRepository {
    pub fn new(audit: Arc<InMemoryAuditLog>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            audit,
        }
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn insert(
        &self,
        credential: NewCredential,
        make_active: bool,
        audit: NewAuditEntry,
    ) -> Result<CredentialRecord, StoreError> {
        let mut rows = self.rows.lock();
        let now = Utc::now();

        if rows.iter().any(|r| r.id == credential.id) {
            return Err(StoreError::Corrupt(format!("duplicate id {}", credential.id)));
        }
        if make_active {
            for row in rows.iter_mut().filter(|r| r.is_active) {
                row.is_active = false;
                row.updated_at = now;
            }
        }

        let record = CredentialRecord {
            id: credential.id,
            provider: credential.provider,
            model_id: credential.model_id,
            secret: credential.secret,
            is_active: make_active,
            test_status: TestStatus::NotTested,
            last_tested_at: None,
            created_by: credential.created_by,
            created_at: now,
            updated_at: now,
        };
        rows.push(record.clone());
        self.audit.record_with_mutation(audit);

        Ok(record)
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let mut rows = self.rows.lock().clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn fetch(&self, id: Uuid) -> Result<CredentialRecord, StoreError> {
        self.rows
            .lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn fetch_active(&self) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.rows.lock().iter().find(|r| r.is_active).cloned())
    }

    async fn activate(&self, id: Uuid, audit: NewAuditEntry) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        if !rows.iter().any(|r| r.id == id) {
            return Err(StoreError::NotFound);
        }

        let now = Utc::now();
        for row in rows.iter_mut() {
            let active = row.id == id;
            if row.is_active != active {
                row.is_active = active;
                row.updated_at = now;
            }
        }
        self.audit.record_with_mutation(audit);

        Ok(())
    }

    async fn rotate(
        &self,
        id: Uuid,
        secret: EncryptedSecret,
        audit: NewAuditEntry,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        let row = rows.iter_mut().find(|r| r.id == id).ok_or(StoreError::NotFound)?;

        row.secret = secret;
        row.test_status = TestStatus::NotTested;
        row.updated_at = Utc::now();
        self.audit.record_with_mutation(audit);

        Ok(())
    }

    async fn set_test_status(
        &self,
        id: Uuid,
        status: TestStatus,
        tested_at: Option<DateTime<Utc>>,
        audit: Option<NewAuditEntry>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        let row = rows.iter_mut().find(|r| r.id == id).ok_or(StoreError::NotFound)?;

        let is_verdict = matches!(status, TestStatus::Success | TestStatus::Failed);
        if is_verdict && row.test_status != TestStatus::Testing {
            tracing::info!(credential_id = %id, "test verdict discarded; credential changed during test");
            return Ok(());
        }

        row.test_status = status;
        if tested_at.is_some() {
            row.last_tested_at = tested_at;
        }
        if let Some(audit) = audit {
            self.audit.record_with_mutation(audit);
        }

        Ok(())
    }

    async fn delete(&self, id: Uuid, audit: NewAuditEntry) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| r.id != id);
        if rows.len() == before {
            return Err(StoreError::NotFound);
        }
        self.audit.record_with_mutation(audit);

        Ok(())
    }

    async fn rekey(
        &self,
        from: &CryptoEngine,
        to: &CryptoEngine,
        audit: NewAuditEntry,
    ) -> Result<usize, StoreError> {
        let mut rows = self.rows.lock();

        // Re-encrypt everything before touching any row
        let mut resealed = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let plaintext = from.decrypt(&row.secret)?;
            resealed.push(to.encrypt(&plaintext)?);
        }
        for (row, sealed) in rows.iter_mut().zip(resealed) {
            row.secret = sealed;
        }
        self.audit.record_with_mutation(audit);

        Ok(rows.len())
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    id: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    users: Mutex<Vec<UserRecord>>,
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable an account.
    pub fn set_user_active(&self, username: &str, active: bool) {
        if let Some(user) = self.users.lock().iter_mut().find(|u| u.username == username) {
            user.is_active = active;
        }
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .lock()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<UserRecord, StoreError> {
        let mut users = self.users.lock();
        if users.iter().any(|u| u.username == username) {
            return Err(StoreError::Conflict);
        }
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role: role.as_str().to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.sessions.lock().insert(
            token_hash.to_string(),
            StoredSession {
                id,
                user_id,
                expires_at,
            },
        );
        Ok(id)
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        let Some(session) = self.sessions.lock().get(token_hash).cloned() else {
            return Ok(None);
        };
        let users = self.users.lock();
        let Some(user) = users.iter().find(|u| u.id == session.user_id) else {
            return Ok(None);
        };

        Ok(Some(SessionRecord {
            session_id: session.id,
            user_id: user.id,
            username: user.username.clone(),
            role: user.role.clone(),
            user_is_active: user.is_active,
            expires_at: session.expires_at,
        }))
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.sessions.lock().retain(|_, s| s.id != session_id);
        Ok(())
    }
}
