//! Credential service - operations on stored provider credentials.
//!
//! This service handles:
//! - Encryption of secrets before anything reaches the repository
//! - Building the redacted audit payload of each mutation
//! - Privileged decryption for the connectivity tester
//! - The `testing -> success | failed` status flow of a stored-key test
//!
//! Request validation and authorization happen before any call lands here.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::crypto::CryptoEngine;
use crate::error::AppError;
use crate::models::audit::{AuditAction, NewAuditEntry};
use crate::models::credential::{
    DecryptedCredential, NewCredential, RedactedCredential, TestStatus,
};
use crate::providers::ProviderKind;
use crate::services::connectivity::{ConnectivityTester, ProviderTestRequest, ProviderTestResult};
use crate::store::CredentialRepository;

#[derive(Clone)]
pub struct CredentialService {
    repo: Arc<dyn CredentialRepository>,
    crypto: Arc<CryptoEngine>,
}

impl CredentialService {
    pub fn new(repo: Arc<dyn CredentialRepository>, crypto: Arc<CryptoEngine>) -> Self {
        Self { repo, crypto }
    }

    /// Store a new credential, optionally making it the active one.
    ///
    /// The secret is encrypted before the insert; the plaintext never reaches
    /// the repository.
    pub async fn create(
        &self,
        provider: ProviderKind,
        model_id: &str,
        secret: &str,
        make_active: bool,
        actor: Uuid,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let sealed = self.crypto.encrypt(secret)?;

        let audit = NewAuditEntry::credential(
            AuditAction::Create,
            actor,
            id,
            json!({
                "provider": provider.as_str(),
                "modelId": model_id,
                "isActive": make_active,
            }),
        );

        self.repo
            .insert(
                NewCredential {
                    id,
                    provider,
                    model_id: model_id.to_string(),
                    secret: sealed,
                    created_by: actor,
                },
                make_active,
                audit,
            )
            .await?;

        tracing::info!(credential_id = %id, provider = %provider, model = model_id, make_active, "credential created");
        Ok(id)
    }

    /// Every credential with its secret replaced by the fixed mask.
    pub async fn list(&self) -> Result<Vec<RedactedCredential>, AppError> {
        let records = self.repo.list().await?;
        Ok(records.into_iter().map(RedactedCredential::from).collect())
    }

    /// Decrypt a stored credential. In-process only; never sent over HTTP.
    pub async fn get_decrypted(&self, id: Uuid) -> Result<DecryptedCredential, AppError> {
        let record = self.repo.fetch(id).await?;
        let api_key = self.crypto.decrypt(&record.secret)?;

        Ok(DecryptedCredential {
            id: record.id,
            provider: record.provider,
            model_id: record.model_id,
            api_key,
            is_active: record.is_active,
            test_status: record.test_status,
        })
    }

    /// Make `id` the only active credential.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no such credential
    /// - `Conflict`: a concurrent activation won; the caller retries
    pub async fn activate(&self, id: Uuid, actor: Uuid) -> Result<(), AppError> {
        let audit = NewAuditEntry::credential(AuditAction::Activate, actor, id, json!({}));
        self.repo.activate(id, audit).await?;

        tracing::info!(credential_id = %id, "credential activated");
        Ok(())
    }

    /// Replace the secret and reset the test status to `not_tested`.
    pub async fn rotate_key(&self, id: Uuid, new_secret: &str, actor: Uuid) -> Result<(), AppError> {
        let sealed = self.crypto.encrypt(new_secret)?;
        let audit = NewAuditEntry::credential(
            AuditAction::Rotate,
            actor,
            id,
            json!({ "testStatus": TestStatus::NotTested.as_str() }),
        );
        self.repo.rotate(id, sealed, audit).await?;

        tracing::info!(credential_id = %id, "credential key rotated");
        Ok(())
    }

    /// Hard delete. The audit entry keeps provider and model for forensics.
    pub async fn delete(&self, id: Uuid, actor: Uuid) -> Result<(), AppError> {
        let record = self.repo.fetch(id).await?;
        let audit = NewAuditEntry::credential(
            AuditAction::Delete,
            actor,
            id,
            json!({
                "provider": record.provider.as_str(),
                "modelId": record.model_id,
                "wasActive": record.is_active,
            }),
        );
        self.repo.delete(id, audit).await?;

        tracing::info!(credential_id = %id, "credential deleted");
        Ok(())
    }

    /// Run a live test of a stored credential and record the verdict.
    ///
    /// The test status moves to `testing` before the request and to `success`
    /// or `failed` afterwards, unless the credential was rotated meanwhile.
    pub async fn test_stored(
        &self,
        id: Uuid,
        actor: Uuid,
        tester: &ConnectivityTester,
    ) -> Result<ProviderTestResult, AppError> {
        let credential = self.get_decrypted(id).await?;

        self.repo
            .set_test_status(id, TestStatus::Testing, None, None)
            .await?;

        let result = tester
            .test_provider(ProviderTestRequest {
                provider: credential.provider,
                model_id: &credential.model_id,
                api_key: &credential.api_key,
            })
            .await;

        let verdict = if result.ok {
            TestStatus::Success
        } else {
            TestStatus::Failed
        };
        let audit = NewAuditEntry::credential(
            AuditAction::Test,
            actor,
            id,
            json!({
                "ok": result.ok,
                "status": result.status,
                "category": result.category,
            }),
        );
        self.repo
            .set_test_status(id, verdict, Some(result.timestamp), Some(audit))
            .await?;

        Ok(result)
    }
}
