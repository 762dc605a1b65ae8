//! Provider credential models and API request/response types.
//!
//! This module defines:
//! - `CredentialRow`: raw `provider_credentials` row as sqlx reads it
//! - `CredentialRecord`: the same row with typed status and the ciphertext triple
//! - `RedactedCredential`: the only shape that leaves the store over HTTP
//! - `DecryptedCredential`: privileged, in-process view holding the plaintext key
//! - Request bodies for create, rotate and ad-hoc test

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{EncryptedSecret, SECRET_PREVIEW};
use crate::providers::ProviderKind;

/// Result of the most recent connectivity test of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    NotTested,
    Testing,
    Success,
    Failed,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::NotTested => "not_tested",
            TestStatus::Testing => "testing",
            TestStatus::Success => "success",
            TestStatus::Failed => "failed",
        }
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_tested" => Ok(TestStatus::NotTested),
            "testing" => Ok(TestStatus::Testing),
            "success" => Ok(TestStatus::Success),
            "failed" => Ok(TestStatus::Failed),
            other => Err(format!("unknown test status `{other}`")),
        }
    }
}

/// Raw row of the `provider_credentials` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
    pub id: Uuid,
    pub provider: String,
    pub model_id: String,
    pub secret_iv: Vec<u8>,
    pub secret_ciphertext: Vec<u8>,
    pub secret_tag: Vec<u8>,
    pub is_active: bool,
    pub test_status: String,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored credential. The secret is only present as ciphertext.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub model_id: String,
    pub secret: EncryptedSecret,
    pub is_active: bool,
    pub test_status: TestStatus,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for CredentialRecord {
    type Error = String;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            provider: row.provider.parse()?,
            model_id: row.model_id,
            secret: EncryptedSecret {
                iv: row.secret_iv,
                ciphertext: row.secret_ciphertext,
                tag: row.secret_tag,
            },
            is_active: row.is_active,
            test_status: row.test_status.parse()?,
            last_tested_at: row.last_tested_at,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Values for a credential about to be inserted.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub model_id: String,
    pub secret: EncryptedSecret,
    pub created_by: Uuid,
}

/// Response body for `GET /admin/credentials`.
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "provider": "openai",
///   "modelId": "gpt-4o-mini",
///   "isActive": true,
///   "testStatus": "not_tested",
///   "secretPreview": "***",
///   "createdAt": "2025-12-20T10:00:00Z",
///   "updatedAt": "2025-12-20T10:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedactedCredential {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub model_id: String,
    pub is_active: bool,
    pub test_status: TestStatus,
    pub secret_preview: String,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Drops the ciphertext and replaces it with the fixed mask.
impl From<CredentialRecord> for RedactedCredential {
    fn from(record: CredentialRecord) -> Self {
        Self {
            id: record.id,
            provider: record.provider,
            model_id: record.model_id,
            is_active: record.is_active,
            test_status: record.test_status,
            secret_preview: SECRET_PREVIEW.to_string(),
            last_tested_at: record.last_tested_at,
            created_by: record.created_by,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Privileged view used by the connectivity tester and the provider config reader.
/// Never serialized.
pub struct DecryptedCredential {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub model_id: String,
    pub api_key: Zeroizing<String>,
    pub is_active: bool,
    pub test_status: TestStatus,
}

impl fmt::Debug for DecryptedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedCredential")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("api_key", &SECRET_PREVIEW)
            .field("is_active", &self.is_active)
            .field("test_status", &self.test_status)
            .finish()
    }
}

/// Request body for `POST /admin/credentials`.
///
/// Every field is optional at the type level so that a missing field surfaces
/// as a `400 validation_error` rather than a deserialization rejection.
///
/// ```json
/// {
///   "provider": "anthropic",
///   "modelId": "claude-3-5-haiku-latest",
///   "apiKey": "sk-ant-...",
///   "isActive": true
/// }
/// ```
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCredentialRequest {
    pub provider: Option<String>,
    pub model_id: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Request body for `POST /admin/credentials/{id}/rotate`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateKeyRequest {
    pub api_key: Option<String>,
}

/// Request body for `POST /admin/credentials/test` (key not yet stored).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestKeyRequest {
    pub provider: Option<String>,
    pub model_id: Option<String>,
    pub api_key: Option<String>,
}

/// Response body for `POST /admin/credentials`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedCredential {
    pub id: Uuid,
}

impl fmt::Debug for CreateCredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateCredentialRequest")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| SECRET_PREVIEW))
            .field("is_active", &self.is_active)
            .finish()
    }
}

impl fmt::Debug for RotateKeyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotateKeyRequest")
            .field("api_key", &self.api_key.as_ref().map(|_| SECRET_PREVIEW))
            .finish()
    }
}

impl fmt::Debug for TestKeyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestKeyRequest")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| SECRET_PREVIEW))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            TestStatus::NotTested,
            TestStatus::Testing,
            TestStatus::Success,
            TestStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TestStatus>().unwrap(), status);
        }
        assert!("pending".parse::<TestStatus>().is_err());
    }

    #[test]
    fn request_debug_hides_api_key() {
        let request: CreateCredentialRequest = serde_json::from_str(
            r#"{"provider":"openai","modelId":"gpt-4o-mini","apiKey":"sk-very-secret-value"}"#,
        )
        .unwrap();
        assert!(!format!("{request:?}").contains("sk-very-secret-value"));
    }
}
