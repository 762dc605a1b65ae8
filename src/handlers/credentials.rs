//! Provider credential admin endpoints.
//!
//! This module implements the credential API (admin role only):
//! - GET /admin/credentials - List credentials, secrets redacted
//! - POST /admin/credentials - Store a new credential
//! - POST /admin/credentials/{id}/rotate - Replace the key
//! - POST /admin/credentials/{id}/activate - Make it the active credential
//! - POST /admin/credentials/{id}/test - Live-test a stored key
//! - POST /admin/credentials/test - Live-test a key before storing it
//! - DELETE /admin/credentials/{id} - Hard delete
//! - GET /admin/credentials/{id}/audit - Audit trail of one credential
//!
//! Request bodies are validated here; nothing malformed reaches the store.

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::AppError;
use crate::models::audit::AuditLogEntry;
use crate::models::credential::{
    CreateCredentialRequest, CreatedCredential, RedactedCredential, RotateKeyRequest,
    TestKeyRequest,
};
use crate::models::user::Principal;
use crate::providers::{ProviderKind, check_model_id};
use crate::services::connectivity::{ProviderTestRequest, ProviderTestResult};

/// List all credentials.
///
/// # Response (200 OK)
///
/// ```json
/// [
///   {
///     "id": "550e8400-e29b-41d4-a716-446655440000",
///     "provider": "openai",
///     "modelId": "gpt-4o-mini",
///     "isActive": true,
///     "testStatus": "success",
///     "secretPreview": "***",
///     ...
///   }
/// ]
/// ```
pub async fn list_credentials(
    State(state): State<AppState>,
) -> Result<Json<Vec<RedactedCredential>>, AppError> {
    Ok(Json(state.credentials.list().await?))
}

/// Store a new credential.
///
/// # Request Body
///
/// ```json
/// {
///   "provider": "anthropic",
///   "modelId": "claude-3-5-haiku-latest",
///   "apiKey": "sk-ant-...",
///   "isActive": false
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: `{"id": "..."}`
/// - **400**: missing or blank field, unknown provider
pub async fn create_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Result<Json<CreateCredentialRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = body?;

    let provider = parse_provider(request.provider.as_deref())?;
    let model_id = parse_model_id(request.model_id.as_deref())?;
    let api_key = required(request.api_key.as_deref(), "apiKey")?;
    let make_active = request.is_active.unwrap_or(false);

    let id = state
        .credentials
        .create(provider, model_id, api_key, make_active, principal.user_id)
        .await?;

    Ok((StatusCode::CREATED, Json(CreatedCredential { id })))
}

/// Replace the key of a credential. The test status resets to `not_tested`.
///
/// # Request Body
///
/// ```json
/// { "apiKey": "sk-new-..." }
/// ```
pub async fn rotate_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<RotateKeyRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = path?;
    let Json(request) = body?;
    let api_key = required(request.api_key.as_deref(), "apiKey")?;

    state
        .credentials
        .rotate_key(id, api_key, principal.user_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Make a credential the single active one.
///
/// # Response
///
/// - **204**: activated
/// - **404**: unknown id
/// - **409**: lost a race with a concurrent activation; retry
pub async fn activate_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = path?;
    state.credentials.activate(id, principal.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Live-test a stored credential and record the outcome on it.
///
/// A failing key is still a `200` with `"ok": false` and a `category`; the
/// test ran and reached a conclusion.
pub async fn test_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ProviderTestResult>, AppError> {
    let Path(id) = path?;
    let result = state
        .credentials
        .test_stored(id, principal.user_id, &state.tester)
        .await?;

    Ok(Json(result))
}

/// Live-test a key that has not been stored. Nothing is persisted.
pub async fn test_unsaved_key(
    State(state): State<AppState>,
    body: Result<Json<TestKeyRequest>, JsonRejection>,
) -> Result<Json<ProviderTestResult>, AppError> {
    let Json(request) = body?;

    let provider = parse_provider(request.provider.as_deref())?;
    let model_id = parse_model_id(request.model_id.as_deref())?;
    let api_key = required(request.api_key.as_deref(), "apiKey")?;

    let result = state
        .tester
        .test_provider(ProviderTestRequest {
            provider,
            model_id,
            api_key,
        })
        .await;

    Ok(Json(result))
}

/// Hard delete. The `DELETE` audit entry keeps provider and model.
pub async fn delete_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path(id) = path?;
    state.credentials.delete(id, principal.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Audit entries recorded against one credential, oldest first.
///
/// Entries outlive the credential, so a deleted id still has a trail.
pub async fn credential_audit_trail(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let Path(id) = path?;
    Ok(Json(state.audit.entries_for_target(id).await?))
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, AppError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!("`{field}` is required"))),
    }
}

fn parse_model_id(value: Option<&str>) -> Result<&str, AppError> {
    let model_id = required(value, "modelId")?;
    check_model_id(model_id).map_err(AppError::Validation)?;
    Ok(model_id)
}

fn parse_provider(value: Option<&str>) -> Result<ProviderKind, AppError> {
    let raw = required(value, "provider")?;
    raw.parse().map_err(AppError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_rejected() {
        assert!(required(None, "modelId").is_err());
        assert!(required(Some("   "), "modelId").is_err());
        assert_eq!(required(Some(" gpt-4o "), "modelId").unwrap(), "gpt-4o");
    }

    #[test]
    fn model_ids_are_trimmed_then_checked() {
        assert_eq!(parse_model_id(Some(" gemini-1.5-flash ")).unwrap(), "gemini-1.5-flash");
        assert!(matches!(
            parse_model_id(Some("x/../../admin")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn provider_must_be_known() {
        assert_eq!(parse_provider(Some("gemini")).unwrap(), ProviderKind::Gemini);
        let err = parse_provider(Some("openai-compatible")).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("openai, anthropic")));
    }
}
