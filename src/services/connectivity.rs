//! Live connectivity checks against provider APIs.
//!
//! A test is one minimal request (a one-token "ping" completion) shaped by the
//! provider's strategy. It is single-shot: no retries, a bounded timeout, and
//! the outcome is always a [`ProviderTestResult`], never a transport error.
//!
//! # Key handling
//!
//! The key travels only where the strategy places it. Logs carry
//! [`redact_key`] output; the returned body is either a fixed success message
//! or the mapped category and its message, never upstream text.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::crypto::redact_key;
use crate::providers::errors::{self, ErrorCategory};
use crate::providers::{ProviderEndpoints, ProviderKind};

/// Input of a single test.
pub struct ProviderTestRequest<'a> {
    pub provider: ProviderKind,
    pub model_id: &'a str,
    pub api_key: &'a str,
}

/// Response body of the test endpoints.
///
/// ```json
/// {
///   "ok": false,
///   "status": 401,
///   "body": { "category": "invalid_or_revoked_key", "message": "The API key is invalid or has been revoked." },
///   "provider": "openai",
///   "model": "gpt-4o-mini",
///   "timestamp": "2025-12-20T10:00:00Z",
///   "category": "invalid_or_revoked_key"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTestResult {
    pub ok: bool,
    /// Upstream HTTP status; `None` when no response arrived.
    pub status: Option<u16>,
    pub body: Value,
    pub provider: ProviderKind,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
}

pub struct ConnectivityTester {
    client: reqwest::Client,
    endpoints: ProviderEndpoints,
}

impl ConnectivityTester {
    /// Build the shared HTTP client.
    ///
    /// Redirects are not followed: a redirect would carry a query-string key
    /// to a host the strategy never named.
    pub fn new(timeout: Duration, endpoints: ProviderEndpoints) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client, endpoints })
    }

    pub async fn test_provider(&self, request: ProviderTestRequest<'_>) -> ProviderTestResult {
        let strategy = request.provider.strategy();
        let base_url = self.endpoints.base_url(request.provider);
        let key_hint = redact_key(request.api_key);

        tracing::info!(
            provider = %request.provider,
            model = request.model_id,
            key = %key_hint,
            "testing provider connectivity"
        );

        let built = match strategy.build_request(
            &self.client,
            base_url,
            request.model_id,
            request.api_key,
        ) {
            Ok(built) => built,
            Err(e) => {
                tracing::error!(
                    provider = %request.provider,
                    error = %e,
                    "provider base URL does not accept a request path"
                );
                return failure(&request, None, ErrorCategory::Unknown);
            }
        };

        let sent = built.send().await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                // reqwest errors embed the URL, which may hold a query-string key
                let e = e.without_url();
                tracing::warn!(
                    provider = %request.provider,
                    key = %key_hint,
                    timeout = e.is_timeout(),
                    error = %scrub(&e.to_string(), request.api_key),
                    "provider unreachable"
                );
                return failure(&request, None, ErrorCategory::NetworkError);
            }
        };

        let status = response.status().as_u16();
        let body: Value = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(Value::Null),
            Err(e) => {
                let e = e.without_url();
                tracing::warn!(
                    provider = %request.provider,
                    status,
                    error = %scrub(&e.to_string(), request.api_key),
                    "failed to read provider response"
                );
                return failure(&request, Some(status), ErrorCategory::NetworkError);
            }
        };

        if (200..300).contains(&status) {
            tracing::info!(provider = %request.provider, status, key = %key_hint, "provider accepted key");
            return success(&request, status, json!({ "message": "The provider accepted the API key." }));
        }

        if let Some(accepted) = strategy
            .accepted_rejection
            .filter(|accepted| accepted.matches(status, &body))
        {
            tracing::info!(
                provider = %request.provider,
                status,
                accepted_rejection = accepted.name,
                "provider rejected the minimal prompt after authenticating the key"
            );
            return success(
                &request,
                status,
                json!({
                    "message": "The provider authenticated the API key and rejected only the minimal test prompt.",
                    "acceptedRejection": accepted.name,
                }),
            );
        }

        let category = strategy.error_family.classify(status, &body);
        let upstream_codes: Vec<String> = errors::error_codes(&body)
            .into_iter()
            .map(|code| scrub(code, request.api_key))
            .collect();
        tracing::warn!(
            provider = %request.provider,
            status,
            key = %key_hint,
            category = category.as_str(),
            upstream_codes = ?upstream_codes,
            "provider test failed"
        );

        failure(&request, Some(status), category)
    }
}

fn success(request: &ProviderTestRequest<'_>, status: u16, body: Value) -> ProviderTestResult {
    ProviderTestResult {
        ok: true,
        status: Some(status),
        body,
        provider: request.provider,
        model: request.model_id.to_string(),
        timestamp: Utc::now(),
        category: None,
    }
}

fn failure(
    request: &ProviderTestRequest<'_>,
    status: Option<u16>,
    category: ErrorCategory,
) -> ProviderTestResult {
    ProviderTestResult {
        ok: false,
        status,
        body: json!({
            "category": category.as_str(),
            "message": category.message(),
        }),
        provider: request.provider,
        model: request.model_id.to_string(),
        timestamp: Utc::now(),
        category: Some(category),
    }
}

/// Replace every occurrence of `key` in `text` with its redacted form.
pub fn scrub(text: &str, key: &str) -> String {
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, &redact_key(key))
}
