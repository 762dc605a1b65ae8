//! Mapping of raw provider failures onto a closed set of categories.
//!
//! Each provider family has an ordered rule table; the first rule whose status
//! (and, when given, error code or message fragment) matches wins. Anything no
//! rule covers is [`ErrorCategory::Unknown`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidOrRevokedKey,
    ModelNotFoundOrNoAccess,
    QuotaOrBillingLimit,
    NetworkError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InvalidOrRevokedKey => "invalid_or_revoked_key",
            ErrorCategory::ModelNotFoundOrNoAccess => "model_not_found_or_no_access",
            ErrorCategory::QuotaOrBillingLimit => "quota_or_billing_limit",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Operator-facing explanation. Never contains upstream text.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCategory::InvalidOrRevokedKey => "The API key is invalid or has been revoked.",
            ErrorCategory::ModelNotFoundOrNoAccess => {
                "The model was not found or this key has no access to it."
            }
            ErrorCategory::QuotaOrBillingLimit => {
                "The provider refused the request because of a quota, rate or billing limit."
            }
            ErrorCategory::NetworkError => "The provider could not be reached.",
            ErrorCategory::Unknown => "The provider returned an unexpected response.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFamily {
    /// OpenAI and providers speaking its error dialect (Mistral).
    OpenAiCompatible,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    status: u16,
    code: Option<&'static str>,
    message_contains: Option<&'static str>,
    category: ErrorCategory,
}

const fn on(status: u16, category: ErrorCategory) -> Rule {
    Rule {
        status,
        code: None,
        message_contains: None,
        category,
    }
}

const fn on_code(status: u16, code: &'static str, category: ErrorCategory) -> Rule {
    Rule {
        status,
        code: Some(code),
        message_contains: None,
        category,
    }
}

const fn on_message(status: u16, fragment: &'static str, category: ErrorCategory) -> Rule {
    Rule {
        status,
        code: None,
        message_contains: Some(fragment),
        category,
    }
}

use ErrorCategory::{InvalidOrRevokedKey, ModelNotFoundOrNoAccess, QuotaOrBillingLimit};

const OPENAI_COMPATIBLE_RULES: &[Rule] = &[
    on_code(429, "insufficient_quota", QuotaOrBillingLimit),
    on_code(400, "model_not_found", ModelNotFoundOrNoAccess),
    on_code(400, "invalid_model", ModelNotFoundOrNoAccess),
    on(401, InvalidOrRevokedKey),
    on(402, QuotaOrBillingLimit),
    on(403, ModelNotFoundOrNoAccess),
    on(404, ModelNotFoundOrNoAccess),
    on(429, QuotaOrBillingLimit),
];

const ANTHROPIC_RULES: &[Rule] = &[
    on_message(400, "credit balance", QuotaOrBillingLimit),
    on_code(400, "billing_error", QuotaOrBillingLimit),
    on(401, InvalidOrRevokedKey),
    on(402, QuotaOrBillingLimit),
    on(403, ModelNotFoundOrNoAccess),
    on(404, ModelNotFoundOrNoAccess),
    on(429, QuotaOrBillingLimit),
];

const GEMINI_RULES: &[Rule] = &[
    on_code(400, "API_KEY_INVALID", InvalidOrRevokedKey),
    on_message(400, "api key not valid", InvalidOrRevokedKey),
    on_code(400, "API_KEY_EXPIRED", InvalidOrRevokedKey),
    on(401, InvalidOrRevokedKey),
    on(403, InvalidOrRevokedKey),
    on(404, ModelNotFoundOrNoAccess),
    on(429, QuotaOrBillingLimit),
];

impl ErrorFamily {
    fn rules(self) -> &'static [Rule] {
        match self {
            ErrorFamily::OpenAiCompatible => OPENAI_COMPATIBLE_RULES,
            ErrorFamily::Anthropic => ANTHROPIC_RULES,
            ErrorFamily::Gemini => GEMINI_RULES,
        }
    }

    /// Categorize an HTTP error response from a provider of this family.
    pub fn classify(self, status: u16, body: &Value) -> ErrorCategory {
        let codes = error_codes(body);
        let message = error_message(body).to_ascii_lowercase();

        self.rules()
            .iter()
            .find(|rule| {
                rule.status == status
                    && rule.code.is_none_or(|code| codes.contains(&code))
                    && rule
                        .message_contains
                        .is_none_or(|fragment| message.contains(fragment))
            })
            .map_or(ErrorCategory::Unknown, |rule| rule.category)
    }
}

/// Every machine-readable error identifier a provider body carries:
/// `error.code`, `error.type`, `error.status` and Gemini's `error.details[].reason`.
pub fn error_codes(body: &Value) -> Vec<&str> {
    let Some(error) = body.get("error") else {
        return Vec::new();
    };

    let mut codes: Vec<&str> = ["code", "type", "status"]
        .iter()
        .filter_map(|field| error.get(*field).and_then(Value::as_str))
        .collect();

    if let Some(details) = error.get("details").and_then(Value::as_array) {
        codes.extend(
            details
                .iter()
                .filter_map(|detail| detail.get("reason").and_then(Value::as_str)),
        );
    }

    codes
}

pub fn error_message(body: &Value) -> &str {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}
