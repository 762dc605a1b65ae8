//! Supported AI providers and how to reach each of them.
//!
//! A provider name is parsed exactly once, at the API boundary, into the closed
//! [`ProviderKind`] enum. Everything provider-specific (URL shape, where the key
//! travels, request body, error family, accepted rejections) lives in the static
//! [`STRATEGIES`] table and is looked up by kind.

pub mod errors;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::config::Config;
use errors::ErrorFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Mistral,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Mistral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Mistral => "mistral",
        }
    }

    pub fn strategy(self) -> &'static ProviderStrategy {
        // STRATEGIES is ordered like ProviderKind::ALL
        &STRATEGIES[self as usize]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact, case-sensitive match on the canonical name. No partial matches.
impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let supported: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unsupported provider `{s}` (supported: {})", supported.join(", "))
            })
    }
}

/// Characters a model id may contain besides ASCII alphanumerics.
const MODEL_ID_PUNCTUATION: &[char] = &['.', '_', ':', '-', '@'];

/// Accept only model ids that read as a single opaque name.
///
/// Separators such as `/`, `?` and `#` are refused, so an id can never rewrite
/// the path or query of the provider request built from it.
pub fn check_model_id(model_id: &str) -> Result<(), String> {
    match model_id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !MODEL_ID_PUNCTUATION.contains(c))
    {
        None => Ok(()),
        Some(c) => Err(format!(
            "`modelId` contains {c:?}; allowed are letters, digits and . _ : - @"
        )),
    }
}

/// Where a strategy puts the API key on the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPlacement {
    Bearer,
    Header(&'static str),
    Query(&'static str),
}

/// A provider response that is an HTTP error yet proves the key authenticated.
///
/// Each one is declared explicitly on the strategy that needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedRejection {
    pub name: &'static str,
    pub status: u16,
    pub error_code: &'static str,
    /// Messages containing any of these fragments are real failures.
    pub unless_message_contains: &'static [&'static str],
}

impl AcceptedRejection {
    pub fn matches(&self, status: u16, body: &Value) -> bool {
        if status != self.status {
            return false;
        }
        let codes = errors::error_codes(body);
        if !codes.iter().any(|c| *c == self.error_code) {
            return false;
        }
        let message = errors::error_message(body).to_ascii_lowercase();
        !self
            .unless_message_contains
            .iter()
            .any(|fragment| message.contains(fragment))
    }
}

/// Anthropic answers a one-token ping with some models using a 400
/// `invalid_request_error`; authentication has already succeeded by then.
pub const ANTHROPIC_MINIMAL_PROMPT_REJECTED: AcceptedRejection = AcceptedRejection {
    name: "minimal_prompt_rejected",
    status: 400,
    error_code: "invalid_request_error",
    unless_message_contains: &["credit balance", "api key", "x-api-key"],
};

/// Per-provider request shape for the minimal connectivity ping.
pub struct ProviderStrategy {
    pub kind: ProviderKind,
    pub default_base_url: &'static str,
    pub key_placement: KeyPlacement,
    pub extra_headers: &'static [(&'static str, &'static str)],
    pub error_family: ErrorFamily,
    pub accepted_rejection: Option<AcceptedRejection>,
    /// Path segments below the base URL, each one percent-encoded on its own.
    path: fn(&str) -> Vec<String>,
    body: fn(&str) -> Value,
}

impl ProviderStrategy {
    pub fn url(&self, base_url: &str, model_id: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(base_url)?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend((self.path)(model_id));
        Ok(url)
    }

    pub fn body(&self, model_id: &str) -> Value {
        (self.body)(model_id)
    }

    /// Build the single request a test issues. The key goes only where
    /// [`KeyPlacement`] says.
    pub fn build_request(
        &self,
        client: &reqwest::Client,
        base_url: &str,
        model_id: &str,
        api_key: &str,
    ) -> Result<reqwest::RequestBuilder, url::ParseError> {
        let mut request = client
            .post(self.url(base_url, model_id)?)
            .json(&self.body(model_id));

        for (name, value) in self.extra_headers {
            request = request.header(*name, *value);
        }

        Ok(match self.key_placement {
            KeyPlacement::Bearer => request.bearer_auth(api_key),
            KeyPlacement::Header(name) => request.header(name, api_key),
            KeyPlacement::Query(name) => request.query(&[(name, api_key)]),
        })
    }
}

fn segments(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn chat_completions_path(_model: &str) -> Vec<String> {
    segments(&["v1", "chat", "completions"])
}

fn chat_completions_body(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": "ping" }],
        "max_tokens": 1,
    })
}

fn anthropic_path(_model: &str) -> Vec<String> {
    segments(&["v1", "messages"])
}

fn anthropic_body(model: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": 1,
        "messages": [{ "role": "user", "content": "ping" }],
    })
}

fn gemini_path(model: &str) -> Vec<String> {
    vec![
        "v1beta".to_string(),
        "models".to_string(),
        format!("{model}:generateContent"),
    ]
}

fn gemini_body(_model: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": "ping" }] }],
        "generationConfig": { "maxOutputTokens": 1 },
    })
}

pub static STRATEGIES: [ProviderStrategy; 4] = [
    ProviderStrategy {
        kind: ProviderKind::OpenAi,
        default_base_url: "https://api.openai.com",
        key_placement: KeyPlacement::Bearer,
        extra_headers: &[],
        error_family: ErrorFamily::OpenAiCompatible,
        accepted_rejection: None,
        path: chat_completions_path,
        body: chat_completions_body,
    },
    ProviderStrategy {
        kind: ProviderKind::Anthropic,
        default_base_url: "https://api.anthropic.com",
        key_placement: KeyPlacement::Header("x-api-key"),
        extra_headers: &[("anthropic-version", "2023-06-01")],
        error_family: ErrorFamily::Anthropic,
        accepted_rejection: Some(ANTHROPIC_MINIMAL_PROMPT_REJECTED),
        path: anthropic_path,
        body: anthropic_body,
    },
    ProviderStrategy {
        kind: ProviderKind::Gemini,
        default_base_url: "https://generativelanguage.googleapis.com",
        key_placement: KeyPlacement::Query("key"),
        extra_headers: &[],
        error_family: ErrorFamily::Gemini,
        accepted_rejection: None,
        path: gemini_path,
        body: gemini_body,
    },
    ProviderStrategy {
        kind: ProviderKind::Mistral,
        default_base_url: "https://api.mistral.ai",
        key_placement: KeyPlacement::Bearer,
        extra_headers: &[],
        error_family: ErrorFamily::OpenAiCompatible,
        accepted_rejection: None,
        path: chat_completions_path,
        body: chat_completions_body,
    },
];

/// Base URL per provider, with operator overrides applied.
#[derive(Debug, Clone, Default)]
pub struct ProviderEndpoints {
    openai: Option<String>,
    anthropic: Option<String>,
    gemini: Option<String>,
    mistral: Option<String>,
}

impl ProviderEndpoints {
    pub fn from_config(config: &Config) -> Self {
        Self {
            openai: config.openai_base_url.clone(),
            anthropic: config.anthropic_base_url.clone(),
            gemini: config.gemini_base_url.clone(),
            mistral: config.mistral_base_url.clone(),
        }
    }

    /// Point every provider at the same base URL (local fake servers).
    pub fn all_at(base_url: &str) -> Self {
        Self {
            openai: Some(base_url.to_string()),
            anthropic: Some(base_url.to_string()),
            gemini: Some(base_url.to_string()),
            mistral: Some(base_url.to_string()),
        }
    }

    pub fn base_url(&self, kind: ProviderKind) -> &str {
        let overridden = match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Mistral => &self.mistral,
        };
        overridden
            .as_deref()
            .unwrap_or(kind.strategy().default_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_table_is_ordered_by_kind() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.strategy().kind, kind);
        }
    }

    #[test]
    fn provider_names_match_exactly() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        // no substring or case-folded fallbacks
        assert!("azure-openai".parse::<ProviderKind>().is_err());
        assert!("OpenAI".parse::<ProviderKind>().is_err());
        assert!("claude-anthropic".parse::<ProviderKind>().is_err());
        assert!("".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn gemini_url_embeds_model() {
        let strategy = ProviderKind::Gemini.strategy();
        assert_eq!(
            strategy
                .url("https://example.test/", "gemini-1.5-flash")
                .unwrap()
                .as_str(),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn model_id_stays_inside_its_path_segment() {
        let url = ProviderKind::Gemini
            .strategy()
            .url("https://example.test", "x/../../../admin/drop?")
            .unwrap();
        assert_eq!(url.path(), "/v1beta/models/x%2F..%2F..%2F..%2Fadmin%2Fdrop%3F:generateContent");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn base_url_prefix_is_kept() {
        let url = ProviderKind::OpenAi
            .strategy()
            .url("https://proxy.test/openai/", "gpt-4o-mini")
            .unwrap();
        assert_eq!(url.as_str(), "https://proxy.test/openai/v1/chat/completions");
    }

    #[test]
    fn model_ids_with_separators_are_refused() {
        for ok in ["gpt-4o-mini", "claude-3-5-haiku-20241022", "ft:gpt-4o:org::abc", "gemini-1.5-flash"] {
            assert!(check_model_id(ok).is_ok(), "{ok}");
        }
        for bad in ["x/../admin", "model?key=1", "a#b", "with space", "tab\t", "%2F"] {
            assert!(check_model_id(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn key_placement_per_provider() {
        assert_eq!(ProviderKind::OpenAi.strategy().key_placement, KeyPlacement::Bearer);
        assert_eq!(
            ProviderKind::Anthropic.strategy().key_placement,
            KeyPlacement::Header("x-api-key")
        );
        assert_eq!(ProviderKind::Gemini.strategy().key_placement, KeyPlacement::Query("key"));
    }

    #[test]
    fn only_anthropic_has_an_accepted_rejection() {
        for kind in ProviderKind::ALL {
            let has = kind.strategy().accepted_rejection.is_some();
            assert_eq!(has, kind == ProviderKind::Anthropic, "{kind}");
        }
    }

    #[test]
    fn accepted_rejection_excludes_billing_messages() {
        let minimal = json!({
            "type": "error",
            "error": { "type": "invalid_request_error", "message": "max_tokens: too small for this prompt" }
        });
        let billing = json!({
            "type": "error",
            "error": { "type": "invalid_request_error", "message": "Your credit balance is too low" }
        });
        assert!(ANTHROPIC_MINIMAL_PROMPT_REJECTED.matches(400, &minimal));
        assert!(!ANTHROPIC_MINIMAL_PROMPT_REJECTED.matches(400, &billing));
        assert!(!ANTHROPIC_MINIMAL_PROMPT_REJECTED.matches(401, &minimal));
    }

    #[test]
    fn endpoint_overrides_apply() {
        let endpoints = ProviderEndpoints::all_at("http://127.0.0.1:9999");
        assert_eq!(endpoints.base_url(ProviderKind::Mistral), "http://127.0.0.1:9999");
        assert_eq!(
            ProviderEndpoints::default().base_url(ProviderKind::OpenAi),
            "https://api.openai.com"
        );
    }
}
