//! End-to-end checks of the admin HTTP surface on the in-memory backends.

mod common;

use axum::{
    Json, Router,
    http::{HeaderMap, Method, StatusCode},
    routing::post,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use common::{Options, spawn_fake_provider, test_app, test_app_with};
use provider_credential_service::{
    error::AppError,
    models::credential::{RedactedCredential, TestStatus},
    models::user::Role,
};

const GOOD_KEY: &str = "sk-good-0123456789abcdef";
const BAD_KEY: &str = "sk-revoked-fedcba9876543210";

/// OpenAI-shaped provider accepting only `GOOD_KEY`. Its error message
/// echoes the key back, as real providers partially do.
fn fake_openai() -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(|headers: HeaderMap| async move {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if auth == format!("Bearer {GOOD_KEY}") {
                (StatusCode::OK, Json(json!({ "choices": [] })))
            } else {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({
                        "error": {
                            "message": format!("Incorrect API key provided: {auth}"),
                            "type": "invalid_request_error",
                            "code": "invalid_api_key"
                        }
                    })),
                )
            }
        }),
    )
}

async fn create(
    app: &common::TestApp,
    token: &str,
    provider: &str,
    key: &str,
    active: bool,
) -> Uuid {
    let (status, body) = app
        .request(
            Method::POST,
            "/admin/credentials",
            Some(token),
            Some(json!({
                "provider": provider,
                "modelId": "gpt-4o-mini",
                "apiKey": key,
                "isActive": active,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn list(app: &common::TestApp, token: &str) -> Vec<RedactedCredential> {
    let (status, body) = app
        .request(Method::GET, "/admin/credentials", Some(token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn requests_without_a_session_are_rejected() {
    let app = test_app();

    let (status, body) = app
        .request(Method::GET, "/admin/credentials", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthenticated");

    let (status, _) = app
        .request(Method::GET, "/admin/credentials", Some("not-a-real-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_roles_are_forbidden_without_learning_anything() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;
    let analyst = app.token_for("ana", Role::Analyst).await;
    let viewer = app.token_for("vic", Role::Viewer).await;
    let id = create(&app, &admin, "openai", GOOD_KEY, false).await;

    for token in [&analyst, &viewer] {
        let (status, body) = app
            .request(Method::GET, "/admin/credentials", Some(token), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");

        // existing and unknown ids answer the same
        let existing = format!("/admin/credentials/{id}/activate");
        let unknown = format!("/admin/credentials/{}/activate", Uuid::new_v4());
        for uri in [existing, unknown] {
            let (status, _) = app.request(Method::POST, &uri, Some(token), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
    }

    // nothing changed
    assert!(!list(&app, &admin).await[0].is_active);
}

#[tokio::test]
async fn malformed_create_requests_are_validation_errors() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;

    let cases = [
        json!({ "provider": "openai", "modelId": "gpt-4o-mini" }),
        json!({ "provider": "openai", "modelId": "  ", "apiKey": GOOD_KEY }),
        json!({ "modelId": "gpt-4o-mini", "apiKey": GOOD_KEY }),
        json!({ "provider": "OpenAI-compatible", "modelId": "gpt-4o-mini", "apiKey": GOOD_KEY }),
        json!({ "provider": "openai", "modelId": 42, "apiKey": GOOD_KEY }),
    ];
    for body in cases {
        let (status, response) = app
            .request(Method::POST, "/admin/credentials", Some(&admin), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(response["error"]["code"], "validation_error");
    }

    assert!(list(&app, &admin).await.is_empty());
    assert!(app.audit_actions().is_empty());
}

#[tokio::test]
async fn activating_one_credential_deactivates_the_other() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;

    let a = create(&app, &admin, "openai", "sk-a-0000000000000000", true).await;
    let b = create(&app, &admin, "anthropic", "sk-b-1111111111111111", true).await;

    let credentials = list(&app, &admin).await;
    let active: Vec<Uuid> = credentials.iter().filter(|c| c.is_active).map(|c| c.id).collect();
    assert_eq!(active, vec![b]);

    let (status, _) = app
        .request(Method::POST, &format!("/admin/credentials/{a}/activate"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let credentials = list(&app, &admin).await;
    let active: Vec<Uuid> = credentials.iter().filter(|c| c.is_active).map(|c| c.id).collect();
    assert_eq!(active, vec![a]);

    let config = app
        .state
        .provider_config
        .get_active_provider_config()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(config.api_key.as_str(), "sk-a-0000000000000000");

    assert_eq!(app.audit_actions(), vec!["CREATE", "CREATE", "ACTIVATE"]);
}

#[tokio::test]
async fn activating_an_unknown_id_is_not_found() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;

    let uri = format!("/admin/credentials/{}/activate", Uuid::new_v4());
    let (status, body) = app.request(Method::POST, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn malformed_ids_get_structured_validation_errors() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;

    let cases = [
        (Method::POST, "/admin/credentials/not-a-uuid/activate", None),
        (Method::POST, "/admin/credentials/not-a-uuid/test", None),
        (Method::DELETE, "/admin/credentials/not-a-uuid", None),
        (Method::GET, "/admin/credentials/not-a-uuid/audit", None),
        (
            Method::POST,
            "/admin/credentials/not-a-uuid/rotate",
            Some(json!({ "apiKey": GOOD_KEY })),
        ),
    ];
    for (method, uri, body) in cases {
        let (status, response) = app.request(method, uri, Some(&admin), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(response["error"]["code"], "validation_error", "{uri}");
        assert!(response["error"]["message"].is_string(), "{uri}");
    }
    assert!(app.audit_actions().is_empty());
}

#[tokio::test]
async fn model_ids_that_would_reshape_the_provider_url_are_refused() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;

    for model in ["x/../../../admin/drop?", "gemini?alt=sse", "a#b"] {
        let (status, response) = app
            .request(
                Method::POST,
                "/admin/credentials",
                Some(&admin),
                Some(json!({ "provider": "gemini", "modelId": model, "apiKey": GOOD_KEY })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{model}");
        assert_eq!(response["error"]["code"], "validation_error");

        let (status, _) = app
            .request(
                Method::POST,
                "/admin/credentials/test",
                Some(&admin),
                Some(json!({ "provider": "gemini", "modelId": model, "apiKey": GOOD_KEY })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{model}");
    }

    assert!(list(&app, &admin).await.is_empty());
}

#[tokio::test]
async fn secrets_never_leave_in_responses_or_audit() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;
    let id = create(&app, &admin, "openai", GOOD_KEY, true).await;

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/admin/credentials/{id}/rotate"),
            Some(&admin),
            Some(json!({ "apiKey": "sk-rotated-aaaaaaaaaaaaaaaa" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, listing) = app.request_text(Method::GET, "/admin/credentials", &admin).await;
    assert!(!listing.contains(GOOD_KEY));
    assert!(!listing.contains("sk-rotated"));

    let credentials = list(&app, &admin).await;
    assert_eq!(credentials[0].secret_preview, "***");

    let (_, trail) = app
        .request_text(Method::GET, &format!("/admin/credentials/{id}/audit"), &admin)
        .await;
    assert!(trail.contains("ROTATE"));
    assert!(!trail.contains(GOOD_KEY));
    assert!(!trail.contains("sk-rotated"));
}

#[tokio::test]
async fn stored_key_test_reports_invalid_key() {
    let base = spawn_fake_provider(fake_openai()).await;
    let app = test_app_with(Options {
        provider_base_url: base,
        ..Options::default()
    });
    let admin = app.token_for("root", Role::Admin).await;
    let id = create(&app, &admin, "openai", BAD_KEY, false).await;

    let (status, body) = app
        .request(Method::POST, &format!("/admin/credentials/{id}/test"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["status"], 401);
    assert_eq!(body["category"], "invalid_or_revoked_key");
    assert_eq!(body["provider"], "openai");
    assert_eq!(body["model"], "gpt-4o-mini");
    assert!(!body.to_string().contains(BAD_KEY));

    let credentials = list(&app, &admin).await;
    assert_eq!(credentials[0].test_status, TestStatus::Failed);
    assert!(credentials[0].last_tested_at.is_some());
    assert_eq!(app.audit_actions(), vec!["CREATE", "TEST"]);
}

#[tokio::test]
async fn rotation_resets_test_status_and_replaces_the_key() {
    let base = spawn_fake_provider(fake_openai()).await;
    let app = test_app_with(Options {
        provider_base_url: base,
        ..Options::default()
    });
    let admin = app.token_for("root", Role::Admin).await;
    let id = create(&app, &admin, "openai", GOOD_KEY, false).await;

    let (_, body) = app
        .request(Method::POST, &format!("/admin/credentials/{id}/test"), Some(&admin), None)
        .await;
    assert_eq!(body["ok"], true);
    assert_eq!(list(&app, &admin).await[0].test_status, TestStatus::Success);

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/admin/credentials/{id}/rotate"),
            Some(&admin),
            Some(json!({ "apiKey": "sk-next-2222222222222222" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(list(&app, &admin).await[0].test_status, TestStatus::NotTested);
    let decrypted = app.state.credentials.get_decrypted(id).await.unwrap();
    assert_eq!(decrypted.api_key.as_str(), "sk-next-2222222222222222");
}

#[tokio::test]
async fn rotate_requires_a_key() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;
    let id = create(&app, &admin, "openai", GOOD_KEY, false).await;

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/admin/credentials/{id}/rotate"),
            Some(&admin),
            Some(json!({ "apiKey": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let decrypted = app.state.credentials.get_decrypted(id).await.unwrap();
    assert_eq!(decrypted.api_key.as_str(), GOOD_KEY);
}

#[tokio::test]
async fn unsaved_key_test_persists_nothing() {
    let base = spawn_fake_provider(fake_openai()).await;
    let app = test_app_with(Options {
        provider_base_url: base,
        ..Options::default()
    });
    let admin = app.token_for("root", Role::Admin).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/admin/credentials/test",
            Some(&admin),
            Some(json!({ "provider": "openai", "modelId": "gpt-4o-mini", "apiKey": GOOD_KEY })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    assert!(list(&app, &admin).await.is_empty());
    assert!(app.audit_actions().is_empty());
}

#[tokio::test]
async fn deleted_credentials_are_gone_but_audited() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;
    let id = create(&app, &admin, "gemini", GOOD_KEY, true).await;

    let uri = format!("/admin/credentials/{id}");
    let (status, _) = app.request(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(list(&app, &admin).await.is_empty());
    assert!(matches!(
        app.state.credentials.get_decrypted(id).await,
        Err(AppError::NotFound)
    ));
    assert!(
        app.state
            .provider_config
            .get_active_provider_config()
            .await
            .unwrap()
            .is_none()
    );

    let (status, _) = app.request(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, trail) = app
        .request(Method::GET, &format!("{uri}/audit"), Some(&admin), None)
        .await;
    let actions: Vec<&str> = trail
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["CREATE", "DELETE"]);
    let delete_entry = &trail[1];
    assert_eq!(delete_entry["payload"]["provider"], "gemini");
    assert_eq!(delete_entry["targetTable"], "provider_credentials");
}

#[tokio::test]
async fn audit_outage_does_not_block_mutations() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;
    let before = app.audit.entries().len();

    app.audit.set_fail_writes(true);
    let id = create(&app, &admin, "mistral", GOOD_KEY, true).await;
    let (status, _) = app
        .request(Method::POST, &format!("/admin/credentials/{id}/activate"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let credentials = list(&app, &admin).await;
    assert_eq!(credentials.len(), 1);
    assert!(credentials[0].is_active);
    assert_eq!(app.audit.entries().len(), before);
}

#[tokio::test]
async fn disabled_accounts_lose_access_immediately() {
    let app = test_app();
    let admin = app.token_for("root", Role::Admin).await;

    let (status, _) = app
        .request(Method::GET, "/admin/credentials", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    app.users.set_user_active("root", false);
    let (status, _) = app
        .request(Method::GET, "/admin/credentials", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_logout_round_trip() {
    let app = test_app();
    app.state
        .sessions
        .create_user("ops", "ops-password-long", Role::Admin)
        .await
        .unwrap();

    let (status, body) = app
        .request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "ops", "password": "ops-password-long" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["expiresAt"].is_string());
    let token = body["token"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(Method::GET, "/admin/credentials", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(Method::POST, "/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::GET, "/admin/credentials", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let login_entry = app
        .audit
        .entries()
        .into_iter()
        .find(|e| e.action == "LOGIN_SUCCEEDED")
        .unwrap();
    assert_eq!(login_entry.payload["source"], "203.0.113.7");
    assert!(!login_entry.payload.to_string().contains("ops-password-long"));
}

#[tokio::test]
async fn login_attempts_are_rate_limited_per_source() {
    let app = test_app_with(Options {
        login_max_attempts: 3,
        ..Options::default()
    });
    app.state
        .sessions
        .create_user("ops", "ops-password-long", Role::Admin)
        .await
        .unwrap();

    let wrong = json!({ "username": "ops", "password": "guess" });
    for _ in 0..3 {
        let (status, _) = app
            .request(Method::POST, "/auth/login", None, Some(wrong.clone()))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // the cap holds even for the right password
    let right = json!({ "username": "ops", "password": "ops-password-long" });
    let (status, body) = app
        .request(Method::POST, "/auth/login", None, Some(right))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn health_reports_in_memory_backend() {
    let app = test_app();
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "in_memory");
}
