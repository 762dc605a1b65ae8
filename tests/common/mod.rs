//! Shared harness: the full router on in-memory backends, plus a local
//! stand-in for provider APIs.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use argon2::Params;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::connect_info::MockConnectInfo,
    http::{Method, Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;

use provider_credential_service::{
    app::{self, AppState},
    crypto::CryptoEngine,
    models::audit::CREDENTIALS_TABLE,
    models::user::Role,
    providers::ProviderEndpoints,
    services::{
        connectivity::ConnectivityTester,
        credential_service::CredentialService,
        provider_config::ProviderConfigReader,
        rate_limit::{InMemoryLoginAttempts, LoginRateLimiter},
        session_service::SessionService,
    },
    store::memory::{InMemoryAuditLog, InMemoryCredentialRepository, InMemorySessionRepository},
};

pub const ENCRYPTION_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const PEER: ([u8; 4], u16) = ([203, 0, 113, 7], 50_000);

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub audit: Arc<InMemoryAuditLog>,
    pub users: Arc<InMemorySessionRepository>,
    pub credentials: Arc<InMemoryCredentialRepository>,
    pub crypto: Arc<CryptoEngine>,
}

pub struct Options {
    pub provider_base_url: String,
    pub login_max_attempts: u32,
    pub provider_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            // nothing listens here; tests that reach a provider set their own
            provider_base_url: "http://127.0.0.1:9".to_string(),
            login_max_attempts: 5,
            provider_timeout: Duration::from_secs(5),
        }
    }
}

pub fn test_app() -> TestApp {
    test_app_with(Options::default())
}

pub fn test_app_with(options: Options) -> TestApp {
    let crypto = Arc::new(CryptoEngine::from_secret(Some(ENCRYPTION_SECRET)).unwrap());
    let audit = InMemoryAuditLog::new();
    let credentials = Arc::new(InMemoryCredentialRepository::new(audit.clone()));
    let users = Arc::new(InMemorySessionRepository::new());

    let limiter = Arc::new(LoginRateLimiter::new(
        Arc::new(InMemoryLoginAttempts::new()),
        options.login_max_attempts,
        chrono::Duration::minutes(15),
    ));
    let sessions = SessionService::new(users.clone(), audit.clone(), limiter, chrono::Duration::hours(1))
        .with_password_params(Params::new(1024, 1, 1, None).unwrap());
    let tester = ConnectivityTester::new(
        options.provider_timeout,
        ProviderEndpoints::all_at(&options.provider_base_url),
    )
    .unwrap();

    let state = AppState {
        credentials: CredentialService::new(credentials.clone(), crypto.clone()),
        sessions,
        tester: Arc::new(tester),
        audit: audit.clone(),
        provider_config: ProviderConfigReader::new(credentials.clone(), crypto.clone()),
        pool: None,
    };
    let router = app::router(state.clone()).layer(MockConnectInfo(SocketAddr::from(PEER)));

    TestApp {
        router,
        state,
        audit,
        users,
        credentials,
        crypto,
    }
}

impl TestApp {
    /// Create a user and return a bearer token for it.
    pub async fn token_for(&self, username: &str, role: Role) -> String {
        let password = format!("{username}-password");
        self.state
            .sessions
            .create_user(username, &password, role)
            .await
            .unwrap();
        self.state
            .sessions
            .login(username, &password, "seed")
            .await
            .unwrap()
            .token
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    /// Raw response text, for checks that must see every byte.
    pub async fn request_text(&self, method: Method, uri: &str, token: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Actions of the audit entries recorded against credentials, in order.
    pub fn audit_actions(&self) -> Vec<String> {
        self.audit
            .entries()
            .into_iter()
            .filter(|e| e.target_table == CREDENTIALS_TABLE)
            .map(|e| e.action)
            .collect()
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_fake_provider(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
