//! Shared application state and the HTTP router.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::config::{Config, RateLimitBackend};
use crate::crypto::CryptoEngine;
use crate::db::DbPool;
use crate::handlers;
use crate::middleware::auth::{auth_middleware, require_admin};
use crate::providers::ProviderEndpoints;
use crate::services::connectivity::ConnectivityTester;
use crate::services::credential_service::CredentialService;
use crate::services::provider_config::ProviderConfigReader;
use crate::services::rate_limit::{
    InMemoryLoginAttempts, LoginAttemptStore, LoginRateLimiter, PgLoginAttempts,
};
use crate::services::session_service::SessionService;
use crate::store::AuditLog;
use crate::store::postgres::{PgAuditLog, PgCredentialRepository, PgSessionRepository};

/// Everything a handler can reach. Cloned per request; all fields are cheap
/// handles.
#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialService,
    pub sessions: SessionService,
    pub tester: Arc<ConnectivityTester>,
    pub audit: Arc<dyn AuditLog>,
    /// Handed to subsystems that need the active provider key.
    pub provider_config: ProviderConfigReader,
    /// `None` when running on the in-memory backends.
    pub pool: Option<DbPool>,
}

impl AppState {
    /// Wire the Postgres backends.
    pub fn postgres(
        pool: DbPool,
        config: &Config,
        crypto: Arc<CryptoEngine>,
    ) -> Result<Self, reqwest::Error> {
        let credential_repo = Arc::new(PgCredentialRepository::new(pool.clone()));
        let audit: Arc<dyn AuditLog> = Arc::new(PgAuditLog::new(pool.clone()));

        let attempts: Arc<dyn LoginAttemptStore> = match config.rate_limit_backend {
            RateLimitBackend::Memory => Arc::new(InMemoryLoginAttempts::new()),
            RateLimitBackend::Database => Arc::new(PgLoginAttempts::new(pool.clone())),
        };
        let limiter = Arc::new(LoginRateLimiter::new(
            attempts,
            config.login_max_attempts,
            config.login_window(),
        ));

        let sessions = SessionService::new(
            Arc::new(PgSessionRepository::new(pool.clone())),
            audit.clone(),
            limiter,
            config.session_ttl(),
        );
        let tester = ConnectivityTester::new(
            config.provider_test_timeout(),
            ProviderEndpoints::from_config(config),
        )?;

        Ok(Self {
            credentials: CredentialService::new(credential_repo.clone(), crypto.clone()),
            sessions,
            tester: Arc::new(tester),
            audit,
            provider_config: ProviderConfigReader::new(credential_repo, crypto),
            pool: Some(pool),
        })
    }
}

/// Build the router.
///
/// # Routes
///
/// Public:
/// - `GET /health`
/// - `POST /auth/login`
///
/// Any authenticated session:
/// - `POST /auth/logout`
///
/// Admin role only:
/// - `GET|POST /admin/credentials`
/// - `POST /admin/credentials/test`
/// - `DELETE /admin/credentials/{id}`
/// - `POST /admin/credentials/{id}/rotate|activate|test`
/// - `GET /admin/credentials/{id}/audit`
pub fn router(state: AppState) -> Router {
    use handlers::credentials;

    // route_layer order: the last layer added runs first, so authentication
    // precedes the role check
    let admin_routes = Router::new()
        .route(
            "/admin/credentials",
            get(credentials::list_credentials).post(credentials::create_credential),
        )
        .route("/admin/credentials/test", post(credentials::test_unsaved_key))
        .route(
            "/admin/credentials/{id}",
            axum::routing::delete(credentials::delete_credential),
        )
        .route(
            "/admin/credentials/{id}/rotate",
            post(credentials::rotate_credential),
        )
        .route(
            "/admin/credentials/{id}/activate",
            post(credentials::activate_credential),
        )
        .route("/admin/credentials/{id}/test", post(credentials::test_credential))
        .route(
            "/admin/credentials/{id}/audit",
            get(credentials::credential_audit_trail),
        )
        .route_layer(axum_middleware::from_fn(require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let session_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .route("/auth/login", post(handlers::auth::login))
        .merge(session_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
