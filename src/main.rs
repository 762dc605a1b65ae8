//! Provider Credential Service - Main Application Entry Point
//!
//! REST API for administering the LLM provider credentials an RCA application
//! uses: encrypted storage, rotation, single-active selection and live
//! connectivity tests.
//!
//! # Commands
//!
//! - `serve` (default): run migrations and start the HTTP server
//! - `create-admin <username>`: create an admin account; the password is read
//!   from `BOOTSTRAP_ADMIN_PASSWORD`
//! - `rekey`: re-encrypt every stored credential from
//!   `CREDENTIAL_ENCRYPTION_SECRET_PREVIOUS` to `CREDENTIAL_ENCRYPTION_SECRET`
//!
//! # Startup Flow
//!
//! 1. Load and validate configuration (a missing or short encryption secret is fatal)
//! 2. Derive the encryption key
//! 3. Create database pool and run migrations
//! 4. Run the requested command

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use provider_credential_service::{
    app::{self, AppState},
    config::{self, Config},
    crypto::{self, CryptoEngine},
    db,
    models::audit::{AuditAction, CREDENTIALS_TABLE, NewAuditEntry},
    models::user::Role,
    store::{CredentialRepository, postgres::PgCredentialRepository},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Load configuration; the process must not start without a usable secret
    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(?config, "Configuration loaded");

    let crypto = Arc::new(CryptoEngine::from_secret(
        config.credential_encryption_secret.as_deref(),
    )?);

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    match args.first().map(String::as_str) {
        None | Some("serve") => serve(pool, &config, crypto).await,
        Some("create-admin") => {
            let username = args
                .get(1)
                .context("usage: create-admin <username>")?;
            create_admin(pool, &config, crypto, username).await
        }
        Some("rekey") => rekey(pool, &config, &crypto).await,
        Some(other) => bail!("unknown command `{other}` (expected serve, create-admin or rekey)"),
    }
}

async fn serve(pool: db::DbPool, config: &Config, crypto: Arc<CryptoEngine>) -> anyhow::Result<()> {
    let state = AppState::postgres(pool, config, crypto)?;
    let app = app::router(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // The login rate limiter keys on the peer address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn create_admin(
    pool: db::DbPool,
    config: &Config,
    crypto: Arc<CryptoEngine>,
    username: &str,
) -> anyhow::Result<()> {
    let password = std::env::var("BOOTSTRAP_ADMIN_PASSWORD")
        .context("BOOTSTRAP_ADMIN_PASSWORD is not set")?;
    if password.len() < 12 {
        bail!("BOOTSTRAP_ADMIN_PASSWORD must be at least 12 characters");
    }

    let state = AppState::postgres(pool, config, crypto)?;
    let user = state
        .sessions
        .create_user(username, &password, Role::Admin)
        .await?;

    tracing::info!(user_id = %user.id, username, "Admin account created");
    Ok(())
}

async fn rekey(pool: db::DbPool, config: &Config, current: &CryptoEngine) -> anyhow::Result<()> {
    let previous_secret =
        config::check_secret(config.credential_encryption_secret_previous.as_deref())
            .context("CREDENTIAL_ENCRYPTION_SECRET_PREVIOUS is required for rekey")?;
    let previous = CryptoEngine::from_secret(Some(previous_secret))?;

    let audit = NewAuditEntry {
        action: AuditAction::Rekey,
        actor_id: None,
        target_table: CREDENTIALS_TABLE,
        target_id: None,
        payload: json!({ "scheme": crypto::SCHEME }),
    };

    let count = PgCredentialRepository::new(pool)
        .rekey(&previous, current, audit)
        .await?;

    tracing::info!(rewritten = count, "Credentials re-encrypted under the current secret");
    Ok(())
}
