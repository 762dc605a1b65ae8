//! Operator sessions: login, bearer-token authentication and logout.
//!
//! Tokens are 32 random bytes, hex encoded, handed to the client once. Only
//! their SHA-256 digest is stored.

use std::sync::{Arc, OnceLock};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::models::audit::{AuditAction, NewAuditEntry, SESSIONS_TABLE};
use crate::models::user::{LoginResponse, Principal, Role, UserRecord};
use crate::services::rate_limit::LoginRateLimiter;
use crate::store::{AuditLog, SessionRepository, StoreError, append_best_effort};

#[derive(Clone)]
pub struct SessionService {
    repo: Arc<dyn SessionRepository>,
    audit: Arc<dyn AuditLog>,
    limiter: Arc<LoginRateLimiter>,
    ttl: Duration,
    hasher: Argon2<'static>,
    /// Verified against when the username is unknown, hashed with `hasher`
    /// on first use.
    decoy_hash: Arc<OnceLock<Option<String>>>,
}

impl SessionService {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        audit: Arc<dyn AuditLog>,
        limiter: Arc<LoginRateLimiter>,
        ttl: Duration,
    ) -> Self {
        Self {
            repo,
            audit,
            limiter,
            ttl,
            hasher: Argon2::default(),
            decoy_hash: Arc::default(),
        }
    }

    /// Override the Argon2id cost parameters of newly hashed passwords.
    /// Existing hashes carry their own parameters.
    pub fn with_password_params(mut self, params: Params) -> Self {
        self.hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        self.decoy_hash = Arc::default();
        self
    }

    /// Verify a username and password and open a session.
    ///
    /// The attempt is counted against `source` before any credential check.
    /// Unknown users, wrong passwords and disabled accounts all fail the same
    /// way with `Unauthenticated`, and each costs one password verification.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        source: &str,
    ) -> Result<LoginResponse, AppError> {
        self.limiter.check(source).await?;

        let user = self.repo.find_user_by_username(username).await?;
        let verified = match &user {
            Some(user) => self.verify(password, &user.password_hash),
            None => {
                if let Some(decoy) = self.decoy_hash() {
                    self.verify(password, decoy);
                }
                false
            }
        };
        let Some(user) = user.filter(|u| verified && u.is_active) else {
            tracing::warn!(username, source, "login failed");
            append_best_effort(
                self.audit.as_ref(),
                NewAuditEntry::login(AuditAction::LoginFailed, None, username, source),
            )
            .await;
            return Err(AppError::Unauthenticated);
        };

        let token = generate_token();
        let expires_at = Utc::now() + self.ttl;
        self.repo
            .create_session(user.id, &hash_token(&token), expires_at)
            .await?;

        tracing::info!(user_id = %user.id, username, source, "login succeeded");
        append_best_effort(
            self.audit.as_ref(),
            NewAuditEntry::login(AuditAction::LoginSucceeded, Some(user.id), username, source),
        )
        .await;

        Ok(LoginResponse { token, expires_at })
    }

    /// Resolve a bearer token to its caller.
    ///
    /// Expired sessions are deleted on sight. A disabled account is rejected
    /// even while its sessions have not expired.
    pub async fn authenticate(&self, token: &str) -> Result<Principal, AppError> {
        let session = self
            .repo
            .find_session(&hash_token(token))
            .await?
            .ok_or(AppError::Unauthenticated)?;

        if session.expires_at <= Utc::now() {
            if let Err(e) = self.repo.delete_session(session.session_id).await {
                tracing::warn!(session_id = %session.session_id, error = %e, "failed to purge expired session");
            }
            return Err(AppError::Unauthenticated);
        }
        if !session.user_is_active {
            tracing::warn!(user_id = %session.user_id, "session of disabled user rejected");
            return Err(AppError::Unauthenticated);
        }

        let role: Role = session.role.parse().map_err(AppError::Corrupt)?;
        Ok(Principal {
            user_id: session.user_id,
            username: session.username,
            role,
            session_id: session.session_id,
        })
    }

    pub async fn logout(&self, principal: &Principal) -> Result<(), AppError> {
        self.repo.delete_session(principal.session_id).await?;

        tracing::info!(user_id = %principal.user_id, "logout");
        append_best_effort(
            self.audit.as_ref(),
            NewAuditEntry {
                action: AuditAction::Logout,
                actor_id: Some(principal.user_id),
                target_table: SESSIONS_TABLE,
                target_id: Some(principal.session_id),
                payload: json!({ "username": principal.username }),
            },
        )
        .await;

        Ok(())
    }

    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<UserRecord, AppError> {
        let password_hash = self.hash_password(password)?;
        match self.repo.create_user(username, &password_hash, role).await {
            Ok(user) => Ok(user),
            Err(StoreError::Conflict) => Err(AppError::Validation(format!(
                "username `{username}` is already taken"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
    }

    fn decoy_hash(&self) -> Option<&str> {
        self.decoy_hash
            .get_or_init(|| match self.hash_password("decoy-password-never-matches") {
                Ok(hash) => Some(hash),
                Err(e) => {
                    tracing::error!(error = %e, "failed to hash decoy password");
                    None
                }
            })
            .as_deref()
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .hasher
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "stored password hash does not parse");
                false
            }
        }
    }
}

/// Generate a session token (32 random bytes, 64 hex chars).
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
