//! Sliding-window rate limiting of login attempts per source address.
//!
//! The window storage is injected through [`LoginAttemptStore`]:
//! [`InMemoryLoginAttempts`] for a single replica, [`PgLoginAttempts`] when
//! several replicas must share one view of the window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::db::DbPool;
use crate::error::AppError;
use crate::store::StoreError;

#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    /// Record one attempt from `source` at `now`, forget attempts of every
    /// source older than `window`, and return how many of `source`'s remain
    /// (this one included).
    async fn record_attempt(
        &self,
        source: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u32, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryLoginAttempts {
    attempts: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl InMemoryLoginAttempts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoginAttemptStore for InMemoryLoginAttempts {
    async fn record_attempt(
        &self,
        source: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u32, StoreError> {
        let cutoff = now - window;
        let mut attempts = self.attempts.lock();

        // Drop sources whose whole window has expired
        attempts.retain(|_, times| times.back().is_some_and(|t| *t > cutoff));

        let times = attempts.entry(source.to_string()).or_default();
        while times.front().is_some_and(|t| *t <= cutoff) {
            times.pop_front();
        }
        times.push_back(now);

        Ok(u32::try_from(times.len()).unwrap_or(u32::MAX))
    }
}

pub struct PgLoginAttempts {
    pool: DbPool,
}

impl PgLoginAttempts {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoginAttemptStore for PgLoginAttempts {
    async fn record_attempt(
        &self,
        source: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u32, StoreError> {
        let cutoff = now - window;
        let mut tx = self.pool.begin().await?;

        // Expired rows of every source go, not only this one's
        sqlx::query("DELETE FROM login_attempts WHERE attempted_at <= $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO login_attempts (source, attempted_at) VALUES ($1, $2)")
            .bind(source)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM login_attempts WHERE source = $1 AND attempted_at > $2",
        )
        .bind(source)
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

/// At most `max_attempts` login attempts per source inside any `window`.
pub struct LoginRateLimiter {
    store: Arc<dyn LoginAttemptStore>,
    max_attempts: u32,
    window: Duration,
}

impl LoginRateLimiter {
    pub fn new(store: Arc<dyn LoginAttemptStore>, max_attempts: u32, window: Duration) -> Self {
        Self {
            store,
            max_attempts,
            window,
        }
    }

    /// Count this attempt and reject it once the cap is exceeded.
    pub async fn check(&self, source: &str) -> Result<(), AppError> {
        self.check_at(source, Utc::now()).await
    }

    pub async fn check_at(&self, source: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let count = self.store.record_attempt(source, now, self.window).await?;
        if count > self.max_attempts {
            tracing::warn!(source, attempts = count, "login rate limit exceeded");
            return Err(AppError::RateLimited);
        }
        Ok(())
    }
}
