//! Audit log model.
//!
//! Entries are append-only: the application inserts them and never updates or
//! deletes them, and the `audit_log` table carries a trigger rejecting both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

pub const CREDENTIALS_TABLE: &str = "provider_credentials";
pub const SESSIONS_TABLE: &str = "sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Rotate,
    Activate,
    Delete,
    Test,
    Rekey,
    LoginSucceeded,
    LoginFailed,
    Logout,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Rotate => "ROTATE",
            AuditAction::Activate => "ACTIVATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Test => "TEST",
            AuditAction::Rekey => "REKEY",
            AuditAction::LoginSucceeded => "LOGIN_SUCCEEDED",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::Logout => "LOGOUT",
        }
    }
}

/// An entry about to be appended.
///
/// Payloads are built by the constructors below from non-secret fields only.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub actor_id: Option<Uuid>,
    pub target_table: &'static str,
    pub target_id: Option<Uuid>,
    pub payload: Value,
}

impl NewAuditEntry {
    pub fn credential(action: AuditAction, actor_id: Uuid, target_id: Uuid, payload: Value) -> Self {
        Self {
            action,
            actor_id: Some(actor_id),
            target_table: CREDENTIALS_TABLE,
            target_id: Some(target_id),
            payload,
        }
    }

    pub fn login(action: AuditAction, actor_id: Option<Uuid>, username: &str, source: &str) -> Self {
        Self {
            action,
            actor_id,
            target_table: SESSIONS_TABLE,
            target_id: None,
            payload: json!({ "username": username, "source": source }),
        }
    }
}

/// A persisted audit entry.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub target_table: String,
    pub target_id: Option<Uuid>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn from_new(entry: NewAuditEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: entry.action.as_str().to_string(),
            actor_id: entry.actor_id,
            target_table: entry.target_table.to_string(),
            target_id: entry.target_id,
            payload: entry.payload,
            created_at: Utc::now(),
        }
    }
}
