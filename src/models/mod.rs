//! Data models representing database entities and API payloads.

/// Append-only audit log entries
pub mod audit;
/// Provider credential records, redacted views and request bodies
pub mod credential;
/// Operators, roles and sessions
pub mod user;
