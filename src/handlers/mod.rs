//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, the caller's principal)
//! 2. Validates it and delegates to a service
//! 3. Returns HTTP response (JSON, status code)

/// Login and logout
pub mod auth;
/// Provider credential admin endpoints
pub mod credentials;
/// Liveness endpoint
pub mod health;
