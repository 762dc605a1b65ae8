//! HTTP middleware components.
//!
//! Middleware run before route handlers and short-circuit requests that are
//! unauthenticated or not authorized.

/// Session authentication and admin role gate
pub mod auth;
