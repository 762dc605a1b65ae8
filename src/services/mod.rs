//! Business logic services.
//!
//! Handlers stay thin: they validate input and delegate here.

pub mod connectivity;
pub mod credential_service;
pub mod provider_config;
pub mod rate_limit;
pub mod session_service;
