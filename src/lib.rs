//! Provider credential service.
//!
//! Stores API keys for external LLM providers encrypted at rest, lets
//! administrators manage and live-test them over an authenticated HTTP API,
//! and hands the single active credential to the rest of the application
//! through [`services::provider_config::ProviderConfigReader`].

pub mod app;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod services;
pub mod store;
