//! Session endpoints.
//!
//! - POST /auth/login - Exchange username and password for a bearer token
//! - POST /auth/logout - End the current session

use std::net::SocketAddr;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::StatusCode,
};

use crate::app::AppState;
use crate::error::AppError;
use crate::models::user::{LoginRequest, LoginResponse, Principal};

/// Log in.
///
/// # Request Body
///
/// ```json
/// { "username": "ops-admin", "password": "..." }
/// ```
///
/// # Response
///
/// - **200 OK**: `{"token": "...", "expiresAt": "..."}`. The token is shown once.
/// - **401**: bad username or password, or disabled account
/// - **429**: too many attempts from this address
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(request) = body?;
    let source = peer.ip().to_string();

    let response = state
        .sessions
        .login(&request.username, &request.password, &source)
        .await?;

    Ok(Json(response))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<StatusCode, AppError> {
    state.sessions.logout(&principal).await?;
    Ok(StatusCode::NO_CONTENT)
}
