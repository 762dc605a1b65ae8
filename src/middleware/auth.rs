//! Session authentication and role authorization middleware.
//!
//! Every admin request passes two layers:
//! 1. [`auth_middleware`]: resolves `Authorization: Bearer <token>` to a
//!    [`Principal`] and inserts it into the request extensions, or rejects
//!    with 401
//! 2. [`require_admin`]: rejects any principal without the admin role with 403
//!
//! Both run before the route handler, so an unauthorized request never learns
//! whether the credential it names exists.

use axum::{
    Extension,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::error::AppError;
use crate::models::user::{Principal, Role};

/// Session authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Hash the token with SHA-256 and look the session up
/// 3. Reject expired sessions and disabled accounts
/// 4. Inject the `Principal` into the request and call the next handler
///
/// # Headers
///
/// ```text
/// Authorization: Bearer 9f86d081884c7d65...
/// ```
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthenticated)?;

    let principal = state.sessions.authenticate(token).await?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Admin-only gate. Must be layered inside [`auth_middleware`].
pub async fn require_admin(
    Extension(principal): Extension<Principal>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if principal.role != Role::Admin {
        tracing::warn!(
            user_id = %principal.user_id,
            role = principal.role.as_str(),
            path = %request.uri().path(),
            "non-admin request rejected"
        );
        return Err(AppError::Forbidden);
    }

    Ok(next.run(request).await)
}
