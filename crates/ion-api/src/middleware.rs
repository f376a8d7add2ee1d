use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use ion_auth::token_from_headers;

use crate::error::ApiError;
use crate::state::AppState;

/// Verifies the session token (cookie, or `Authorization: Bearer`) and makes
/// its `Claims` available to the handler as an extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_headers(req.headers());
    let claims = state.tokens.verify(token.as_deref()).map_err(|e| {
        debug!("Rejected {} {}: {}", req.method(), req.uri().path(), e);
        e
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
