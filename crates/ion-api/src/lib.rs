//! HTTP surface of Ion: accounts, servers and room history.
//!
//! The realtime `/gateway` route lives in `ion-gateway`; the binary merges
//! both into one router.

pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod servers;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Public auth routes plus the cookie-protected API.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout));

    let protected_routes = Router::new()
        .route("/api/get-current-user", get(auth::current_user))
        .route("/api/profile", put(auth::update_profile))
        .route("/api/username", put(auth::change_username))
        .route("/api/account", delete(auth::delete_account))
        .route("/servers", get(servers::list_servers).post(servers::create_server))
        .route("/servers/join/{invite_code}", post(servers::join_server))
        .route("/servers/{server_id}", delete(servers::delete_server))
        .route("/servers/{server_id}/name", put(servers::rename_server))
        .route("/servers/{server_id}/is-creator", get(servers::is_creator))
        .route("/servers/{server_id}/members", get(servers::list_members))
        .route(
            "/servers/{server_id}/members/{user_id}",
            delete(servers::remove_member),
        )
        .route("/servers/{server_id}/leave", post(servers::leave_server))
        .route("/messages/{room_id}", get(messages::get_messages))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests;
