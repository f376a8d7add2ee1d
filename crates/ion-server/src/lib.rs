//! Wiring for the Ion binary: configuration and the combined HTTP + gateway
//! router.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ion_api::{AppState, AppStateInner};
use ion_auth::TokenService;
use ion_db::Database;
use ion_gateway::connection::{GatewayState, gateway_upgrade};
use ion_gateway::{Dispatcher, DispatcherConfig, SqliteStore};

pub use config::Config;

/// How often stale typing indicators are swept.
pub const TYPING_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Builds the dispatcher and the full router over an opened database.
pub fn build(config: &Config, db: Arc<Database>) -> (Router, Dispatcher) {
    let tokens = TokenService::new(&config.jwt_secret, config.token_ttl);
    let dispatcher = Dispatcher::new(
        Arc::new(SqliteStore::new(db.clone())),
        DispatcherConfig {
            typing_expiry: config.typing_expiry,
        },
    );

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        tokens: tokens.clone(),
        dispatcher: dispatcher.clone(),
        cookie_secure: config.cookie_secure,
    });

    let ws_route = Router::new()
        .route("/gateway", get(gateway_upgrade))
        .with_state(GatewayState {
            dispatcher: dispatcher.clone(),
            tokens,
        });

    let app = Router::new()
        .merge(ion_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    (app, dispatcher)
}
