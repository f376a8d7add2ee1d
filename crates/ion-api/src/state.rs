use std::sync::Arc;

use tracing::error;

use ion_auth::TokenService;
use ion_db::Database;
use ion_gateway::Dispatcher;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub tokens: TokenService,
    pub dispatcher: Dispatcher,
    /// Marks the session cookie `Secure`; on when served over TLS.
    pub cookie_secure: bool,
}

impl AppStateInner {
    /// Runs a blocking database call off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow::anyhow!("database task failed"))
            })?
            .map_err(ApiError::Internal)
    }
}
