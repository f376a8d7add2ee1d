use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;

use ion_gateway::MessageStore;
use ion_types::api::Claims;
use ion_types::models::HistoryEntry;

use crate::error::ApiError;
use crate::state::AppState;

/// Full history of a room, oldest first.
///
/// Rooms backed by a server are readable by its members only. Other room ids
/// are open to any authenticated user, like joining them over the gateway.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let room_id = room_id.trim().to_string();
    if room_id.is_empty() {
        return Err(ApiError::BadRequest("room id is empty".into()));
    }

    let (rid, uid) = (room_id.clone(), claims.sub.to_string());
    let allowed = state
        .db(move |db| match db.get_server(&rid)? {
            Some(_) => db.is_member(&rid, &uid),
            None => Ok(true),
        })
        .await?;
    if !allowed {
        return Err(ApiError::Forbidden(
            "user is not a member of this server".into(),
        ));
    }

    let history = state.dispatcher.store().list_messages(&room_id).await?;
    debug!("{} read {} messages from room {}", claims.sub, history.len(), room_id);
    Ok(Json(history))
}
