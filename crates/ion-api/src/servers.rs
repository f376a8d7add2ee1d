use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use ion_db::Database;
use ion_db::models::{MemberRow, ServerRow, WriteOutcome};
use ion_db::queries::parse_timestamp;
use ion_types::api::{
    Claims, CreateServerRequest, IsCreatorResponse, LeaveServerResponse, MemberResponse,
    RenameServerRequest, ServerResponse,
};

use crate::error::ApiError;
use crate::state::AppState;

const MAX_SERVER_NAME_CHARS: usize = 64;

pub async fn list_servers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ServerResponse>>, ApiError> {
    let user_id = claims.sub.to_string();
    let rows = state.db(move |db| db.list_servers_for_user(&user_id)).await?;
    let servers = rows
        .into_iter()
        .map(server_response)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(servers))
}

/// Creates a server owned by the caller. The creator is its first member and
/// the server id doubles as the id of its chat room.
pub async fn create_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    let name = validate_server_name(&req.name)?;

    let id = Uuid::new_v4().to_string();
    let owner_id = claims.sub.to_string();
    let row = state
        .db(move |db| db.create_server(&id, &name, &owner_id))
        .await?
        .ok_or_else(|| ApiError::Conflict("a server with this name already exists".into()))?;

    info!("{} created server {} ({})", claims.sub, row.name, row.id);
    Ok((StatusCode::CREATED, Json(server_response(row)?)))
}

pub async fn join_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(invite_code): Path<String>,
) -> Result<Json<ServerResponse>, ApiError> {
    let user_id = claims.sub.to_string();
    let joined = state
        .db(move |db| {
            let Some(server) = db.get_server_by_invite(&invite_code)? else {
                return Ok(None);
            };
            let added = db.add_member(&server.id, &user_id)?;
            Ok(Some((server, added)))
        })
        .await?;

    match joined {
        None => Err(ApiError::NotFound("server not found".into())),
        Some((_, false)) => Err(ApiError::Conflict(
            "user is already a member of this server".into(),
        )),
        Some((server, true)) => {
            info!("{} joined server {}", claims.sub, server.id);
            Ok(Json(server_response(server)?))
        }
    }
}

/// Leaves a server. When the owner leaves, the server and its room history
/// are deleted for everyone.
pub async fn leave_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<LeaveServerResponse>, ApiError> {
    let (sid, uid) = (server_id.to_string(), claims.sub.to_string());
    let outcome = state
        .db(move |db| {
            let Some(server) = db.get_server(&sid)? else {
                return Ok(LeaveOutcome::NoServer);
            };
            if server.owner_id == uid {
                db.delete_server(&sid)?;
                Ok(LeaveOutcome::Deleted)
            } else if db.remove_member(&sid, &uid)? {
                Ok(LeaveOutcome::Left)
            } else {
                Ok(LeaveOutcome::NotMember)
            }
        })
        .await?;

    match outcome {
        LeaveOutcome::NoServer => Err(ApiError::NotFound("server not found".into())),
        LeaveOutcome::NotMember => Err(ApiError::NotFound(
            "user is not a member of this server".into(),
        )),
        LeaveOutcome::Deleted => {
            info!("Owner {} left server {}, server deleted", claims.sub, server_id);
            Ok(Json(LeaveServerResponse { deleted: true }))
        }
        LeaveOutcome::Left => {
            info!("{} left server {}", claims.sub, server_id);
            Ok(Json(LeaveServerResponse { deleted: false }))
        }
    }
}

/// Members of a server other than its owner, oldest first. Only members may
/// look.
pub async fn list_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<Vec<MemberResponse>>, ApiError> {
    let (sid, uid) = (server_id.to_string(), claims.sub.to_string());
    let members = state
        .db(move |db| {
            let Some(access) = access(db, &sid, &uid)? else {
                return Ok(None);
            };
            if access == Access::Outsider {
                return Ok(Some(None));
            }
            Ok(Some(Some(db.list_members(&sid)?)))
        })
        .await?;

    match members {
        None => Err(ApiError::NotFound("server not found".into())),
        Some(None) => Err(ApiError::Forbidden(
            "user is not a member of this server".into(),
        )),
        Some(Some(rows)) => {
            let members = rows
                .into_iter()
                .map(member_response)
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Json(members))
        }
    }
}

/// Owner-only: removes another member from the server.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((server_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    if member_id == claims.sub {
        return Err(ApiError::Forbidden(
            "the owner cannot remove themselves, delete the server instead".into(),
        ));
    }
    let (sid, uid, mid) = (
        server_id.to_string(),
        claims.sub.to_string(),
        member_id.to_string(),
    );
    let removed = state
        .db(move |db| {
            if let Err(refusal) = require_owner(db, &sid, &uid)? {
                return Ok(Err(refusal));
            }
            Ok(Ok(db.remove_member(&sid, &mid)?))
        })
        .await??;

    if !removed {
        return Err(ApiError::NotFound(
            "user is not a member of this server".into(),
        ));
    }
    info!("{} removed {} from server {}", claims.sub, member_id, server_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Owner-only: renames the server. Names stay unique.
pub async fn rename_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<Uuid>,
    Json(req): Json<RenameServerRequest>,
) -> Result<Json<ServerResponse>, ApiError> {
    let name = validate_server_name(&req.name)?;
    let (sid, uid) = (server_id.to_string(), claims.sub.to_string());
    let renamed = state
        .db(move |db| {
            if let Err(refusal) = require_owner(db, &sid, &uid)? {
                return Ok(Err(refusal));
            }
            match db.rename_server(&sid, &name)? {
                WriteOutcome::Conflict => Ok(Err(ApiError::Conflict(
                    "a server with this name already exists".into(),
                ))),
                WriteOutcome::Missing => Ok(Err(ApiError::NotFound("server not found".into()))),
                WriteOutcome::Applied => Ok(db
                    .get_server(&sid)?
                    .ok_or_else(|| ApiError::NotFound("server not found".into()))),
            }
        })
        .await??;

    info!("{} renamed server {} to {}", claims.sub, server_id, renamed.name);
    Ok(Json(server_response(renamed)?))
}

/// Owner-only: deletes the server, its memberships and its room history.
pub async fn delete_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let (sid, uid) = (server_id.to_string(), claims.sub.to_string());
    state
        .db(move |db| {
            if let Err(refusal) = require_owner(db, &sid, &uid)? {
                return Ok(Err(refusal));
            }
            db.delete_server(&sid)?;
            Ok(Ok(()))
        })
        .await??;

    info!("{} deleted server {}", claims.sub, server_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Whether the caller owns the server.
pub async fn is_creator(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<Uuid>,
) -> Result<Json<IsCreatorResponse>, ApiError> {
    let (sid, uid) = (server_id.to_string(), claims.sub.to_string());
    match state.db(move |db| access(db, &sid, &uid)).await? {
        None => Err(ApiError::NotFound("server not found".into())),
        Some(access) => Ok(Json(IsCreatorResponse {
            is_creator: access == Access::Owner,
        })),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Owner,
    Member,
    Outsider,
}

/// The caller's standing in a server, or `None` if there is no such server.
fn access(db: &Database, server_id: &str, user_id: &str) -> anyhow::Result<Option<Access>> {
    let Some(server) = db.get_server(server_id)? else {
        return Ok(None);
    };
    if server.owner_id == user_id {
        Ok(Some(Access::Owner))
    } else if db.is_member(server_id, user_id)? {
        Ok(Some(Access::Member))
    } else {
        Ok(Some(Access::Outsider))
    }
}

/// Runs inside a `db` closure: the outer result carries storage failures,
/// the inner one the refusal to send back.
fn require_owner(
    db: &Database,
    server_id: &str,
    user_id: &str,
) -> anyhow::Result<Result<(), ApiError>> {
    Ok(match access(db, server_id, user_id)? {
        None => Err(ApiError::NotFound("server not found".into())),
        Some(Access::Owner) => Ok(()),
        Some(_) => Err(ApiError::Forbidden(
            "only the server owner can do this".into(),
        )),
    })
}

enum LeaveOutcome {
    NoServer,
    NotMember,
    Left,
    Deleted,
}

fn validate_server_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_SERVER_NAME_CHARS {
        return Err(ApiError::BadRequest(
            "server name must be 1 to 64 characters".into(),
        ));
    }
    Ok(name.to_string())
}

fn member_response(row: MemberRow) -> anyhow::Result<MemberResponse> {
    Ok(MemberResponse {
        user_id: row.user_id.parse()?,
        username: row.username,
        avatar_ref: row.avatar_ref,
    })
}

fn server_response(row: ServerRow) -> anyhow::Result<ServerResponse> {
    Ok(ServerResponse {
        id: row.id.parse()?,
        owner_id: row.owner_id.parse()?,
        created_at: parse_timestamp(&row.created_at)?,
        name: row.name,
        invite_code: row.invite_code,
    })
}
