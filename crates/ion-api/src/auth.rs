use axum::{Extension, Json, extract::State, http::StatusCode};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};
use uuid::Uuid;

use ion_auth::{cleared_cookie, hash_password, session_cookie, verify_password};
use ion_gateway::dispatcher::MAX_IMAGE_REF_CHARS;
use ion_db::models::WriteOutcome;
use ion_types::api::{
    AuthResponse, ChangeUsernameRequest, Claims, CurrentUserResponse, LoginRequest,
    SignupRequest, UpdateProfileRequest,
};
use ion_types::content::is_image_ref;
use ion_types::models::UserDisplay;

use crate::error::ApiError;
use crate::state::AppState;

const USERNAME_CHARS: std::ops::RangeInclusive<usize> = 3..=32;
const MIN_PASSWORD_CHARS: usize = 8;
const MAX_EMAIL_CHARS: usize = 254;

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();

    validate_username(&username)?;
    if !email.contains('@') || email.chars().count() > MAX_EMAIL_CHARS {
        return Err(ApiError::BadRequest("email address is invalid".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }
    let avatar_ref = req.avatar_ref.as_deref().map(validate_avatar).transpose()?;

    let (by_email, by_name) = {
        let (email, username) = (email.clone(), username.clone());
        state
            .db(move |db| Ok((db.get_user_by_email(&email)?, db.get_user_by_username(&username)?)))
            .await?
    };
    if by_email.is_some() {
        return Err(ApiError::Conflict("a user with this email already exists".into()));
    }
    if by_name.is_some() {
        return Err(ApiError::Conflict("a user with this username already exists".into()));
    }

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("hashing task failed: {}", e)))??;

    let user_id = Uuid::new_v4();
    let outcome = {
        let username = username.clone();
        state
            .db(move |db| {
                db.create_user(
                    &user_id.to_string(),
                    &username,
                    &email,
                    &password_hash,
                    avatar_ref.as_deref(),
                )
            })
            .await?
    };
    // A concurrent signup can claim the name between the check and the insert.
    if outcome == WriteOutcome::Conflict {
        return Err(ApiError::Conflict(
            "a user with this username or email already exists".into(),
        ));
    }

    let token = state.tokens.issue(user_id)?;
    info!("New account {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(token, state.cookie_secure)),
        Json(AuthResponse { user_id, username }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let user = match (req.email, req.username) {
        (Some(email), _) => {
            let email = email.trim().to_lowercase();
            state.db(move |db| db.get_user_by_email(&email)).await?
        }
        (None, Some(username)) => {
            let username = username.trim().to_string();
            state.db(move |db| db.get_user_by_username(&username)).await?
        }
        (None, None) => {
            return Err(ApiError::BadRequest("username or email is required".into()));
        }
    };

    let Some(user) = user else {
        return Err(ApiError::InvalidCredentials);
    };

    let (password, stored) = (req.password, user.password.clone());
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("hashing task failed: {}", e)))??;
    if !valid {
        warn!("Failed login for {}", user.username);
        return Err(ApiError::InvalidCredentials);
    }

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id {}: {}", user.id, e)))?;

    {
        let id = user.id.clone();
        state.db(move |db| db.touch_last_login(&id)).await?;
    }

    let token = state.tokens.issue(user_id)?;
    info!("{} logged in", user.username);

    Ok((
        jar.add(session_cookie(token, state.cookie_secure)),
        Json(AuthResponse {
            user_id,
            username: user.username,
        }),
    ))
}

pub async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    (jar.remove(cleared_cookie()), StatusCode::NO_CONTENT)
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<CurrentUserResponse>, ApiError> {
    let id = claims.sub.to_string();
    if state.db(move |db| db.get_user_by_id(&id)).await?.is_none() {
        return Err(ApiError::NotFound("user not found".into()));
    }
    Ok(Json(CurrentUserResponse {
        current_user_id: claims.sub,
    }))
}

/// Replaces the caller's avatar. Connected sessions pick up the change on
/// their next message.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserDisplay>, ApiError> {
    let avatar_ref = req.avatar_ref.as_deref().map(validate_avatar).transpose()?;

    let id = claims.sub.to_string();
    let display = state
        .db(move |db| {
            if !db.update_avatar(&id, avatar_ref.as_deref())? {
                return Ok(None);
            }
            db.get_user_display(&id)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    state.dispatcher.refresh_display(claims.sub, display.clone()).await;
    Ok(Json(display))
}

/// Renames the caller. Messages already stored keep the name they were sent
/// under; connected sessions use the new one from their next event on.
pub async fn change_username(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ChangeUsernameRequest>,
) -> Result<Json<UserDisplay>, ApiError> {
    let username = req.username.trim().to_string();
    validate_username(&username)?;

    let id = claims.sub.to_string();
    let (outcome, display) = state
        .db(move |db| {
            let outcome = db.change_username(&id, &username)?;
            Ok((outcome, db.get_user_display(&id)?))
        })
        .await?;

    let display = match (outcome, display) {
        (WriteOutcome::Conflict, _) => {
            return Err(ApiError::Conflict("username is already taken".into()));
        }
        (WriteOutcome::Missing, _) | (_, None) => {
            return Err(ApiError::NotFound("user not found".into()));
        }
        (WriteOutcome::Applied, Some(display)) => display,
    };

    state.dispatcher.refresh_display(claims.sub, display.clone()).await;
    let new_name = &display.username;
    info!("{} is now known as {}", claims.sub, new_name);
    Ok(Json(display))
}

/// Deletes the caller's account together with the servers it owns, and
/// clears the session cookie.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    let id = claims.sub.to_string();
    if !state.db(move |db| db.delete_user(&id)).await? {
        return Err(ApiError::NotFound("user not found".into()));
    }
    info!("Deleted account {}", claims.sub);
    Ok((jar.remove(cleared_cookie()), StatusCode::NO_CONTENT))
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if !USERNAME_CHARS.contains(&username.chars().count())
        || username.chars().any(char::is_whitespace)
    {
        return Err(ApiError::BadRequest(
            "username must be 3 to 32 characters without spaces".into(),
        ));
    }
    Ok(())
}

fn validate_avatar(avatar_ref: &str) -> Result<String, ApiError> {
    let avatar_ref = avatar_ref.trim();
    if avatar_ref.is_empty()
        || avatar_ref.chars().count() > MAX_IMAGE_REF_CHARS
        || avatar_ref.chars().any(char::is_whitespace)
        || !is_image_ref(avatar_ref)
    {
        return Err(ApiError::BadRequest("avatar must be an image reference".into()));
    }
    Ok(avatar_ref.to_string())
}
