use axum::{
    extract::{Path, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{ProfileEditForm, ProfileEditView, UserProfile, DISPLAY_NAME_MAX_LEN};
use crate::{
    auth::{
        services::{is_valid_username, USERNAME_RULE},
        AuthUser, MaybeAuthUser,
    },
    data::{DataAccessor, EntityKind},
    error::{AppError, Validator},
    models::{user::BIO_MAX_LEN, User},
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profile/edit", get(edit).post(update))
        .route("/profile/:username", get(profile))
}

pub fn profile_path(username: &str) -> String {
    format!("/api/v1/profile/{username}")
}

async fn current_user(data: &DataAccessor, id: Uuid) -> Result<User, AppError> {
    data.find::<User>(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {id}")))
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(username): Path<String>,
) -> Result<Json<UserProfile>, AppError> {
    let data = state.data([EntityKind::User]);
    let user = data
        .user_by_username(&username)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {username}")))?;
    Ok(Json(UserProfile::new(user, viewer)))
}

#[instrument(skip(state))]
pub async fn edit(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileEditView>, AppError> {
    let data = state.data([EntityKind::User]);
    Ok(Json(current_user(&data, user_id).await?.into()))
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

/// Updates the caller's own profile and redirects to it.
#[instrument(skip(state, form))]
pub async fn update(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(form): Json<ProfileEditForm>,
) -> Result<Redirect, AppError> {
    let mut data = state.data([EntityKind::User]);
    let mut user = current_user(&data, user_id).await?;

    let username = trimmed(form.username);
    let first_name = trimmed(form.first_name);
    let last_name = trimmed(form.last_name);
    let display_name = trimmed(form.display_name);
    let bio = trimmed(form.bio);

    let mut v = Validator::new();
    if let Some(u) = &username {
        v.check(is_valid_username(u), "username", USERNAME_RULE);
    }
    if let Some(n) = &display_name {
        v.required(n, "display_name")
            .max_len(n, DISPLAY_NAME_MAX_LEN, "display_name");
    }
    if let Some(b) = &bio {
        v.max_len(b, BIO_MAX_LEN, "bio");
    }
    v.finish()?;

    if let Some(u) = username.filter(|u| *u != user.username) {
        if data.user_by_username(&u).await?.is_some() {
            warn!(username = %u, "username already taken");
            return Err(AppError::Conflict("Username already taken".into()));
        }
        user.username = u;
    }
    if let Some(f) = first_name {
        user.first_name = f;
    }
    if let Some(l) = last_name {
        user.last_name = l;
    }
    if let Some(d) = display_name {
        user.display_name = d;
    }
    if let Some(b) = bio {
        user.bio = if b.is_empty() { None } else { Some(b) };
    }
    if form.birthdate.is_some() {
        user.birthdate = form.birthdate;
    }

    let user = data.update(user).await?;
    info!(user_id = %user.id, "profile updated");
    Ok(Redirect::to(&profile_path(&user.username)))
}
