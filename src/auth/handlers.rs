use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{AuthResponse, JwtKeys, LoginRequest, PublicUser, RefreshRequest, RegisterRequest},
    extractors::AuthUser,
    services::{authenticate, register_user},
};
use crate::{data::EntityKind, error::AppError, models::User, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/user/register", post(register))
        .route("/user/login", post(login))
        .route("/user/refresh", post(refresh))
        .route("/user/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn tokens_for(
    state: &AppState,
    user: &User,
    remember: bool,
) -> Result<AuthResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let (access_token, refresh_token) = keys.issue(user.id, remember)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let mut data = state.data([EntityKind::User]);
    let user = register_user(&mut data, payload).await?;
    Ok((StatusCode::CREATED, Json(tokens_for(&state, &user, true)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let data = state.data([EntityKind::User]);
    let user = authenticate(&data, &payload).await?;
    info!(user_id = %user.id, remember_me = payload.remember_me, "user logged in");
    Ok(Json(tokens_for(&state, &user, payload.remember_me)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let data = state.data([EntityKind::User]);
    let Some(user) = data.find::<User>(claims.sub).await? else {
        warn!(user_id = %claims.sub, "refresh for unknown user");
        return Err(AppError::Unauthorized("User not found".into()));
    };
    Ok(Json(tokens_for(&state, &user, true)?))
}

/// Tokens are stateless; the client discards them.
#[instrument]
pub async fn logout(AuthUser(user_id): AuthUser) -> StatusCode {
    info!(user_id = %user_id, "user logged out");
    StatusCode::NO_CONTENT
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let data = state.data([EntityKind::User]);
    let user = data.find::<User>(user_id).await?.ok_or_else(|| {
        warn!(user_id = %user_id, "user not found");
        AppError::Unauthorized("User not found".into())
    })?;
    Ok(Json(PublicUser::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_body(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: format!("{username}@example.com"),
            password: "Secur3P@ssw0rd!".into(),
            first_name: "Sam".into(),
            last_name: "Lee".into(),
            birthdate: None,
        }
    }

    #[tokio::test]
    async fn register_then_login_and_me() {
        let state = AppState::fake();
        let (status, Json(registered)) =
            register(State(state.clone()), Json(register_body("samlee")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(registered.refresh_token.is_some());

        let Json(logged_in) = login(
            State(state.clone()),
            Json(LoginRequest {
                login: "samlee".into(),
                password: "Secur3P@ssw0rd!".into(),
                remember_me: false,
            }),
        )
        .await
        .unwrap();
        assert!(logged_in.refresh_token.is_none());
        assert_eq!(logged_in.user, registered.user);

        let Json(me) = get_me(State(state.clone()), AuthUser(registered.user.id))
            .await
            .unwrap();
        assert_eq!(me.username, "samlee");
    }

    #[tokio::test]
    async fn refresh_issues_a_new_pair() {
        let state = AppState::fake();
        let (_, Json(registered)) = register(State(state.clone()), Json(register_body("ana")))
            .await
            .unwrap();

        let Json(refreshed) = refresh(
            State(state.clone()),
            Json(RefreshRequest {
                refresh_token: registered.refresh_token.unwrap(),
            }),
        )
        .await
        .unwrap();
        assert!(refreshed.refresh_token.is_some());

        let err = refresh(
            State(state),
            Json(RefreshRequest {
                refresh_token: refreshed.access_token,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_is_no_content() {
        assert_eq!(logout(AuthUser(uuid::Uuid::new_v4())).await, StatusCode::NO_CONTENT);
    }

    #[test]
    fn public_user_serialization_hides_hash() {
        let user = User::new(
            "kim".into(),
            "kim@example.com".into(),
            "$argon2id$secret".into(),
            "Kim".into(),
            "Park".into(),
            None,
            time::OffsetDateTime::now_utc(),
        );
        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(json.contains("kim@example.com"));
        assert!(!json.contains("argon2"));
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
    }
}
