use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    auth::AuthUser,
    data::EntityKind,
    error::{AppError, Validator},
    models::{
        feedback::{ANONYMOUS, MESSAGE_MAX_LEN, SUBMITTED_BY_MAX_LEN},
        Feedback,
    },
    state::AppState,
};

pub fn feedback_routes() -> Router<AppState> {
    Router::new().route("/feedback", get(list).post(submit))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackForm {
    pub message: String,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

/// Open to anonymous visitors.
#[instrument(skip(state, form))]
pub async fn submit(
    State(state): State<AppState>,
    Json(form): Json<FeedbackForm>,
) -> Result<(StatusCode, Json<Feedback>), AppError> {
    let message = form.message.trim().to_string();
    let submitted_by = form
        .submitted_by
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    Validator::new()
        .required(&message, "message")
        .max_len(&message, MESSAGE_MAX_LEN, "message")
        .max_len(&submitted_by, SUBMITTED_BY_MAX_LEN, "submitted_by")
        .finish()?;

    let mut data = state.data([EntityKind::Feedback]);
    let feedback = data
        .create(Feedback {
            id: 0,
            message,
            submitted_by,
            submitted_at: OffsetDateTime::now_utc(),
        })
        .await?;
    info!(feedback_id = feedback.id, "feedback received");
    Ok((StatusCode::CREATED, Json(feedback)))
}

/// Newest first.
#[instrument(skip(state))]
pub async fn list(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> Result<Json<Vec<Feedback>>, AppError> {
    let data = state.data([EntityKind::Feedback]);
    let mut all = data.all::<Feedback>().await?;
    all.reverse();
    Ok(Json(all))
}
