use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    audit,
    auth::AuthUser,
    data::EntityKind,
    error::{AppError, Validator},
    models::{
        ticket::{DESCRIPTION_MAX_LEN, TITLE_MAX_LEN},
        AuditAction, Issue,
    },
    state::AppState,
};

const ENTITY_KINDS: [EntityKind; 3] = [EntityKind::Issue, EntityKind::User, EntityKind::AuditLog];

pub fn issue_routes() -> Router<AppState> {
    Router::new()
        .route("/issues", get(list).post(create))
        .route("/issues/:id", get(details))
}

#[derive(Debug, Deserialize)]
pub struct IssueForm {
    #[serde(default)]
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct IssueView {
    pub display_id: String,
    #[serde(flatten)]
    pub issue: Issue,
}

impl From<Issue> for IssueView {
    fn from(issue: Issue) -> Self {
        Self {
            display_id: issue.display_id(),
            issue,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IssueDetails {
    #[serde(flatten)]
    pub issue: IssueView,
    pub children: Vec<IssueView>,
}

/// Root issues, those without a parent.
#[instrument(skip(state))]
pub async fn list(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> Result<Json<Vec<IssueView>>, AppError> {
    let data = state.data(ENTITY_KINDS);
    let roots = data.issue_children(None).await?;
    Ok(Json(roots.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state))]
pub async fn details(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<IssueDetails>, AppError> {
    let data = state.data(ENTITY_KINDS);
    let issue = data
        .find::<Issue>(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("issue {id}")))?;
    let children = data.issue_children(Some(id)).await?;
    Ok(Json(IssueDetails {
        issue: issue.into(),
        children: children.into_iter().map(Into::into).collect(),
    }))
}

#[instrument(skip(state, form))]
pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(form): Json<IssueForm>,
) -> Result<(StatusCode, Json<IssueView>), AppError> {
    let title = form.title.trim().to_string();
    let description = form.description.trim().to_string();
    let mut data = state.data(ENTITY_KINDS);

    let parent_ok = match form.parent_id {
        Some(parent) => data.find::<Issue>(parent).await?.is_some(),
        None => true,
    };
    Validator::new()
        .required(&title, "title")
        .max_len(&title, TITLE_MAX_LEN, "title")
        .required(&description, "description")
        .max_len(&description, DESCRIPTION_MAX_LEN, "description")
        .check(parent_ok, "parent_id", "Parent issue does not exist")
        .finish()?;

    let issue = data
        .create(Issue {
            id: 0,
            parent_id: form.parent_id,
            title,
            description,
            created_at: OffsetDateTime::now_utc(),
            created_by_id: user_id,
        })
        .await?;
    info!(issue_id = issue.id, parent_id = ?issue.parent_id, "issue created");
    audit::record(&mut data, "Issue", issue.id, AuditAction::Create, user_id, None).await;
    Ok((StatusCode::CREATED, Json(issue.into())))
}
