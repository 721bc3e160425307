use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::dto::{LabelForm, TicketLabelsForm};
use crate::{
    audit,
    auth::AuthUser,
    data::{DataAccessor, EntityKind, Key},
    error::{AppError, Validator},
    models::{
        label::{is_hex_color, DESCRIPTION_MAX_LEN, NAME_MAX_LEN},
        AuditAction, Label, Ticket, TicketLabel,
    },
    state::AppState,
};

const ENTITY_KINDS: [EntityKind; 5] = [
    EntityKind::Label,
    EntityKind::TicketLabel,
    EntityKind::Ticket,
    EntityKind::User,
    EntityKind::AuditLog,
];

pub fn label_routes() -> Router<AppState> {
    Router::new()
        .route("/labels", get(list).post(create))
        .route("/ticket/:id/labels", get(ticket_labels).put(replace_ticket_labels))
        .route(
            "/ticket/:id/labels/:label_id",
            post(attach).delete(detach),
        )
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[instrument(skip(state))]
pub async fn list(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> Result<Json<Vec<Label>>, AppError> {
    let data = state.data(ENTITY_KINDS);
    let mut labels = data.all::<Label>().await?;
    labels.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(labels))
}

#[instrument(skip(state, form))]
pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(form): Json<LabelForm>,
) -> Result<(StatusCode, Json<Label>), AppError> {
    let name = form.name.trim().to_string();
    let background_color = form.background_color.trim().to_string();
    let text_color = blank_to_none(form.text_color);
    let description = blank_to_none(form.description);

    let mut v = Validator::new();
    v.required(&name, "name")
        .max_len(&name, NAME_MAX_LEN, "name")
        .check(
            is_hex_color(&background_color),
            "background_color",
            "Expected a hex color like #fff or #a1b2c3",
        );
    if let Some(c) = &text_color {
        v.check(is_hex_color(c), "text_color", "Expected a hex color like #fff or #a1b2c3");
    }
    if let Some(d) = &description {
        v.max_len(d, DESCRIPTION_MAX_LEN, "description");
    }
    v.finish()?;

    let mut data = state.data(ENTITY_KINDS);
    let label = data
        .create(Label {
            id: 0,
            name,
            background_color,
            text_color,
            description,
            created_by_id: user_id,
        })
        .await?;
    info!(label_id = label.id, "label created");
    audit::record(
        &mut data,
        "Label",
        label.id,
        AuditAction::Create,
        user_id,
        Some(json!({ "name": label.name })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(label)))
}

async fn require_ticket(data: &DataAccessor, id: i64) -> Result<Ticket, AppError> {
    data.find::<Ticket>(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("ticket {id}")))
}

async fn require_label(data: &DataAccessor, id: i64) -> Result<Label, AppError> {
    data.find::<Label>(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("label {id}")))
}

#[instrument(skip(state))]
pub async fn ticket_labels(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Label>>, AppError> {
    let data = state.data(ENTITY_KINDS);
    require_ticket(&data, id).await?;
    Ok(Json(data.labels_for_ticket(id).await?))
}

/// Attaching a label twice is a no-op.
#[instrument(skip(state))]
pub async fn attach(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((ticket_id, label_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    require_ticket(&data, ticket_id).await?;
    require_label(&data, label_id).await?;
    if data.ticket_label(ticket_id, label_id).await?.is_some() {
        return Ok(StatusCode::NO_CONTENT);
    }
    data.create(TicketLabel {
        id: 0,
        ticket_id,
        label_id,
    })
    .await?;
    audit::record(
        &mut data,
        "Ticket",
        ticket_id,
        AuditAction::Update,
        user_id,
        Some(json!({ "label_added": label_id })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn detach(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((ticket_id, label_id)): Path<(i64, i64)>,
) -> Result<StatusCode, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    let link = data
        .ticket_label(ticket_id, label_id)
        .await?
        .ok_or_else(|| {
            warn!(ticket_id, label_id, "label not on ticket");
            AppError::not_found(format!("label {label_id} on ticket {ticket_id}"))
        })?;
    data.delete::<TicketLabel>(link.id).await?;
    audit::record(
        &mut data,
        "Ticket",
        ticket_id,
        AuditAction::Update,
        user_id,
        Some(json!({ "label_removed": label_id })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Swaps the ticket's label set in one batch.
#[instrument(skip(state, form))]
pub async fn replace_ticket_labels(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(ticket_id): Path<i64>,
    Json(form): Json<TicketLabelsForm>,
) -> Result<Json<Vec<Label>>, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    require_ticket(&data, ticket_id).await?;

    let wanted: BTreeSet<i64> = form.label_ids.into_iter().collect();
    let known: BTreeSet<i64> = data.all::<Label>().await?.into_iter().map(|l| l.id).collect();
    let unknown: Vec<i64> = wanted.difference(&known).copied().collect();
    Validator::new()
        .check(
            unknown.is_empty(),
            "label_ids",
            format!("unknown labels {unknown:?}"),
        )
        .finish()?;

    let current = data
        .query::<TicketLabel, _>(|tl| tl.ticket_id == ticket_id)
        .await?;
    let stale: Vec<Key> = current
        .iter()
        .filter(|tl| !wanted.contains(&tl.label_id))
        .map(|tl| tl.id.into())
        .collect();
    let attached: BTreeSet<i64> = current.iter().map(|tl| tl.label_id).collect();
    let fresh: Vec<TicketLabel> = wanted
        .difference(&attached)
        .map(|&label_id| TicketLabel {
            id: 0,
            ticket_id,
            label_id,
        })
        .collect();

    let mut scope = data.defer();
    let removed = scope.delete_many::<TicketLabel>(stale).await?;
    let added = scope.create_many(fresh).await?.len();
    scope.complete().await?;
    info!(ticket_id, added, removed, "ticket labels replaced");

    audit::record(
        &mut data,
        "Ticket",
        ticket_id,
        AuditAction::Update,
        user_id,
        Some(json!({ "labels": wanted })),
    )
    .await;
    Ok(Json(data.labels_for_ticket(ticket_id).await?))
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::models::User;

    async fn setup() -> (AppState, Uuid) {
        let state = AppState::fake();
        let mut data = state.data(ENTITY_KINDS);
        let user = data
            .create(User::new(
                "lee".into(),
                "lee@example.com".into(),
                "hash".into(),
                "Lee".into(),
                "Chan".into(),
                None,
                OffsetDateTime::now_utc(),
            ))
            .await
            .unwrap();
        data.create(Ticket::new(
            "Flickering light".into(),
            "Hallway B".into(),
            user.id,
            OffsetDateTime::now_utc(),
        ))
        .await
        .unwrap();
        (state, user.id)
    }

    fn form(name: &str, color: &str) -> Json<LabelForm> {
        Json(LabelForm {
            name: name.into(),
            background_color: color.into(),
            text_color: Some("".into()),
            description: None,
        })
    }

    #[tokio::test]
    async fn create_validates_colors() {
        let (state, user) = setup().await;
        let (status, Json(label)) = create(State(state.clone()), AuthUser(user), form("electrical", "#ff0"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(label.text_color, None);

        let err = create(State(state), AuthUser(user), form("plumbing", "blue"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn attach_and_detach() {
        let (state, user) = setup().await;
        let (_, Json(label)) = create(State(state.clone()), AuthUser(user), form("urgent", "#f00"))
            .await
            .unwrap();

        for _ in 0..2 {
            let status = attach(State(state.clone()), AuthUser(user), Path((1, label.id)))
                .await
                .unwrap();
            assert_eq!(status, StatusCode::NO_CONTENT);
        }
        let Json(labels) = ticket_labels(State(state.clone()), AuthUser(user), Path(1))
            .await
            .unwrap();
        assert_eq!(labels, vec![label.clone()]);

        detach(State(state.clone()), AuthUser(user), Path((1, label.id)))
            .await
            .unwrap();
        let err = detach(State(state.clone()), AuthUser(user), Path((1, label.id)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = attach(State(state), AuthUser(user), Path((9, label.id)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_set() {
        let (state, user) = setup().await;
        let mut ids = Vec::new();
        for (name, color) in [("a", "#111"), ("b", "#222"), ("c", "#333")] {
            let (_, Json(l)) = create(State(state.clone()), AuthUser(user), form(name, color))
                .await
                .unwrap();
            ids.push(l.id);
        }
        attach(State(state.clone()), AuthUser(user), Path((1, ids[0])))
            .await
            .unwrap();
        attach(State(state.clone()), AuthUser(user), Path((1, ids[1])))
            .await
            .unwrap();

        let Json(labels) = replace_ticket_labels(
            State(state.clone()),
            AuthUser(user),
            Path(1),
            Json(TicketLabelsForm {
                label_ids: vec![ids[1], ids[2]],
            }),
        )
        .await
        .unwrap();
        let names: Vec<_> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);

        let err = replace_ticket_labels(
            State(state),
            AuthUser(user),
            Path(1),
            Json(TicketLabelsForm {
                label_ids: vec![ids[0], 99],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
