use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{
        TicketCreateForm, TicketDetails, TicketEditView, TicketListResponse, TicketQuery,
        TicketStatusForm, TicketUpdateForm,
    },
    services::{self, ENTITY_KINDS},
};
use crate::{auth::AuthUser, error::AppError, state::AppState};

pub const INDEX_PATH: &str = "/api/v1/ticket";

pub fn details_path(id: i64) -> String {
    format!("/api/v1/ticket/details/{id}")
}

pub fn ticket_routes() -> Router<AppState> {
    Router::new()
        .route("/ticket", get(index))
        .route("/ticket/create", post(create))
        .route("/ticket/details/:id", get(details))
        .route("/ticket/edit/:id", get(edit))
        .route("/ticket/update", post(update))
        .route("/ticket/delete/:id", post(delete))
        .route("/ticket/close-or-open/:id", post(close_or_open))
        .route("/ticket/status/:id", post(set_status))
        .route("/ticket/cancel/:id", post(cancel))
}

#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Query(query): Query<TicketQuery>,
) -> Result<Json<TicketListResponse>, AppError> {
    let data = state.data(ENTITY_KINDS);
    let page = services::list_tickets(&data, &query, &state.config.paging).await?;
    Ok(Json(page))
}

#[instrument(skip(state))]
pub async fn details(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<TicketDetails>, AppError> {
    let data = state.data(ENTITY_KINDS);
    let ticket = services::get_ticket(&data, id).await?;
    let labels = data.labels_for_ticket(id).await?;
    Ok(Json(TicketDetails::new(ticket, labels, user_id)))
}

#[instrument(skip(state))]
pub async fn edit(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<TicketEditView>, AppError> {
    let data = state.data(ENTITY_KINDS);
    let ticket = services::get_ticket(&data, id).await?;
    Ok(Json(ticket.into()))
}

#[instrument(skip(state, form))]
pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(form): Json<TicketCreateForm>,
) -> Result<Redirect, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    services::create_ticket(&mut data, user_id, form).await?;
    Ok(Redirect::to(INDEX_PATH))
}

#[instrument(skip(state, form))]
pub async fn update(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(form): Json<TicketUpdateForm>,
) -> Result<Redirect, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    let ticket = services::update_ticket(&mut data, user_id, form).await?;
    Ok(Redirect::to(&details_path(ticket.id)))
}

#[instrument(skip(state))]
pub async fn delete(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    services::delete_ticket(&mut data, user_id, id).await?;
    Ok(Redirect::to(INDEX_PATH))
}

#[instrument(skip(state))]
pub async fn close_or_open(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    let ticket = services::toggle_ticket(&mut data, user_id, id).await?;
    Ok(Redirect::to(&details_path(ticket.id)))
}

#[instrument(skip(state, form))]
pub async fn set_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(form): Json<TicketStatusForm>,
) -> Result<Redirect, AppError> {
    let mut data = state.data(ENTITY_KINDS);
    let ticket = services::set_ticket_status(&mut data, user_id, id, form.status).await?;
    Ok(Redirect::to(&details_path(ticket.id)))
}

/// Abandons an edit and goes back to the ticket.
#[instrument(skip(state))]
pub async fn cancel(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Redirect, AppError> {
    let data = state.data(ENTITY_KINDS);
    services::get_ticket(&data, id).await?;
    Ok(Redirect::to(&details_path(id)))
}

#[cfg(test)]
mod tests {
    use axum::{
        http::{header::LOCATION, StatusCode},
        response::IntoResponse,
    };
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::{
        data::EntityKind,
        models::{AuditAction, AuditLog, Ticket, TicketStatus, User},
    };

    async fn user(state: &AppState, name: &str) -> Uuid {
        let mut data = state.data([EntityKind::User]);
        data.create(User::new(
            name.into(),
            format!("{name}@example.com"),
            "hash".into(),
            "Test".into(),
            name.into(),
            None,
            OffsetDateTime::now_utc(),
        ))
        .await
        .unwrap()
        .id
    }

    async fn seed(state: &AppState, by: Uuid, open: usize, closed: usize) {
        let mut data = state.data([EntityKind::Ticket]);
        let now = OffsetDateTime::now_utc();
        let mut tickets = Vec::new();
        for i in 0..open + closed {
            let mut t = Ticket::new(format!("Ticket {i}"), format!("Details {i}"), by, now);
            if i >= open {
                t.set_status(TicketStatus::Closed, now);
            }
            tickets.push(t);
        }
        data.create_many(tickets).await.unwrap();
    }

    fn location(redirect: Redirect) -> (StatusCode, String) {
        let res = redirect.into_response();
        let loc = res.headers()[LOCATION].to_str().unwrap().to_string();
        (res.status(), loc)
    }

    fn query(state: Option<bool>, page: i64, size: i64) -> Query<TicketQuery> {
        Query(TicketQuery {
            ticket_state: state,
            page: Some(page),
            page_size: Some(size),
        })
    }

    #[tokio::test]
    async fn index_pages_through_all_tickets() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        seed(&state, alice, 7, 5).await;

        let Json(page) = index(State(state.clone()), AuthUser(alice), query(None, 2, 4))
            .await
            .unwrap();
        assert_eq!(page.pagination.total_tickets, 12);
        assert_eq!(page.pagination.total_open, 7);
        assert_eq!(page.pagination.total_closed, 5);
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(page.tickets.len(), 4);
        // newest first: ids 12..9 on page one, 8..5 on page two
        let ids: Vec<_> = page.tickets.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![8, 7, 6, 5]);
        assert!(page.tickets.iter().all(|t| t.username.as_deref() == Some("alice")));
    }

    #[tokio::test]
    async fn index_filters_by_state() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        seed(&state, alice, 7, 5).await;

        let Json(open) = index(State(state.clone()), AuthUser(alice), query(Some(true), 1, 100))
            .await
            .unwrap();
        assert_eq!(open.tickets.len(), 7);
        assert!(open.tickets.iter().all(|t| t.is_open && t.closed_at.is_none()));
        assert_eq!(open.pagination.total_items, 7);
        assert_eq!(open.pagination.total_tickets, 12);

        let Json(closed) = index(State(state.clone()), AuthUser(alice), query(Some(false), 1, 100))
            .await
            .unwrap();
        assert_eq!(closed.tickets.len(), 5);
        assert!(closed.tickets.iter().all(|t| !t.is_open && t.closed_at.is_some()));
        assert_eq!(closed.ticket_state, Some(false));
    }

    #[tokio::test]
    async fn page_size_is_capped() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        seed(&state, alice, 3, 0).await;
        let Json(page) = index(State(state), AuthUser(alice), query(None, 1, 10_000))
            .await
            .unwrap();
        assert_eq!(page.pagination.page_size, 100);
    }

    #[tokio::test]
    async fn in_progress_tickets_count_as_open() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        seed(&state, alice, 4, 3).await;
        {
            let mut data = state.data([EntityKind::Ticket]);
            let now = OffsetDateTime::now_utc();
            for id in [1, 2] {
                let mut t = data.find::<Ticket>(id).await.unwrap().unwrap();
                t.set_status(TicketStatus::InProgress, now);
                data.update(t).await.unwrap();
            }
        }

        let Json(open) = index(State(state.clone()), AuthUser(alice), query(Some(true), 1, 10))
            .await
            .unwrap();
        assert_eq!(open.pagination.total_open, 4);
        assert_eq!(open.pagination.total_in_progress, 2);
        assert_eq!(open.pagination.total_closed, 3);
        assert_eq!(open.pagination.total_tickets, 7);
        assert_eq!(open.pagination.total_items, 4);
        assert_eq!(open.tickets.len(), 4);
        let in_progress = open
            .tickets
            .iter()
            .filter(|t| t.status == TicketStatus::InProgress)
            .count();
        assert_eq!(in_progress, 2);

        let Json(closed) = index(State(state), AuthUser(alice), query(Some(false), 1, 10))
            .await
            .unwrap();
        assert_eq!(closed.pagination.total_items, 3);
        assert!(closed.tickets.iter().all(|t| t.status == TicketStatus::Closed));
    }

    #[tokio::test]
    async fn pages_past_the_last_are_empty() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        seed(&state, alice, 7, 5).await;

        let Json(page) = index(State(state.clone()), AuthUser(alice), query(None, 4, 4))
            .await
            .unwrap();
        assert_eq!(page.pagination.total_pages, 3);
        assert!(page.tickets.is_empty());
        assert!(!page.pagination.has_next);

        let Json(page) = index(State(state), AuthUser(alice), query(None, i64::MAX, 10))
            .await
            .unwrap();
        assert_eq!(page.pagination.total_pages, 2);
        assert_eq!(page.pagination.current_page, 3);
        assert!(page.tickets.is_empty());
    }

    #[tokio::test]
    async fn create_redirects_to_index_and_audits() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;

        let redirect = create(
            State(state.clone()),
            AuthUser(alice),
            Json(TicketCreateForm {
                title: "Broken heater".into(),
                description: "Room 204 heater does not turn on".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(location(redirect), (StatusCode::SEE_OTHER, INDEX_PATH.to_string()));

        let data = state.data(ENTITY_KINDS);
        let tickets = data.all::<Ticket>().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].title, "Broken heater");
        assert!(tickets[0].is_open());
        assert_eq!(tickets[0].created_by_id, alice);

        let logs = data.all::<AuditLog>().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, AuditAction::Create);
    }

    #[tokio::test]
    async fn create_rejects_invalid_input() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        let err = create(
            State(state.clone()),
            AuthUser(alice),
            Json(TicketCreateForm {
                title: "  ".into(),
                description: "x".repeat(1025),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let data = state.data(ENTITY_KINDS);
        assert_eq!(data.count::<Ticket>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_title_for_same_creator_conflicts() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        let form = || {
            Json(TicketCreateForm {
                title: "Same".into(),
                description: "Same".into(),
            })
        };
        create(State(state.clone()), AuthUser(alice), form()).await.unwrap();
        let err = create(State(state), AuthUser(alice), form()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn close_or_open_toggles_closed_at() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        let bob = user(&state, "bob").await;
        seed(&state, alice, 1, 0).await;

        let redirect = close_or_open(State(state.clone()), AuthUser(bob), Path(1))
            .await
            .unwrap();
        assert_eq!(location(redirect).1, details_path(1));

        let Json(closed) = details(State(state.clone()), AuthUser(bob), Path(1))
            .await
            .unwrap();
        assert!(!closed.is_open);
        assert!(closed.closed_at.is_some());
        assert!(!closed.can_edit);

        close_or_open(State(state.clone()), AuthUser(bob), Path(1))
            .await
            .unwrap();
        let Json(reopened) = details(State(state.clone()), AuthUser(alice), Path(1))
            .await
            .unwrap();
        assert!(reopened.is_open);
        assert!(reopened.closed_at.is_none());
        assert!(reopened.can_edit);

        let data = state.data(ENTITY_KINDS);
        let changes = data
            .query::<AuditLog, _>(|l| l.action == AuditAction::StateChange)
            .await
            .unwrap();
        assert_eq!(changes.len(), 2);
    }

    #[tokio::test]
    async fn status_route_sets_in_progress() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        seed(&state, alice, 1, 0).await;

        set_status(
            State(state.clone()),
            AuthUser(alice),
            Path(1),
            Json(TicketStatusForm {
                status: TicketStatus::InProgress,
            }),
        )
        .await
        .unwrap();
        let Json(view) = edit(State(state.clone()), AuthUser(alice), Path(1)).await.unwrap();
        assert_eq!(view.status, TicketStatus::InProgress);
        assert!(view.is_open);
    }

    #[tokio::test]
    async fn only_the_creator_updates_or_deletes() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        let bob = user(&state, "bob").await;
        seed(&state, alice, 1, 0).await;

        let form = |title: &str| {
            Json(TicketUpdateForm {
                id: 1,
                title: title.into(),
                description: "Updated".into(),
            })
        };
        let err = update(State(state.clone()), AuthUser(bob), form("Hijacked"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let redirect = update(State(state.clone()), AuthUser(alice), form("Renamed"))
            .await
            .unwrap();
        assert_eq!(location(redirect).1, details_path(1));
        let Json(view) = edit(State(state.clone()), AuthUser(alice), Path(1)).await.unwrap();
        assert_eq!(view.title, "Renamed");

        let err = delete(State(state.clone()), AuthUser(bob), Path(1))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        let redirect = delete(State(state.clone()), AuthUser(alice), Path(1))
            .await
            .unwrap();
        assert_eq!(location(redirect).1, INDEX_PATH);

        let err = details(State(state), AuthUser(alice), Path(1)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_goes_back_to_details() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        seed(&state, alice, 1, 0).await;
        let redirect = cancel(State(state.clone()), AuthUser(alice), Path(1)).await.unwrap();
        assert_eq!(location(redirect), (StatusCode::SEE_OTHER, details_path(1)));
        assert!(cancel(State(state), AuthUser(alice), Path(42)).await.is_err());
    }
}
