use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{TicketCreateForm, TicketListResponse, TicketQuery, TicketUpdateForm},
    pagination::PaginationMetadata,
};
use crate::{
    audit,
    config::PagingConfig,
    data::{DataAccessor, EntityKind, TicketFilter},
    error::{AppError, Validator},
    models::{
        ticket::{DESCRIPTION_MAX_LEN, TITLE_MAX_LEN},
        AuditAction, Ticket, TicketStatus,
    },
};

pub const ENTITY_KINDS: [EntityKind; 5] = [
    EntityKind::Ticket,
    EntityKind::User,
    EntityKind::Label,
    EntityKind::TicketLabel,
    EntityKind::AuditLog,
];

fn validate(title: &str, description: &str) -> Result<(), AppError> {
    Validator::new()
        .required(title, "title")
        .max_len(title, TITLE_MAX_LEN, "title")
        .required(description, "description")
        .max_len(description, DESCRIPTION_MAX_LEN, "description")
        .finish()
}

/// One page of tickets, newest first, plus counts for the filter tabs.
pub async fn list_tickets(
    data: &DataAccessor,
    query: &TicketQuery,
    paging: &PagingConfig,
) -> Result<TicketListResponse, AppError> {
    let filter = TicketFilter::from_state(query.ticket_state);
    let page_size = query
        .page_size
        .unwrap_or(paging.default_page_size)
        .clamp(1, paging.max_page_size.max(1));

    let counts = data.ticket_counts().await?;
    let total_items = data.count_tickets(filter).await?;
    let pagination =
        PaginationMetadata::new(query.page.unwrap_or(1), page_size, total_items, counts);

    let rows = data
        .ticket_page(filter, pagination.skip(), pagination.take())
        .await?;

    Ok(TicketListResponse {
        tickets: rows.into_iter().map(Into::into).collect(),
        ticket_state: filter.as_state(),
        pagination,
    })
}

pub async fn get_ticket(data: &DataAccessor, id: i64) -> Result<Ticket, AppError> {
    data.find::<Ticket>(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("ticket {id}")))
}

fn ensure_creator(ticket: &Ticket, actor: Uuid) -> Result<(), AppError> {
    if ticket.created_by_id == actor {
        Ok(())
    } else {
        warn!(ticket_id = ticket.id, actor = %actor, "not the ticket's creator");
        Err(AppError::Forbidden("Only the creator can change this ticket".into()))
    }
}

pub async fn create_ticket(
    data: &mut DataAccessor,
    actor: Uuid,
    form: TicketCreateForm,
) -> Result<Ticket, AppError> {
    let title = form.title.trim().to_string();
    let description = form.description.trim().to_string();
    validate(&title, &description)?;

    let ticket = data
        .create(Ticket::new(title, description, actor, OffsetDateTime::now_utc()))
        .await?;
    info!(ticket_id = ticket.id, "ticket created");
    audit::record(
        data,
        "Ticket",
        ticket.id,
        AuditAction::Create,
        actor,
        Some(json!({ "title": ticket.title })),
    )
    .await;
    Ok(ticket)
}

pub async fn update_ticket(
    data: &mut DataAccessor,
    actor: Uuid,
    form: TicketUpdateForm,
) -> Result<Ticket, AppError> {
    let title = form.title.trim().to_string();
    let description = form.description.trim().to_string();
    validate(&title, &description)?;

    let mut ticket = get_ticket(data, form.id).await?;
    ensure_creator(&ticket, actor)?;
    ticket.edit(title, description, OffsetDateTime::now_utc());
    let ticket = data.update(ticket).await?;
    audit::record(data, "Ticket", ticket.id, AuditAction::Update, actor, None).await;
    Ok(ticket)
}

pub async fn delete_ticket(data: &mut DataAccessor, actor: Uuid, id: i64) -> Result<(), AppError> {
    let ticket = get_ticket(data, id).await?;
    ensure_creator(&ticket, actor)?;
    if !data.delete::<Ticket>(id).await? {
        return Err(AppError::not_found(format!("ticket {id}")));
    }
    info!(ticket_id = id, "ticket deleted");
    audit::record(
        data,
        "Ticket",
        id,
        AuditAction::Delete,
        actor,
        Some(json!({ "title": ticket.title })),
    )
    .await;
    Ok(())
}

async fn change_status(
    data: &mut DataAccessor,
    actor: Uuid,
    ticket: Ticket,
    from: TicketStatus,
) -> Result<Ticket, AppError> {
    let ticket = data.update(ticket).await?;
    audit::record(
        data,
        "Ticket",
        ticket.id,
        AuditAction::StateChange,
        actor,
        Some(json!({ "from": from, "to": ticket.status })),
    )
    .await;
    Ok(ticket)
}

/// Closes an open ticket or reopens a closed one.
pub async fn toggle_ticket(data: &mut DataAccessor, actor: Uuid, id: i64) -> Result<Ticket, AppError> {
    let mut ticket = get_ticket(data, id).await?;
    let from = ticket.status;
    let to = ticket.toggle(OffsetDateTime::now_utc());
    info!(ticket_id = id, %from, %to, "ticket toggled");
    change_status(data, actor, ticket, from).await
}

pub async fn set_ticket_status(
    data: &mut DataAccessor,
    actor: Uuid,
    id: i64,
    status: TicketStatus,
) -> Result<Ticket, AppError> {
    let mut ticket = get_ticket(data, id).await?;
    let from = ticket.status;
    if from == status {
        return Ok(ticket);
    }
    ticket.set_status(status, OffsetDateTime::now_utc());
    info!(ticket_id = id, %from, to = %status, "ticket status changed");
    change_status(data, actor, ticket, from).await
}
