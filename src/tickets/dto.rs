use serde::{de, Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::pagination::PaginationMetadata;
use crate::{
    data::TicketWithAuthor,
    models::{Label, Ticket, TicketStatus},
};

/// `?ticket_state=true|false` filters by open state; blank or absent shows all.
#[derive(Debug, Default, Deserialize)]
pub struct TicketQuery {
    #[serde(default, deserialize_with = "blank_bool")]
    pub ticket_state: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

fn blank_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    match Option::<String>::deserialize(d)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v.parse::<bool>().map(Some).map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
pub struct TicketCreateForm {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct TicketUpdateForm {
    pub id: i64,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct TicketStatusForm {
    pub status: TicketStatus,
}

#[derive(Debug, Serialize)]
pub struct TicketIndexItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub is_open: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub display_date: OffsetDateTime,
    pub user_id: Uuid,
    pub username: Option<String>,
}

impl From<TicketWithAuthor> for TicketIndexItem {
    fn from(row: TicketWithAuthor) -> Self {
        let display_date = row.ticket.display_date();
        let t = row.ticket;
        Self {
            id: t.id,
            is_open: t.is_open(),
            title: t.title,
            description: t.description,
            status: t.status,
            created_at: t.created_at,
            closed_at: t.closed_at,
            display_date,
            user_id: t.created_by_id,
            username: row.username,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TicketListResponse {
    pub tickets: Vec<TicketIndexItem>,
    pub ticket_state: Option<bool>,
    pub pagination: PaginationMetadata,
}

#[derive(Debug, Serialize)]
pub struct TicketDetails {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub is_open: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub created_by_id: Uuid,
    pub labels: Vec<Label>,
    /// Whether the caller created the ticket.
    pub can_edit: bool,
}

impl TicketDetails {
    pub fn new(t: Ticket, labels: Vec<Label>, viewer: Uuid) -> Self {
        Self {
            id: t.id,
            is_open: t.is_open(),
            can_edit: t.created_by_id == viewer,
            title: t.title,
            description: t.description,
            status: t.status,
            created_at: t.created_at,
            updated_at: t.last_modified_at,
            closed_at: t.closed_at,
            created_by_id: t.created_by_id,
            labels,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TicketEditView {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub is_open: bool,
}

impl From<Ticket> for TicketEditView {
    fn from(t: Ticket) -> Self {
        Self {
            id: t.id,
            is_open: t.is_open(),
            title: t.title,
            description: t.description,
            status: t.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_state_query_accepts_blank() {
        let q: TicketQuery = serde_json::from_str(r#"{"ticket_state":""}"#).unwrap();
        assert_eq!(q.ticket_state, None);
        let q: TicketQuery = serde_json::from_str(r#"{"ticket_state":"false","page":2}"#).unwrap();
        assert_eq!(q.ticket_state, Some(false));
        assert_eq!(q.page, Some(2));
        assert!(serde_json::from_str::<TicketQuery>(r#"{"ticket_state":"maybe"}"#).is_err());
    }
}
