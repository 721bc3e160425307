use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::entity::{Change, EntityKind, Key, Record};
use crate::models::{Issue, Label, Ticket, TicketLabel, TicketStatus, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("foreign key constraint violated: {0}")]
    Reference(String),
    #[error("{0} {1} not found")]
    Missing(EntityKind, Key),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Ticket totals by state. `open` includes in-progress tickets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TicketCounts {
    pub open: i64,
    pub in_progress: i64,
    pub closed: i64,
}

impl TicketCounts {
    pub fn total(&self) -> i64 {
        self.open + self.closed
    }
}

/// Which tickets a list view shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TicketFilter {
    #[default]
    All,
    Open,
    Closed,
}

impl TicketFilter {
    /// `Some(true)` keeps open tickets, `Some(false)` closed ones.
    pub fn from_state(state: Option<bool>) -> Self {
        match state {
            None => TicketFilter::All,
            Some(true) => TicketFilter::Open,
            Some(false) => TicketFilter::Closed,
        }
    }

    pub fn as_state(self) -> Option<bool> {
        match self {
            TicketFilter::All => None,
            TicketFilter::Open => Some(true),
            TicketFilter::Closed => Some(false),
        }
    }

    pub fn matches(self, status: TicketStatus) -> bool {
        match self.as_state() {
            None => true,
            Some(open) => status.is_open() == open,
        }
    }
}

/// A ticket joined with its creator's username for list views.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketWithAuthor {
    pub ticket: Ticket,
    pub username: Option<String>,
}

/// The persistence context: keys, constraints and cascades live behind this.
#[async_trait]
pub trait Store: Send + Sync {
    /// Applies `changes` atomically. The result lines up with `changes`:
    /// the stored row for inserts and updates, `None` for deletes.
    async fn apply(&self, changes: Vec<Change>) -> Result<Vec<Option<Record>>, StoreError>;

    async fn find(&self, kind: EntityKind, key: Key) -> Result<Option<Record>, StoreError>;
    async fn all(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError>;
    async fn count(&self, kind: EntityKind) -> Result<i64, StoreError>;

    async fn ticket_counts(&self) -> Result<TicketCounts, StoreError>;
    async fn count_tickets(&self, filter: TicketFilter) -> Result<i64, StoreError>;
    /// Newest first.
    async fn ticket_page(
        &self,
        filter: TicketFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TicketWithAuthor>, StoreError>;

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn labels_for_ticket(&self, ticket_id: i64) -> Result<Vec<Label>, StoreError>;
    async fn ticket_label(
        &self,
        ticket_id: i64,
        label_id: i64,
    ) -> Result<Option<TicketLabel>, StoreError>;

    /// Direct children of `parent_id`, or the root issues when `None`.
    async fn issue_children(&self, parent_id: Option<i64>) -> Result<Vec<Issue>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_by_open_state() {
        assert!(TicketFilter::All.matches(TicketStatus::Closed));
        assert!(TicketFilter::Open.matches(TicketStatus::Open));
        assert!(TicketFilter::Open.matches(TicketStatus::InProgress));
        assert!(!TicketFilter::Open.matches(TicketStatus::Closed));
        assert!(TicketFilter::Closed.matches(TicketStatus::Closed));
        assert!(!TicketFilter::Closed.matches(TicketStatus::InProgress));
        assert_eq!(TicketFilter::from_state(Some(false)), TicketFilter::Closed);
    }

    #[test]
    fn total_is_open_plus_closed() {
        let counts = TicketCounts { open: 7, in_progress: 2, closed: 5 };
        assert_eq!(counts.total(), 12);
    }
}
