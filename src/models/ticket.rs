use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub const TITLE_MAX_LEN: usize = 255;
pub const DESCRIPTION_MAX_LEN: usize = 1024;

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Closed => "closed",
        }
    }

    /// Open and in-progress tickets both count as open.
    pub fn is_open(self) -> bool {
        self != TicketStatus::Closed
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "closed" => Ok(TicketStatus::Closed),
            other => anyhow::bail!("unknown ticket status {other:?}"),
        }
    }
}

/// A reported maintenance item.
///
/// `closed_at` is set exactly when `status` is [`TicketStatus::Closed`]; every
/// mutation goes through [`Ticket::set_status`] to keep that true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub created_by_id: Uuid,
}

impl Ticket {
    /// A fresh open ticket. The id is assigned by the store on insert.
    pub fn new(title: String, description: String, created_by_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id: 0,
            title,
            description,
            status: TicketStatus::Open,
            created_at: now,
            last_modified_at: now,
            closed_at: None,
            created_by_id,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn edit(&mut self, title: String, description: String, now: OffsetDateTime) {
        self.title = title;
        self.description = description;
        self.last_modified_at = now;
    }

    pub fn set_status(&mut self, status: TicketStatus, now: OffsetDateTime) {
        self.closed_at = match status {
            TicketStatus::Closed => Some(self.closed_at.unwrap_or(now)),
            _ => None,
        };
        self.status = status;
        self.last_modified_at = now;
    }

    /// Closes an open ticket, reopens a closed one. Returns the new status.
    pub fn toggle(&mut self, now: OffsetDateTime) -> TicketStatus {
        let next = if self.is_open() {
            TicketStatus::Closed
        } else {
            TicketStatus::Open
        };
        self.set_status(next, now);
        next
    }

    /// The date a list view shows: creation while open, closure afterwards.
    pub fn display_date(&self) -> OffsetDateTime {
        if self.is_open() {
            self.created_at
        } else {
            self.closed_at.unwrap_or(self.created_at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn ticket() -> Ticket {
        Ticket::new(
            "Leaky faucet".into(),
            "Kitchen faucet drips".into(),
            Uuid::new_v4(),
            datetime!(2024-03-01 09:00 UTC),
        )
    }

    #[test]
    fn toggle_sets_and_clears_closed_at() {
        let mut t = ticket();
        assert!(t.is_open());
        assert!(t.closed_at.is_none());

        let closed_at = datetime!(2024-03-02 10:00 UTC);
        assert_eq!(t.toggle(closed_at), TicketStatus::Closed);
        assert_eq!(t.closed_at, Some(closed_at));
        assert_eq!(t.last_modified_at, closed_at);

        let reopened_at = datetime!(2024-03-03 11:00 UTC);
        assert_eq!(t.toggle(reopened_at), TicketStatus::Open);
        assert!(t.closed_at.is_none());
        assert_eq!(t.last_modified_at, reopened_at);
    }

    #[test]
    fn in_progress_counts_as_open_and_toggles_to_closed() {
        let mut t = ticket();
        let now = datetime!(2024-03-02 10:00 UTC);
        t.set_status(TicketStatus::InProgress, now);
        assert!(t.is_open());
        assert!(t.closed_at.is_none());
        assert_eq!(t.toggle(now), TicketStatus::Closed);
        assert!(t.closed_at.is_some());
    }

    #[test]
    fn closing_twice_keeps_original_closed_at() {
        let mut t = ticket();
        let first = datetime!(2024-03-02 10:00 UTC);
        t.set_status(TicketStatus::Closed, first);
        t.set_status(TicketStatus::Closed, datetime!(2024-03-05 10:00 UTC));
        assert_eq!(t.closed_at, Some(first));
    }

    #[test]
    fn display_date_follows_state() {
        let mut t = ticket();
        assert_eq!(t.display_date(), t.created_at);
        let closed_at = datetime!(2024-03-04 08:00 UTC);
        t.toggle(closed_at);
        assert_eq!(t.display_date(), closed_at);
    }

    #[test]
    fn status_parses_its_own_strings() {
        for s in [TicketStatus::Open, TicketStatus::InProgress, TicketStatus::Closed] {
            assert_eq!(s.as_str().parse::<TicketStatus>().unwrap(), s);
        }
        assert!("pending".parse::<TicketStatus>().is_err());
    }
}
