use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Hierarchical work item. Children point at their parent through `parent_id`.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct Issue {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by_id: Uuid,
}

impl Issue {
    pub fn display_id(&self) -> String {
        format!("ISS-{:06}", self.id)
    }
}
