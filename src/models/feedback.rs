use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

pub const MESSAGE_MAX_LEN: usize = 1024;
pub const SUBMITTED_BY_MAX_LEN: usize = 128;
pub const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct Feedback {
    pub id: i64,
    pub message: String,
    pub submitted_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}
