use serde::Serialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

pub const BIO_MAX_LEN: usize = 512;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub bio: Option<String>,
    #[serde(with = "crate::models::iso_date::option")]
    pub birthdate: Option<Date>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn new(
        username: String,
        email: String,
        password_hash: String,
        first_name: String,
        last_name: String,
        birthdate: Option<Date>,
        now: OffsetDateTime,
    ) -> Self {
        let display_name = format!("{} {}", first_name, last_name);
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            first_name,
            last_name,
            display_name,
            bio: None,
            birthdate,
            created_at: now,
        }
    }
}
