use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::models::User;

pub const DISPLAY_NAME_MAX_LEN: usize = 128;

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub bio: Option<String>,
    #[serde(with = "crate::models::iso_date::option")]
    pub birthdate: Option<Date>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub can_edit: bool,
}

impl UserProfile {
    pub fn new(user: User, viewer: Option<Uuid>) -> Self {
        Self {
            can_edit: viewer == Some(user.id),
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            display_name: user.display_name,
            bio: user.bio,
            birthdate: user.birthdate,
            created_at: user.created_at,
        }
    }
}

/// The caller's own editable fields.
#[derive(Debug, Serialize, PartialEq)]
pub struct ProfileEditView {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub bio: Option<String>,
    #[serde(with = "crate::models::iso_date::option")]
    pub birthdate: Option<Date>,
}

impl From<User> for ProfileEditView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            first_name: u.first_name,
            last_name: u.last_name,
            display_name: u.display_name,
            bio: u.bio,
            birthdate: u.birthdate,
        }
    }
}

/// Absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct ProfileEditForm {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    #[serde(default, with = "crate::models::iso_date::option")]
    pub birthdate: Option<Date>,
}
