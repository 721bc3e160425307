use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const NAME_MAX_LEN: usize = 64;
pub const DESCRIPTION_MAX_LEN: usize = 256;

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct Label {
    pub id: i64,
    pub name: String,
    pub background_color: String,
    pub text_color: Option<String>,
    pub description: Option<String>,
    pub created_by_id: Uuid,
}

/// Join row attaching a label to a ticket.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct TicketLabel {
    pub id: i64,
    pub ticket_id: i64,
    pub label_id: i64,
}

/// `#rgb` or `#rrggbb`.
pub fn is_hex_color(value: &str) -> bool {
    lazy_static! {
        static ref HEX_RE: Regex = Regex::new(r"^#(?:[A-Fa-f0-9]{3}){1,2}$").unwrap();
    }
    HEX_RE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors() {
        assert!(is_hex_color("#fff"));
        assert!(is_hex_color("#A1b2C3"));
        assert!(!is_hex_color("fff"));
        assert!(!is_hex_color("#ffff"));
        assert!(!is_hex_color("#ggg"));
        assert!(!is_hex_color("#ffffff00"));
    }
}
