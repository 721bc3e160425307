use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LabelForm {
    pub name: String,
    pub background_color: String,
    #[serde(default)]
    pub text_color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Replaces every label on a ticket.
#[derive(Debug, Deserialize)]
pub struct TicketLabelsForm {
    pub label_ids: Vec<i64>,
}
