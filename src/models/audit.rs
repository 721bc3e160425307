use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    StateChange,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::StateChange => "state_change",
        }
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "state_change" => Ok(AuditAction::StateChange),
            other => anyhow::bail!("unknown audit action {other:?}"),
        }
    }
}

/// Who did what to which entity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditLog {
    pub id: i64,
    pub entity_name: String,
    pub entity_id: String,
    pub action: AuditAction,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub actor_id: Uuid,
    pub metadata: Option<serde_json::Value>,
}

impl AuditLog {
    pub fn record(
        entity_name: &str,
        entity_id: impl ToString,
        action: AuditAction,
        actor_id: Uuid,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: 0,
            entity_name: entity_name.to_string(),
            entity_id: entity_id.to_string(),
            action,
            timestamp: OffsetDateTime::now_utc(),
            actor_id,
            metadata,
        }
    }
}
