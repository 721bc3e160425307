use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    data::DataAccessor,
    models::{AuditAction, AuditLog},
};

/// Writes an audit entry. Failures are logged and swallowed so the request
/// that triggered them still succeeds.
pub async fn record(
    data: &mut DataAccessor,
    entity_name: &str,
    entity_id: impl ToString,
    action: AuditAction,
    actor_id: Uuid,
    metadata: Option<Value>,
) {
    let entry = AuditLog::record(entity_name, entity_id, action, actor_id, metadata);
    let entity_id = entry.entity_id.clone();
    match data.create(entry).await {
        Ok(_) => debug!(entity = entity_name, %entity_id, action = action.as_str(), "audited"),
        Err(e) => error!(
            error = ?e,
            entity = entity_name,
            %entity_id,
            action = action.as_str(),
            "failed to write audit log"
        ),
    }
}
