use anyhow::{anyhow, Context};
use async_trait::async_trait;
use sqlx::{FromRow, PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    entity::{Change, EntityKind, Key, Record},
    store::{Store, StoreError, TicketCounts, TicketFilter, TicketWithAuthor},
};
use crate::models::{AuditLog, Feedback, Issue, Label, Ticket, TicketLabel, User};

const USER_COLS: &str = "id, username, email, password_hash, first_name, last_name, \
                         display_name, bio, birthdate, created_at";
const TICKET_COLS: &str =
    "id, title, description, status, created_at, last_modified_at, closed_at, created_by_id";
const LABEL_COLS: &str = "id, name, background_color, text_color, description, created_by_id";
const TICKET_LABEL_COLS: &str = "id, ticket_id, label_id";
const ISSUE_COLS: &str = "id, parent_id, title, description, created_at, created_by_id";
const AUDIT_COLS: &str = "id, entity_name, entity_id, action, timestamp, actor_id, metadata";
const FEEDBACK_COLS: &str = "id, message, submitted_by, submitted_at";

/// Ticket status is stored as TEXT; the row converts into the model.
#[derive(Debug, FromRow)]
struct TicketRow {
    id: i64,
    title: String,
    description: String,
    status: String,
    created_at: OffsetDateTime,
    last_modified_at: OffsetDateTime,
    closed_at: Option<OffsetDateTime>,
    created_by_id: Uuid,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(r: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: r.id,
            title: r.title,
            description: r.description,
            status: r.status.parse()?,
            created_at: r.created_at,
            last_modified_at: r.last_modified_at,
            closed_at: r.closed_at,
            created_by_id: r.created_by_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct TicketAuthorRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    username: Option<String>,
}

#[derive(Debug, FromRow)]
struct AuditLogRow {
    id: i64,
    entity_name: String,
    entity_id: String,
    action: String,
    timestamp: OffsetDateTime,
    actor_id: Uuid,
    metadata: Option<serde_json::Value>,
}

impl TryFrom<AuditLogRow> for AuditLog {
    type Error = StoreError;

    fn try_from(r: AuditLogRow) -> Result<Self, Self::Error> {
        Ok(AuditLog {
            id: r.id,
            entity_name: r.entity_name,
            entity_id: r.entity_id,
            action: r.action.parse()?,
            timestamp: r.timestamp,
            actor_id: r.actor_id,
            metadata: r.metadata,
        })
    }
}

/// Maps constraint violations onto the store's error kinds.
fn db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        let constraint = db.constraint().unwrap_or("unknown").to_string();
        if db.is_unique_violation() {
            return StoreError::Conflict(constraint);
        }
        if db.is_foreign_key_violation() {
            return StoreError::Reference(constraint);
        }
    }
    StoreError::Other(anyhow::Error::new(e).context("database query failed"))
}

fn int_key(kind: EntityKind, key: Key) -> Result<i64, StoreError> {
    key.as_int()
        .ok_or_else(|| anyhow!("{kind} is keyed by an integer, got {key}").into())
}

fn uuid_key(kind: EntityKind, key: Key) -> Result<Uuid, StoreError> {
    key.as_uuid()
        .ok_or_else(|| anyhow!("{kind} is keyed by a uuid, got {key}").into())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert(conn: &mut PgConnection, record: Record) -> Result<Record, StoreError> {
    let stored = match record {
        Record::User(u) => {
            let sql = format!(
                "INSERT INTO users ({USER_COLS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 RETURNING {USER_COLS}"
            );
            let id = if u.id.is_nil() { Uuid::new_v4() } else { u.id };
            let row = sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .bind(&u.username)
                .bind(&u.email)
                .bind(&u.password_hash)
                .bind(&u.first_name)
                .bind(&u.last_name)
                .bind(&u.display_name)
                .bind(&u.bio)
                .bind(u.birthdate)
                .bind(u.created_at)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
            Record::User(row)
        }
        Record::Ticket(t) => {
            let sql = format!(
                "INSERT INTO tickets (title, description, status, created_at, last_modified_at, \
                 closed_at, created_by_id) VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 RETURNING {TICKET_COLS}"
            );
            let row = sqlx::query_as::<_, TicketRow>(&sql)
                .bind(&t.title)
                .bind(&t.description)
                .bind(t.status.as_str())
                .bind(t.created_at)
                .bind(t.last_modified_at)
                .bind(t.closed_at)
                .bind(t.created_by_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
            Record::Ticket(row.try_into()?)
        }
        Record::Label(l) => {
            let sql = format!(
                "INSERT INTO labels (name, background_color, text_color, description, \
                 created_by_id) VALUES ($1, $2, $3, $4, $5) RETURNING {LABEL_COLS}"
            );
            let row = sqlx::query_as::<_, Label>(&sql)
                .bind(&l.name)
                .bind(&l.background_color)
                .bind(&l.text_color)
                .bind(&l.description)
                .bind(l.created_by_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
            Record::Label(row)
        }
        Record::TicketLabel(tl) => {
            let sql = format!(
                "INSERT INTO ticket_labels (ticket_id, label_id) VALUES ($1, $2) \
                 RETURNING {TICKET_LABEL_COLS}"
            );
            let row = sqlx::query_as::<_, TicketLabel>(&sql)
                .bind(tl.ticket_id)
                .bind(tl.label_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
            Record::TicketLabel(row)
        }
        Record::Issue(i) => {
            let sql = format!(
                "INSERT INTO issues (parent_id, title, description, created_at, created_by_id) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {ISSUE_COLS}"
            );
            let row = sqlx::query_as::<_, Issue>(&sql)
                .bind(i.parent_id)
                .bind(&i.title)
                .bind(&i.description)
                .bind(i.created_at)
                .bind(i.created_by_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
            Record::Issue(row)
        }
        Record::AuditLog(a) => {
            let sql = format!(
                "INSERT INTO audit_logs (entity_name, entity_id, action, timestamp, actor_id, \
                 metadata) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {AUDIT_COLS}"
            );
            let row = sqlx::query_as::<_, AuditLogRow>(&sql)
                .bind(&a.entity_name)
                .bind(&a.entity_id)
                .bind(a.action.as_str())
                .bind(a.timestamp)
                .bind(a.actor_id)
                .bind(&a.metadata)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
            Record::AuditLog(row.try_into()?)
        }
        Record::Feedback(f) => {
            let sql = format!(
                "INSERT INTO feedback (message, submitted_by, submitted_at) VALUES ($1, $2, $3) \
                 RETURNING {FEEDBACK_COLS}"
            );
            let row = sqlx::query_as::<_, Feedback>(&sql)
                .bind(&f.message)
                .bind(&f.submitted_by)
                .bind(f.submitted_at)
                .fetch_one(&mut *conn)
                .await
                .map_err(db_error)?;
            Record::Feedback(row)
        }
    };
    Ok(stored)
}

async fn update(conn: &mut PgConnection, record: Record) -> Result<Record, StoreError> {
    let kind = record.kind();
    let key = record.key();
    let stored = match record {
        Record::User(u) => {
            let sql = format!(
                "UPDATE users SET username = $2, email = $3, password_hash = $4, first_name = $5, \
                 last_name = $6, display_name = $7, bio = $8, birthdate = $9 \
                 WHERE id = $1 RETURNING {USER_COLS}"
            );
            sqlx::query_as::<_, User>(&sql)
                .bind(u.id)
                .bind(&u.username)
                .bind(&u.email)
                .bind(&u.password_hash)
                .bind(&u.first_name)
                .bind(&u.last_name)
                .bind(&u.display_name)
                .bind(&u.bio)
                .bind(u.birthdate)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?
                .map(Record::User)
        }
        Record::Ticket(t) => {
            let sql = format!(
                "UPDATE tickets SET title = $2, description = $3, status = $4, \
                 last_modified_at = $5, closed_at = $6 WHERE id = $1 RETURNING {TICKET_COLS}"
            );
            let row = sqlx::query_as::<_, TicketRow>(&sql)
                .bind(t.id)
                .bind(&t.title)
                .bind(&t.description)
                .bind(t.status.as_str())
                .bind(t.last_modified_at)
                .bind(t.closed_at)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?;
            match row {
                Some(row) => Some(Record::Ticket(row.try_into()?)),
                None => None,
            }
        }
        Record::Label(l) => {
            let sql = format!(
                "UPDATE labels SET name = $2, background_color = $3, text_color = $4, \
                 description = $5 WHERE id = $1 RETURNING {LABEL_COLS}"
            );
            sqlx::query_as::<_, Label>(&sql)
                .bind(l.id)
                .bind(&l.name)
                .bind(&l.background_color)
                .bind(&l.text_color)
                .bind(&l.description)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?
                .map(Record::Label)
        }
        Record::TicketLabel(tl) => {
            let sql = format!(
                "UPDATE ticket_labels SET ticket_id = $2, label_id = $3 WHERE id = $1 \
                 RETURNING {TICKET_LABEL_COLS}"
            );
            sqlx::query_as::<_, TicketLabel>(&sql)
                .bind(tl.id)
                .bind(tl.ticket_id)
                .bind(tl.label_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?
                .map(Record::TicketLabel)
        }
        Record::Issue(i) => {
            let sql = format!(
                "UPDATE issues SET parent_id = $2, title = $3, description = $4 WHERE id = $1 \
                 RETURNING {ISSUE_COLS}"
            );
            sqlx::query_as::<_, Issue>(&sql)
                .bind(i.id)
                .bind(i.parent_id)
                .bind(&i.title)
                .bind(&i.description)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?
                .map(Record::Issue)
        }
        Record::AuditLog(a) => {
            let sql = format!(
                "UPDATE audit_logs SET metadata = $2 WHERE id = $1 RETURNING {AUDIT_COLS}"
            );
            let row = sqlx::query_as::<_, AuditLogRow>(&sql)
                .bind(a.id)
                .bind(&a.metadata)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?;
            match row {
                Some(row) => Some(Record::AuditLog(row.try_into()?)),
                None => None,
            }
        }
        Record::Feedback(f) => {
            let sql = format!(
                "UPDATE feedback SET message = $2, submitted_by = $3 WHERE id = $1 \
                 RETURNING {FEEDBACK_COLS}"
            );
            sqlx::query_as::<_, Feedback>(&sql)
                .bind(f.id)
                .bind(&f.message)
                .bind(&f.submitted_by)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_error)?
                .map(Record::Feedback)
        }
    };
    stored.ok_or(StoreError::Missing(kind, key))
}

async fn delete(conn: &mut PgConnection, kind: EntityKind, key: Key) -> Result<(), StoreError> {
    let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());
    let query = sqlx::query(&sql);
    let query = match kind {
        EntityKind::User => query.bind(uuid_key(kind, key)?),
        _ => query.bind(int_key(kind, key)?),
    };
    query.execute(&mut *conn).await.map_err(db_error)?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn apply(&self, changes: Vec<Change>) -> Result<Vec<Option<Record>>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin transaction")?;
        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            let row = match change {
                Change::Insert(record) => Some(insert(&mut tx, record).await?),
                Change::Update(record) => Some(update(&mut tx, record).await?),
                Change::Delete(kind, key) => {
                    delete(&mut tx, kind, key).await?;
                    None
                }
            };
            applied.push(row);
        }
        tx.commit().await.context("commit transaction")?;
        Ok(applied)
    }

    async fn find(&self, kind: EntityKind, key: Key) -> Result<Option<Record>, StoreError> {
        let record = match kind {
            EntityKind::User => {
                let sql = format!("SELECT {USER_COLS} FROM users WHERE id = $1");
                sqlx::query_as::<_, User>(&sql)
                    .bind(uuid_key(kind, key)?)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?
                    .map(Record::User)
            }
            EntityKind::Ticket => {
                let sql = format!("SELECT {TICKET_COLS} FROM tickets WHERE id = $1");
                let row = sqlx::query_as::<_, TicketRow>(&sql)
                    .bind(int_key(kind, key)?)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?;
                match row {
                    Some(row) => Some(Record::Ticket(row.try_into()?)),
                    None => None,
                }
            }
            EntityKind::Label => {
                let sql = format!("SELECT {LABEL_COLS} FROM labels WHERE id = $1");
                sqlx::query_as::<_, Label>(&sql)
                    .bind(int_key(kind, key)?)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?
                    .map(Record::Label)
            }
            EntityKind::TicketLabel => {
                let sql = format!("SELECT {TICKET_LABEL_COLS} FROM ticket_labels WHERE id = $1");
                sqlx::query_as::<_, TicketLabel>(&sql)
                    .bind(int_key(kind, key)?)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?
                    .map(Record::TicketLabel)
            }
            EntityKind::Issue => {
                let sql = format!("SELECT {ISSUE_COLS} FROM issues WHERE id = $1");
                sqlx::query_as::<_, Issue>(&sql)
                    .bind(int_key(kind, key)?)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?
                    .map(Record::Issue)
            }
            EntityKind::AuditLog => {
                let sql = format!("SELECT {AUDIT_COLS} FROM audit_logs WHERE id = $1");
                let row = sqlx::query_as::<_, AuditLogRow>(&sql)
                    .bind(int_key(kind, key)?)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?;
                match row {
                    Some(row) => Some(Record::AuditLog(row.try_into()?)),
                    None => None,
                }
            }
            EntityKind::Feedback => {
                let sql = format!("SELECT {FEEDBACK_COLS} FROM feedback WHERE id = $1");
                sqlx::query_as::<_, Feedback>(&sql)
                    .bind(int_key(kind, key)?)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?
                    .map(Record::Feedback)
            }
        };
        Ok(record)
    }

    async fn all(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError> {
        let records: Vec<Record> = match kind {
            EntityKind::User => {
                let sql = format!("SELECT {USER_COLS} FROM users ORDER BY created_at");
                sqlx::query_as::<_, User>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?
                    .into_iter()
                    .map(Record::User)
                    .collect()
            }
            EntityKind::Ticket => {
                let sql = format!("SELECT {TICKET_COLS} FROM tickets ORDER BY id");
                sqlx::query_as::<_, TicketRow>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?
                    .into_iter()
                    .map(|row| Ticket::try_from(row).map(Record::Ticket))
                    .collect::<Result<_, _>>()?
            }
            EntityKind::Label => {
                let sql = format!("SELECT {LABEL_COLS} FROM labels ORDER BY id");
                sqlx::query_as::<_, Label>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?
                    .into_iter()
                    .map(Record::Label)
                    .collect()
            }
            EntityKind::TicketLabel => {
                let sql = format!("SELECT {TICKET_LABEL_COLS} FROM ticket_labels ORDER BY id");
                sqlx::query_as::<_, TicketLabel>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?
                    .into_iter()
                    .map(Record::TicketLabel)
                    .collect()
            }
            EntityKind::Issue => {
                let sql = format!("SELECT {ISSUE_COLS} FROM issues ORDER BY id");
                sqlx::query_as::<_, Issue>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?
                    .into_iter()
                    .map(Record::Issue)
                    .collect()
            }
            EntityKind::AuditLog => {
                let sql = format!("SELECT {AUDIT_COLS} FROM audit_logs ORDER BY id");
                sqlx::query_as::<_, AuditLogRow>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?
                    .into_iter()
                    .map(|row| AuditLog::try_from(row).map(Record::AuditLog))
                    .collect::<Result<_, _>>()?
            }
            EntityKind::Feedback => {
                let sql = format!("SELECT {FEEDBACK_COLS} FROM feedback ORDER BY id");
                sqlx::query_as::<_, Feedback>(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error)?
                    .into_iter()
                    .map(Record::Feedback)
                    .collect()
            }
        };
        Ok(records)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        let sql = format!("SELECT count(*) FROM {}", kind.table());
        let (n,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(n)
    }

    async fn ticket_counts(&self) -> Result<TicketCounts, StoreError> {
        let (open, in_progress, closed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT count(*) FILTER (WHERE status <> 'closed'),
                   count(*) FILTER (WHERE status = 'in_progress'),
                   count(*) FILTER (WHERE status = 'closed')
            FROM tickets
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(TicketCounts { open, in_progress, closed })
    }

    async fn count_tickets(&self, filter: TicketFilter) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as(
            r#"
            SELECT count(*) FROM tickets
            WHERE $1::boolean IS NULL OR (status <> 'closed') = $1
            "#,
        )
        .bind(filter.as_state())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(n)
    }

    async fn ticket_page(
        &self,
        filter: TicketFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TicketWithAuthor>, StoreError> {
        let rows = sqlx::query_as::<_, TicketAuthorRow>(
            r#"
            SELECT t.id, t.title, t.description, t.status, t.created_at, t.last_modified_at,
                   t.closed_at, t.created_by_id, u.username
            FROM tickets t
            LEFT JOIN users u ON u.id = t.created_by_id
            WHERE $1::boolean IS NULL OR (t.status <> 'closed') = $1
            ORDER BY t.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.as_state())
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|row| -> Result<TicketWithAuthor, StoreError> {
                Ok(TicketWithAuthor {
                    ticket: row.ticket.try_into()?,
                    username: row.username,
                })
            })
            .collect()
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE username = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE lower(email) = lower($1)");
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn labels_for_ticket(&self, ticket_id: i64) -> Result<Vec<Label>, StoreError> {
        sqlx::query_as::<_, Label>(
            r#"
            SELECT l.id, l.name, l.background_color, l.text_color, l.description, l.created_by_id
            FROM labels l
            JOIN ticket_labels tl ON tl.label_id = l.id
            WHERE tl.ticket_id = $1
            ORDER BY l.name
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn ticket_label(
        &self,
        ticket_id: i64,
        label_id: i64,
    ) -> Result<Option<TicketLabel>, StoreError> {
        let sql = format!(
            "SELECT {TICKET_LABEL_COLS} FROM ticket_labels WHERE ticket_id = $1 AND label_id = $2"
        );
        sqlx::query_as::<_, TicketLabel>(&sql)
            .bind(ticket_id)
            .bind(label_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn issue_children(&self, parent_id: Option<i64>) -> Result<Vec<Issue>, StoreError> {
        let sql = format!(
            "SELECT {ISSUE_COLS} FROM issues WHERE parent_id IS NOT DISTINCT FROM $1 ORDER BY id"
        );
        sqlx::query_as::<_, Issue>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }
}
