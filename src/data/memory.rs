use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use anyhow::anyhow;
use async_trait::async_trait;
use uuid::Uuid;

use super::{
    entity::{Change, EntityKind, Key, Record},
    store::{Store, StoreError, TicketCounts, TicketFilter, TicketWithAuthor},
};
use crate::models::{
    AuditLog, Feedback, Issue, Label, Ticket, TicketLabel, TicketStatus, User,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<Uuid, User>,
    tickets: BTreeMap<i64, Ticket>,
    labels: BTreeMap<i64, Label>,
    ticket_labels: BTreeMap<i64, TicketLabel>,
    issues: BTreeMap<i64, Issue>,
    audit_logs: BTreeMap<i64, AuditLog>,
    feedback: BTreeMap<i64, Feedback>,
    sequences: HashMap<EntityKind, i64>,
}

/// In-process store with the same keys, unique constraints and cascades as
/// the PostgreSQL schema. Each `apply` works on a copy of the tables and only
/// swaps it in when every change succeeded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&tables))
    }
}

impl Tables {
    fn next_id(&mut self, kind: EntityKind) -> i64 {
        let seq = self.sequences.entry(kind).or_insert(0);
        *seq += 1;
        *seq
    }

    fn insert(&mut self, record: Record) -> Result<Record, StoreError> {
        let stored = match record {
            Record::User(mut u) => {
                if u.id.is_nil() {
                    u.id = Uuid::new_v4();
                }
                self.check_user(&u)?;
                self.users.insert(u.id, u.clone());
                Record::User(u)
            }
            Record::Ticket(mut t) => {
                self.check_ticket(&t)?;
                t.id = self.next_id(EntityKind::Ticket);
                self.tickets.insert(t.id, t.clone());
                Record::Ticket(t)
            }
            Record::Label(mut l) => {
                self.require_user(l.created_by_id, "labels_created_by_id_fkey")?;
                l.id = self.next_id(EntityKind::Label);
                self.labels.insert(l.id, l.clone());
                Record::Label(l)
            }
            Record::TicketLabel(mut tl) => {
                self.check_ticket_label(&tl)?;
                tl.id = self.next_id(EntityKind::TicketLabel);
                self.ticket_labels.insert(tl.id, tl.clone());
                Record::TicketLabel(tl)
            }
            Record::Issue(mut i) => {
                self.check_issue(&i)?;
                i.id = self.next_id(EntityKind::Issue);
                self.issues.insert(i.id, i.clone());
                Record::Issue(i)
            }
            Record::AuditLog(mut a) => {
                self.require_user(a.actor_id, "audit_logs_actor_id_fkey")?;
                a.id = self.next_id(EntityKind::AuditLog);
                self.audit_logs.insert(a.id, a.clone());
                Record::AuditLog(a)
            }
            Record::Feedback(mut f) => {
                f.id = self.next_id(EntityKind::Feedback);
                self.feedback.insert(f.id, f.clone());
                Record::Feedback(f)
            }
        };
        Ok(stored)
    }

    fn update(&mut self, record: Record) -> Result<Record, StoreError> {
        let kind = record.kind();
        let key = record.key();
        if !self.contains(kind, key) {
            return Err(StoreError::Missing(kind, key));
        }
        match &record {
            Record::User(u) => {
                self.check_user(u)?;
                self.users.insert(u.id, u.clone());
            }
            Record::Ticket(t) => {
                self.check_ticket(t)?;
                self.tickets.insert(t.id, t.clone());
            }
            Record::Label(l) => {
                self.require_user(l.created_by_id, "labels_created_by_id_fkey")?;
                self.labels.insert(l.id, l.clone());
            }
            Record::TicketLabel(tl) => {
                self.check_ticket_label(tl)?;
                self.ticket_labels.insert(tl.id, tl.clone());
            }
            Record::Issue(i) => {
                self.check_issue(i)?;
                self.issues.insert(i.id, i.clone());
            }
            Record::AuditLog(a) => {
                self.audit_logs.insert(a.id, a.clone());
            }
            Record::Feedback(f) => {
                self.feedback.insert(f.id, f.clone());
            }
        }
        Ok(record)
    }

    fn delete(&mut self, kind: EntityKind, key: Key) -> Result<(), StoreError> {
        match (kind, key) {
            (EntityKind::User, Key::Uuid(id)) => {
                let referenced = self.tickets.values().any(|t| t.created_by_id == id)
                    || self.labels.values().any(|l| l.created_by_id == id)
                    || self.issues.values().any(|i| i.created_by_id == id)
                    || self.audit_logs.values().any(|a| a.actor_id == id);
                if referenced {
                    return Err(StoreError::Reference("users referenced by other rows".into()));
                }
                self.users.remove(&id);
            }
            (EntityKind::Ticket, Key::Int(id)) => {
                self.tickets.remove(&id);
                self.ticket_labels.retain(|_, tl| tl.ticket_id != id);
            }
            (EntityKind::Label, Key::Int(id)) => {
                self.labels.remove(&id);
                self.ticket_labels.retain(|_, tl| tl.label_id != id);
            }
            (EntityKind::TicketLabel, Key::Int(id)) => {
                self.ticket_labels.remove(&id);
            }
            (EntityKind::Issue, Key::Int(id)) => {
                let mut doomed = vec![id];
                while let Some(next) = doomed.pop() {
                    self.issues.remove(&next);
                    doomed.extend(
                        self.issues
                            .values()
                            .filter(|i| i.parent_id == Some(next))
                            .map(|i| i.id),
                    );
                }
            }
            (EntityKind::AuditLog, Key::Int(id)) => {
                self.audit_logs.remove(&id);
            }
            (EntityKind::Feedback, Key::Int(id)) => {
                self.feedback.remove(&id);
            }
            (kind, key) => {
                return Err(anyhow!("key {key} does not fit {kind}").into());
            }
        }
        Ok(())
    }

    fn contains(&self, kind: EntityKind, key: Key) -> bool {
        self.get(kind, key).is_some()
    }

    fn get(&self, kind: EntityKind, key: Key) -> Option<Record> {
        match (kind, key) {
            (EntityKind::User, Key::Uuid(id)) => self.users.get(&id).cloned().map(Record::User),
            (EntityKind::Ticket, Key::Int(id)) => {
                self.tickets.get(&id).cloned().map(Record::Ticket)
            }
            (EntityKind::Label, Key::Int(id)) => self.labels.get(&id).cloned().map(Record::Label),
            (EntityKind::TicketLabel, Key::Int(id)) => {
                self.ticket_labels.get(&id).cloned().map(Record::TicketLabel)
            }
            (EntityKind::Issue, Key::Int(id)) => self.issues.get(&id).cloned().map(Record::Issue),
            (EntityKind::AuditLog, Key::Int(id)) => {
                self.audit_logs.get(&id).cloned().map(Record::AuditLog)
            }
            (EntityKind::Feedback, Key::Int(id)) => {
                self.feedback.get(&id).cloned().map(Record::Feedback)
            }
            _ => None,
        }
    }

    fn all(&self, kind: EntityKind) -> Vec<Record> {
        match kind {
            EntityKind::User => {
                let mut users: Vec<_> = self.users.values().cloned().collect();
                users.sort_by_key(|u| u.created_at);
                users.into_iter().map(Record::User).collect()
            }
            EntityKind::Ticket => self.tickets.values().cloned().map(Record::Ticket).collect(),
            EntityKind::Label => self.labels.values().cloned().map(Record::Label).collect(),
            EntityKind::TicketLabel => self
                .ticket_labels
                .values()
                .cloned()
                .map(Record::TicketLabel)
                .collect(),
            EntityKind::Issue => self.issues.values().cloned().map(Record::Issue).collect(),
            EntityKind::AuditLog => self
                .audit_logs
                .values()
                .cloned()
                .map(Record::AuditLog)
                .collect(),
            EntityKind::Feedback => self.feedback.values().cloned().map(Record::Feedback).collect(),
        }
    }

    fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::User => self.users.len(),
            EntityKind::Ticket => self.tickets.len(),
            EntityKind::Label => self.labels.len(),
            EntityKind::TicketLabel => self.ticket_labels.len(),
            EntityKind::Issue => self.issues.len(),
            EntityKind::AuditLog => self.audit_logs.len(),
            EntityKind::Feedback => self.feedback.len(),
        }
    }

    // ---- constraints ----

    fn require_user(&self, id: Uuid, constraint: &str) -> Result<(), StoreError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::Reference(constraint.into()))
        }
    }

    fn check_user(&self, u: &User) -> Result<(), StoreError> {
        let others = self.users.values().filter(|o| o.id != u.id);
        for o in others {
            if o.username == u.username {
                return Err(StoreError::Conflict("users_username_key".into()));
            }
            if o.email.eq_ignore_ascii_case(&u.email) {
                return Err(StoreError::Conflict("users_email_key".into()));
            }
        }
        Ok(())
    }

    fn check_ticket(&self, t: &Ticket) -> Result<(), StoreError> {
        self.require_user(t.created_by_id, "tickets_created_by_id_fkey")?;
        if (t.status == TicketStatus::Closed) != t.closed_at.is_some() {
            return Err(anyhow!("tickets_closed_at_matches_status violated for ticket {}", t.id).into());
        }
        let duplicate = self
            .tickets
            .values()
            .any(|o| o.id != t.id && o.title == t.title && o.created_by_id == t.created_by_id);
        if duplicate {
            return Err(StoreError::Conflict("tickets_title_creator_key".into()));
        }
        Ok(())
    }

    fn check_ticket_label(&self, tl: &TicketLabel) -> Result<(), StoreError> {
        if !self.tickets.contains_key(&tl.ticket_id) {
            return Err(StoreError::Reference("ticket_labels_ticket_id_fkey".into()));
        }
        if !self.labels.contains_key(&tl.label_id) {
            return Err(StoreError::Reference("ticket_labels_label_id_fkey".into()));
        }
        let duplicate = self.ticket_labels.values().any(|o| {
            o.id != tl.id && o.ticket_id == tl.ticket_id && o.label_id == tl.label_id
        });
        if duplicate {
            return Err(StoreError::Conflict("ticket_labels_ticket_id_label_id_key".into()));
        }
        Ok(())
    }

    fn check_issue(&self, i: &Issue) -> Result<(), StoreError> {
        self.require_user(i.created_by_id, "issues_created_by_id_fkey")?;
        if let Some(parent) = i.parent_id {
            if parent == i.id || !self.issues.contains_key(&parent) {
                return Err(StoreError::Reference("issues_parent_id_fkey".into()));
            }
        }
        let duplicate = self
            .issues
            .values()
            .any(|o| o.id != i.id && o.title == i.title && o.created_by_id == i.created_by_id);
        if duplicate {
            return Err(StoreError::Conflict("issues_title_creator_key".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn apply(&self, changes: Vec<Change>) -> Result<Vec<Option<Record>>, StoreError> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let mut work = tables.clone();
        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            let row = match change {
                Change::Insert(record) => Some(work.insert(record)?),
                Change::Update(record) => Some(work.update(record)?),
                Change::Delete(kind, key) => {
                    work.delete(kind, key)?;
                    None
                }
            };
            applied.push(row);
        }
        *tables = work;
        Ok(applied)
    }

    async fn find(&self, kind: EntityKind, key: Key) -> Result<Option<Record>, StoreError> {
        self.read(|t| t.get(kind, key))
    }

    async fn all(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError> {
        self.read(|t| t.all(kind))
    }

    async fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        self.read(|t| t.len(kind) as i64)
    }

    async fn ticket_counts(&self) -> Result<TicketCounts, StoreError> {
        self.read(|t| {
            let mut counts = TicketCounts::default();
            for ticket in t.tickets.values() {
                match ticket.status {
                    TicketStatus::Open => counts.open += 1,
                    TicketStatus::InProgress => {
                        counts.open += 1;
                        counts.in_progress += 1;
                    }
                    TicketStatus::Closed => counts.closed += 1,
                }
            }
            counts
        })
    }

    async fn count_tickets(&self, filter: TicketFilter) -> Result<i64, StoreError> {
        self.read(|t| t.tickets.values().filter(|x| filter.matches(x.status)).count() as i64)
    }

    async fn ticket_page(
        &self,
        filter: TicketFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TicketWithAuthor>, StoreError> {
        self.read(|t| {
            t.tickets
                .values()
                .rev()
                .filter(|x| filter.matches(x.status))
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .map(|x| TicketWithAuthor {
                    ticket: x.clone(),
                    username: t.users.get(&x.created_by_id).map(|u| u.username.clone()),
                })
                .collect()
        })
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.read(|t| t.users.values().find(|u| u.username == username).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.read(|t| {
            t.users
                .values()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned()
        })
    }

    async fn labels_for_ticket(&self, ticket_id: i64) -> Result<Vec<Label>, StoreError> {
        self.read(|t| {
            let mut labels: Vec<Label> = t
                .ticket_labels
                .values()
                .filter(|tl| tl.ticket_id == ticket_id)
                .filter_map(|tl| t.labels.get(&tl.label_id).cloned())
                .collect();
            labels.sort_by(|a, b| a.name.cmp(&b.name));
            labels
        })
    }

    async fn ticket_label(
        &self,
        ticket_id: i64,
        label_id: i64,
    ) -> Result<Option<TicketLabel>, StoreError> {
        self.read(|t| {
            t.ticket_labels
                .values()
                .find(|tl| tl.ticket_id == ticket_id && tl.label_id == label_id)
                .cloned()
        })
    }

    async fn issue_children(&self, parent_id: Option<i64>) -> Result<Vec<Issue>, StoreError> {
        self.read(|t| {
            t.issues
                .values()
                .filter(|i| i.parent_id == parent_id)
                .cloned()
                .collect()
        })
    }
}
