use std::fmt;

use uuid::Uuid;

use crate::models::{AuditLog, Feedback, Issue, Label, Ticket, TicketLabel, User};

/// Every persisted entity type. The data accessor gates access per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    User,
    Ticket,
    Label,
    TicketLabel,
    Issue,
    AuditLog,
    Feedback,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::User,
        EntityKind::Ticket,
        EntityKind::Label,
        EntityKind::TicketLabel,
        EntityKind::Issue,
        EntityKind::AuditLog,
        EntityKind::Feedback,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Ticket => "Ticket",
            EntityKind::Label => "Label",
            EntityKind::TicketLabel => "TicketLabel",
            EntityKind::Issue => "Issue",
            EntityKind::AuditLog => "AuditLog",
            EntityKind::Feedback => "Feedback",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Ticket => "tickets",
            EntityKind::Label => "labels",
            EntityKind::TicketLabel => "ticket_labels",
            EntityKind::Issue => "issues",
            EntityKind::AuditLog => "audit_logs",
            EntityKind::Feedback => "feedback",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary key value. Users are keyed by UUID, everything else by a serial id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Uuid(Uuid),
}

impl Key {
    pub fn as_int(self) -> Option<i64> {
        match self {
            Key::Int(v) => Some(v),
            Key::Uuid(_) => None,
        }
    }

    pub fn as_uuid(self) -> Option<Uuid> {
        match self {
            Key::Uuid(v) => Some(v),
            Key::Int(_) => None,
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<Uuid> for Key {
    fn from(v: Uuid) -> Self {
        Key::Uuid(v)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{v}"),
            Key::Uuid(v) => write!(f, "{v}"),
        }
    }
}

/// A type-erased entity as it crosses the store boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    User(User),
    Ticket(Ticket),
    Label(Label),
    TicketLabel(TicketLabel),
    Issue(Issue),
    AuditLog(AuditLog),
    Feedback(Feedback),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::User(_) => EntityKind::User,
            Record::Ticket(_) => EntityKind::Ticket,
            Record::Label(_) => EntityKind::Label,
            Record::TicketLabel(_) => EntityKind::TicketLabel,
            Record::Issue(_) => EntityKind::Issue,
            Record::AuditLog(_) => EntityKind::AuditLog,
            Record::Feedback(_) => EntityKind::Feedback,
        }
    }

    pub fn key(&self) -> Key {
        match self {
            Record::User(v) => v.id.into(),
            Record::Ticket(v) => v.id.into(),
            Record::Label(v) => v.id.into(),
            Record::TicketLabel(v) => v.id.into(),
            Record::Issue(v) => v.id.into(),
            Record::AuditLog(v) => v.id.into(),
            Record::Feedback(v) => v.id.into(),
        }
    }
}

/// A staged write, flushed to the store in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(Record),
    Update(Record),
    Delete(EntityKind, Key),
}

pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn key(&self) -> Key;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
}

macro_rules! impl_entity {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl Entity for $ty {
                const KIND: EntityKind = EntityKind::$ty;

                fn key(&self) -> Key {
                    Key::from(self.id)
                }

                fn into_record(self) -> Record {
                    Record::$ty(self)
                }

                fn from_record(record: Record) -> Option<Self> {
                    match record {
                        Record::$ty(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_entity!(User, Ticket, Label, TicketLabel, Issue, AuditLog, Feedback);
