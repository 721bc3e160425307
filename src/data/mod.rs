//! Persistence: entity plumbing, the store seam with its PostgreSQL and
//! in-memory backends, and the per-request data accessor.

mod accessor;
mod entity;
mod memory;
mod postgres;
pub mod seed;
mod store;

pub use accessor::{AccessorConfig, DataAccessor, DataError};
pub use entity::{EntityKind, Key};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{Store, StoreError, TicketCounts, TicketFilter, TicketWithAuthor};
