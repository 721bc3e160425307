use std::{
    collections::HashSet,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, error, warn};

use super::{
    entity::{Change, Entity, EntityKind, Key, Record},
    store::{Store, StoreError, TicketCounts, TicketFilter, TicketWithAuthor},
};
use crate::models::{Issue, Label, TicketLabel, User};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("entity of type {0} is not allowed")]
    NotAllowed(EntityKind),
    #[error("{message}")]
    Save {
        message: String,
        #[source]
        source: StoreError,
    },
    #[error("query failed")]
    Query(#[source] StoreError),
}

impl DataError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DataError::Save {
                source: StoreError::Conflict(_),
                ..
            }
        )
    }
}

/// Behavior switches for a [`DataAccessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorConfig {
    pub allowed: HashSet<EntityKind>,
    /// Flush after every write.
    pub auto_save: bool,
    /// Hold flushes while a deferred scope is open even if auto-save is on.
    pub deferred_save_scoped: bool,
    /// Flush whatever is pending in [`DataAccessor::finish`].
    pub save_on_finish: bool,
}

impl AccessorConfig {
    pub fn new(allowed: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            auto_save: true,
            deferred_save_scoped: false,
            save_on_finish: false,
        }
    }

    pub fn all_entities() -> Self {
        Self::new(EntityKind::ALL)
    }
}

/// Unit of work over a [`Store`], one per request.
///
/// Writes are staged as [`Change`]s and flushed in a single atomic batch,
/// either immediately (auto-save), at the end of a [`DeferredScope`], on an
/// explicit [`save`](DataAccessor::save), or in [`finish`](DataAccessor::finish).
/// Reads always go to the store and do not see staged changes.
pub struct DataAccessor {
    store: Arc<dyn Store>,
    config: AccessorConfig,
    pending: Vec<Change>,
    scope_depth: u32,
}

impl DataAccessor {
    pub fn new(store: Arc<dyn Store>, config: AccessorConfig) -> Self {
        Self {
            store,
            config,
            pending: Vec::new(),
            scope_depth: 0,
        }
    }

    pub fn config(&self) -> &AccessorConfig {
        &self.config
    }

    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    pub fn enable_auto_save(&mut self) -> &mut Self {
        self.config.auto_save = true;
        self
    }

    pub fn disable_auto_save(&mut self) -> &mut Self {
        self.config.auto_save = false;
        self
    }

    pub fn enable_deferred_save_scoped(&mut self) -> &mut Self {
        self.config.deferred_save_scoped = true;
        self
    }

    pub fn disable_deferred_save_scoped(&mut self) -> &mut Self {
        self.config.deferred_save_scoped = false;
        self
    }

    pub fn enable_save_on_finish(&mut self) -> &mut Self {
        self.config.save_on_finish = true;
        self
    }

    pub fn disable_save_on_finish(&mut self) -> &mut Self {
        self.config.save_on_finish = false;
        self
    }

    fn ensure_allowed<T: Entity>(&self) -> Result<(), DataError> {
        self.ensure_kind(T::KIND)
    }

    fn ensure_kind(&self, kind: EntityKind) -> Result<(), DataError> {
        if self.config.allowed.contains(&kind) {
            Ok(())
        } else {
            warn!(entity = %kind, "entity type not allowed");
            Err(DataError::NotAllowed(kind))
        }
    }

    // ---- writes ----

    /// Stages an insert. Returns the stored entity (with its assigned id) when
    /// the write was flushed, the entity as given otherwise.
    pub async fn create<T: Entity>(&mut self, entity: T) -> Result<T, DataError> {
        self.ensure_allowed::<T>()?;
        self.pending.push(Change::Insert(entity.clone().into_record()));
        let applied = self.try_save().await?;
        Ok(last_of::<T>(applied).unwrap_or(entity))
    }

    pub async fn update<T: Entity>(&mut self, entity: T) -> Result<T, DataError> {
        self.ensure_allowed::<T>()?;
        self.pending.push(Change::Update(entity.clone().into_record()));
        let applied = self.try_save().await?;
        Ok(last_of::<T>(applied).unwrap_or(entity))
    }

    /// Returns `false` when there is nothing with that key.
    pub async fn delete<T: Entity>(&mut self, key: impl Into<Key>) -> Result<bool, DataError> {
        self.ensure_allowed::<T>()?;
        let key = key.into();
        if self.find::<T>(key).await?.is_none() {
            return Ok(false);
        }
        self.pending.push(Change::Delete(T::KIND, key));
        self.try_save().await?;
        Ok(true)
    }

    pub async fn create_many<T: Entity>(&mut self, entities: Vec<T>) -> Result<Vec<T>, DataError> {
        self.ensure_allowed::<T>()?;
        let n = entities.len();
        self.pending
            .extend(entities.iter().cloned().map(|e| Change::Insert(e.into_record())));
        let applied = self.try_save().await?;
        Ok(tail_of::<T>(applied, n).unwrap_or(entities))
    }

    pub async fn update_many<T: Entity>(&mut self, entities: Vec<T>) -> Result<Vec<T>, DataError> {
        self.ensure_allowed::<T>()?;
        let n = entities.len();
        self.pending
            .extend(entities.iter().cloned().map(|e| Change::Update(e.into_record())));
        let applied = self.try_save().await?;
        Ok(tail_of::<T>(applied, n).unwrap_or(entities))
    }

    pub async fn delete_many<T: Entity>(&mut self, keys: Vec<Key>) -> Result<usize, DataError> {
        self.ensure_allowed::<T>()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let n = keys.len();
        self.pending
            .extend(keys.into_iter().map(|k| Change::Delete(T::KIND, k)));
        self.try_save().await?;
        Ok(n)
    }

    // ---- saving ----

    fn should_auto_save(&self) -> bool {
        self.config.auto_save && !(self.config.deferred_save_scoped && self.scope_depth > 0)
    }

    async fn try_save(&mut self) -> Result<Vec<Option<Record>>, DataError> {
        if self.should_auto_save() {
            self.flush().await
        } else {
            Ok(Vec::new())
        }
    }

    async fn flush(&mut self) -> Result<Vec<Option<Record>>, DataError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let changes = std::mem::take(&mut self.pending);
        let count = changes.len();
        match self.store.apply(changes).await {
            Ok(applied) => {
                debug!(count, "changes saved");
                Ok(applied)
            }
            Err(e) => {
                error!(error = %e, count, "failed to save changes");
                Err(DataError::Save {
                    message: "failed to save changes".into(),
                    source: e,
                })
            }
        }
    }

    /// Flushes pending changes regardless of the auto-save setting.
    pub async fn save(&mut self) -> Result<usize, DataError> {
        let n = self.pending.len();
        self.flush().await?;
        Ok(n)
    }

    /// Suspends auto-save until the returned scope completes.
    pub fn defer(&mut self) -> DeferredScope<'_> {
        let saved_auto_save = self.config.auto_save;
        self.config.auto_save = false;
        self.scope_depth += 1;
        DeferredScope {
            accessor: self,
            saved_auto_save,
            closed: false,
        }
    }

    /// Ends the unit of work. Pending changes are flushed when
    /// `save_on_finish` is set and discarded otherwise.
    pub async fn finish(mut self) -> Result<usize, DataError> {
        if self.config.save_on_finish {
            return self.save().await;
        }
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "discarding unsaved changes");
            self.pending.clear();
        }
        Ok(0)
    }

    // ---- reads ----

    pub async fn find<T: Entity>(&self, key: impl Into<Key>) -> Result<Option<T>, DataError> {
        self.ensure_allowed::<T>()?;
        let record = self
            .store
            .find(T::KIND, key.into())
            .await
            .map_err(DataError::Query)?;
        Ok(record.and_then(T::from_record))
    }

    pub async fn all<T: Entity>(&self) -> Result<Vec<T>, DataError> {
        self.ensure_allowed::<T>()?;
        let records = self.store.all(T::KIND).await.map_err(DataError::Query)?;
        Ok(records.into_iter().filter_map(T::from_record).collect())
    }

    /// Loads every row of `T` and keeps those matching `predicate`.
    pub async fn query<T, F>(&self, predicate: F) -> Result<Vec<T>, DataError>
    where
        T: Entity,
        F: Fn(&T) -> bool,
    {
        Ok(self
            .all::<T>()
            .await?
            .into_iter()
            .filter(|e| predicate(e))
            .collect())
    }

    pub async fn count<T: Entity>(&self) -> Result<i64, DataError> {
        self.ensure_allowed::<T>()?;
        self.store.count(T::KIND).await.map_err(DataError::Query)
    }

    pub async fn ticket_counts(&self) -> Result<TicketCounts, DataError> {
        self.ensure_kind(EntityKind::Ticket)?;
        self.store.ticket_counts().await.map_err(DataError::Query)
    }

    pub async fn count_tickets(&self, filter: TicketFilter) -> Result<i64, DataError> {
        self.ensure_kind(EntityKind::Ticket)?;
        self.store.count_tickets(filter).await.map_err(DataError::Query)
    }

    pub async fn ticket_page(
        &self,
        filter: TicketFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TicketWithAuthor>, DataError> {
        self.ensure_kind(EntityKind::Ticket)?;
        self.store
            .ticket_page(filter, offset, limit)
            .await
            .map_err(DataError::Query)
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<User>, DataError> {
        self.ensure_kind(EntityKind::User)?;
        self.store
            .user_by_username(username)
            .await
            .map_err(DataError::Query)
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        self.ensure_kind(EntityKind::User)?;
        self.store.user_by_email(email).await.map_err(DataError::Query)
    }

    pub async fn labels_for_ticket(&self, ticket_id: i64) -> Result<Vec<Label>, DataError> {
        self.ensure_kind(EntityKind::Label)?;
        self.ensure_kind(EntityKind::TicketLabel)?;
        self.store
            .labels_for_ticket(ticket_id)
            .await
            .map_err(DataError::Query)
    }

    pub async fn ticket_label(
        &self,
        ticket_id: i64,
        label_id: i64,
    ) -> Result<Option<TicketLabel>, DataError> {
        self.ensure_kind(EntityKind::TicketLabel)?;
        self.store
            .ticket_label(ticket_id, label_id)
            .await
            .map_err(DataError::Query)
    }

    pub async fn issue_children(&self, parent_id: Option<i64>) -> Result<Vec<Issue>, DataError> {
        self.ensure_kind(EntityKind::Issue)?;
        self.store
            .issue_children(parent_id)
            .await
            .map_err(DataError::Query)
    }
}

impl Drop for DataAccessor {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "data accessor dropped with unsaved changes");
        }
    }
}

fn last_of<T: Entity>(applied: Vec<Option<Record>>) -> Option<T> {
    applied.into_iter().last().flatten().and_then(T::from_record)
}

fn tail_of<T: Entity>(applied: Vec<Option<Record>>, n: usize) -> Option<Vec<T>> {
    if applied.len() < n || n == 0 {
        return None;
    }
    let skip = applied.len() - n;
    applied
        .into_iter()
        .skip(skip)
        .map(|r| r.and_then(T::from_record))
        .collect()
}

/// Auto-save is suspended while this is alive. [`complete`](Self::complete)
/// flushes once the outermost scope closes; dropping without completing
/// restores the previous settings and leaves the changes pending.
pub struct DeferredScope<'a> {
    accessor: &'a mut DataAccessor,
    saved_auto_save: bool,
    closed: bool,
}

impl DeferredScope<'_> {
    pub async fn complete(mut self) -> Result<usize, DataError> {
        self.close();
        if self.accessor.scope_depth == 0 {
            self.accessor.save().await
        } else {
            Ok(0)
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.accessor.scope_depth -= 1;
            self.accessor.config.auto_save = self.saved_auto_save;
        }
    }
}

impl Deref for DeferredScope<'_> {
    type Target = DataAccessor;

    fn deref(&self) -> &DataAccessor {
        self.accessor
    }
}

impl DerefMut for DeferredScope<'_> {
    fn deref_mut(&mut self) -> &mut DataAccessor {
        self.accessor
    }
}

impl Drop for DeferredScope<'_> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("deferred scope dropped without completing");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryStore;
    use crate::models::{Feedback, Ticket};
    use time::OffsetDateTime;

    fn feedback(message: &str) -> Feedback {
        Feedback {
            id: 0,
            message: message.into(),
            submitted_by: "Anonymous".into(),
            submitted_at: OffsetDateTime::now_utc(),
        }
    }

    fn accessor(config: AccessorConfig) -> (Arc<MemoryStore>, DataAccessor) {
        let store = Arc::new(MemoryStore::new());
        let accessor = DataAccessor::new(store.clone(), config);
        (store, accessor)
    }

    #[tokio::test]
    async fn create_with_auto_save_assigns_id() {
        let (store, mut data) = accessor(AccessorConfig::all_entities());
        let saved = data.create(feedback("heater broken")).await.unwrap();
        assert_eq!(saved.id, 1);
        assert_eq!(data.pending_changes(), 0);
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn disallowed_entity_is_rejected_without_staging() {
        let (_, mut data) = accessor(AccessorConfig::new([EntityKind::Ticket]));
        let err = data.create(feedback("nope")).await.unwrap_err();
        assert!(matches!(err, DataError::NotAllowed(EntityKind::Feedback)));
        assert_eq!(data.pending_changes(), 0);
        assert!(data.all::<Feedback>().await.is_err());
    }

    #[tokio::test]
    async fn without_auto_save_changes_wait_for_explicit_save() {
        let (store, mut data) = accessor(AccessorConfig::all_entities());
        data.disable_auto_save();
        let staged = data.create(feedback("a")).await.unwrap();
        assert_eq!(staged.id, 0);
        data.create(feedback("b")).await.unwrap();
        assert_eq!(data.pending_changes(), 2);
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 0);

        assert_eq!(data.save().await.unwrap(), 2);
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deferred_scope_flushes_once_on_complete() {
        let (store, mut data) = accessor(AccessorConfig::all_entities());
        let mut scope = data.defer();
        scope.create(feedback("a")).await.unwrap();
        scope.create(feedback("b")).await.unwrap();
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 0);
        assert_eq!(scope.complete().await.unwrap(), 2);

        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 2);
        assert!(data.config().auto_save);
    }

    #[tokio::test]
    async fn nested_scope_defers_to_outermost() {
        let (store, mut data) = accessor(AccessorConfig::all_entities());
        let mut outer = data.defer();
        {
            let mut inner = outer.defer();
            inner.create(feedback("inner")).await.unwrap();
            assert_eq!(inner.complete().await.unwrap(), 0);
        }
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 0);
        assert_eq!(outer.complete().await.unwrap(), 1);
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dropped_scope_restores_auto_save_and_keeps_changes() {
        let (_, mut data) = accessor(AccessorConfig::all_entities());
        {
            let mut scope = data.defer();
            scope.create(feedback("kept")).await.unwrap();
        }
        assert!(data.config().auto_save);
        assert_eq!(data.pending_changes(), 1);
        // the next auto-saved write carries the leftover change with it
        data.create(feedback("next")).await.unwrap();
        assert_eq!(data.pending_changes(), 0);
        assert_eq!(data.count::<Feedback>().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn deferred_save_scoped_holds_flushes_even_with_auto_save() {
        let (store, mut data) = accessor(AccessorConfig::all_entities());
        data.enable_deferred_save_scoped();
        let mut scope = data.defer();
        scope.enable_auto_save();
        scope.create(feedback("held")).await.unwrap();
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 0);
        scope.complete().await.unwrap();
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn finish_saves_only_when_configured() {
        let (store, mut data) = accessor(AccessorConfig::all_entities());
        data.disable_auto_save().enable_save_on_finish();
        data.create(feedback("on finish")).await.unwrap();
        assert_eq!(data.finish().await.unwrap(), 1);
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 1);

        let mut data = DataAccessor::new(store.clone(), AccessorConfig::all_entities());
        data.disable_auto_save();
        data.create(feedback("dropped")).await.unwrap();
        assert_eq!(data.finish().await.unwrap(), 0);
        assert_eq!(store.count(EntityKind::Feedback).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_failure_is_reported_and_batch_discarded() {
        let (_, mut data) = accessor(AccessorConfig::all_entities());
        // creator does not exist: the foreign key check fails the flush
        let orphan = Ticket::new(
            "Orphan".into(),
            "No such user".into(),
            uuid::Uuid::new_v4(),
            OffsetDateTime::now_utc(),
        );
        let err = data.create(orphan).await.unwrap_err();
        match err {
            DataError::Save { message, source } => {
                assert_eq!(message, "failed to save changes");
                assert!(matches!(source, StoreError::Reference(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(data.pending_changes(), 0);
    }

    #[tokio::test]
    async fn delete_reports_missing_entities() {
        let (_, mut data) = accessor(AccessorConfig::all_entities());
        let saved = data.create(feedback("bye")).await.unwrap();
        assert!(data.delete::<Feedback>(saved.id).await.unwrap());
        assert!(!data.delete::<Feedback>(saved.id).await.unwrap());
        assert_eq!(data.delete_many::<Feedback>(Vec::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_create_and_query() {
        let (_, mut data) = accessor(AccessorConfig::all_entities());
        let saved = data
            .create_many(vec![feedback("one"), feedback("two"), feedback("three")])
            .await
            .unwrap();
        assert_eq!(saved.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let long = data
            .query::<Feedback, _>(|f| f.message.len() > 3)
            .await
            .unwrap();
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].message, "three");

        let keys = saved.iter().map(|f| Key::from(f.id)).collect();
        assert_eq!(data.delete_many::<Feedback>(keys).await.unwrap(), 3);
        assert_eq!(data.count::<Feedback>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_many_returns_stored_rows() {
        let (_, mut data) = accessor(AccessorConfig::all_entities());
        let mut saved = data
            .create_many(vec![feedback("one"), feedback("two")])
            .await
            .unwrap();
        for f in &mut saved {
            f.submitted_by = "Facilities".into();
        }
        let updated = data.update_many(saved).await.unwrap();
        assert!(updated.iter().all(|f| f.submitted_by == "Facilities"));
        let stored: Feedback = data.find(updated[0].id).await.unwrap().unwrap();
        assert_eq!(stored.submitted_by, "Facilities");
    }
}
