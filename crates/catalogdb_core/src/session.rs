//! Sessions.
//!
//! A [`Session`] is one client's view of a database. Reads outside a
//! transaction see the catalog current at the moment of the call. Writes
//! outside a transaction run in an implicit transaction of their own.

use crate::catalog::Catalog;
use crate::collection::EntityCollection;
use crate::database::DatabaseInner;
use crate::error::{CoreError, CoreResult};
use crate::model::{EntityContentRequirements, EntityMutation, EntityReference, SealedEntity};
use crate::schema::EntitySchema;
use crate::transaction::{CommitOutcome, Transaction};
use crate::types::{CatalogState, PrimaryKey};
use catalogdb_storage::BufferPool;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Pool {
    active: usize,
    buffers: Option<Arc<BufferPool>>,
}

/// Counts open sessions and owns the read buffers they share.
///
/// The pool exists while at least one session is open.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    pool: Mutex<Pool>,
}

impl SessionRegistry {
    pub(crate) fn enter(&self) {
        let mut pool = self.pool.lock();
        pool.active += 1;
        if pool.active == 1 {
            pool.buffers = Some(Arc::new(BufferPool::new()));
            tracing::debug!("read buffers acquired");
        }
    }

    pub(crate) fn leave(&self) {
        let mut pool = self.pool.lock();
        pool.active = pool.active.saturating_sub(1);
        if pool.active == 0 && pool.buffers.take().is_some() {
            tracing::debug!("read buffers released");
        }
    }

    /// The shared read buffers, if any session is open.
    pub(crate) fn buffers(&self) -> Option<Arc<BufferPool>> {
        self.pool.lock().buffers.clone()
    }

    pub(crate) fn active(&self) -> usize {
        self.pool.lock().active
    }
}

/// A client's handle onto a database.
///
/// At most one explicit transaction is open per session. Explicit
/// transactions need an ALIVE catalog; while the catalog warms up every
/// write commits on its own without touching storage.
pub struct Session {
    id: Uuid,
    db: Arc<DatabaseInner>,
    txn: Mutex<Option<Arc<Transaction>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("transaction", &self.transaction().map(|txn| txn.id()))
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(db: Arc<DatabaseInner>) -> Self {
        let id = Uuid::new_v4();
        db.publisher().load().shared().sessions.enter();
        tracing::debug!(session = %id, "session opened");
        Self {
            id,
            db,
            txn: Mutex::new(None),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The open explicit transaction.
    #[must_use]
    pub fn transaction(&self) -> Option<Arc<Transaction>> {
        self.txn.lock().clone()
    }

    /// The catalog reads resolve against: the transaction's snapshot, or
    /// the current catalog.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        match self.transaction() {
            Some(txn) => Arc::clone(txn.catalog()),
            None => self.db.publisher().load_full(),
        }
    }

    /// Opens an explicit transaction.
    ///
    /// # Errors
    ///
    /// `InvalidState` while the catalog warms up or after the database
    /// closed, `TransactionAlreadyOpen` if one is open already.
    pub fn begin_transaction(&self) -> CoreResult<Arc<Transaction>> {
        self.db.ensure_open()?;
        let mut slot = self.txn.lock();
        if let Some(txn) = slot.as_ref() {
            return Err(CoreError::TransactionAlreadyOpen {
                transaction_id: txn.id().as_u64(),
            });
        }
        let catalog = self.db.publisher().load_full();
        if catalog.state() != CatalogState::Alive {
            return Err(CoreError::invalid_state(
                "transactions are available once the catalog is alive",
            ));
        }
        let txn = Arc::new(Transaction::begin(catalog, true));
        tracing::debug!(session = %self.id, txn = %txn.id(), "transaction opened");
        *slot = Some(Arc::clone(&txn));
        Ok(txn)
    }

    fn take_transaction(&self) -> CoreResult<Arc<Transaction>> {
        self.txn
            .lock()
            .take()
            .ok_or_else(|| CoreError::invalid_state("no transaction is open"))
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// `InvalidState` without an open transaction; commit failures, after
    /// which the transaction is rolled back.
    pub fn commit(&self) -> CoreResult<CommitOutcome> {
        self.take_transaction()?.close(self.db.publisher())
    }

    /// Rolls the open transaction back.
    ///
    /// # Errors
    ///
    /// `InvalidState` without an open transaction.
    pub fn rollback(&self) -> CoreResult<()> {
        self.take_transaction()?.rollback()
    }

    /// Dooms the open transaction.
    ///
    /// # Errors
    ///
    /// `InvalidState` without an open transaction.
    pub fn set_rollback_only(&self) -> CoreResult<()> {
        let txn = self
            .transaction()
            .ok_or_else(|| CoreError::invalid_state("no transaction is open"))?;
        txn.set_rollback_only();
        Ok(())
    }

    /// Collection `entity_type` as this session sees it.
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` for an unknown entity type.
    pub fn collection(&self, entity_type: &str) -> CoreResult<Arc<EntityCollection>> {
        let collection = match self.transaction() {
            Some(txn) => txn.collection(entity_type),
            None => self.db.publisher().load().collection(entity_type),
        };
        collection.ok_or_else(|| CoreError::collection_not_found(entity_type))
    }

    /// Entity types this session sees.
    #[must_use]
    pub fn collection_types(&self) -> Vec<String> {
        match self.transaction() {
            Some(txn) => txn.collection_types(),
            None => self.db.publisher().load().collection_types(),
        }
    }

    /// Reads an entity with the sections in `requirements`.
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` for an unknown entity type; storage errors.
    pub fn get_entity(
        &self,
        entity_type: &str,
        primary_key: PrimaryKey,
        requirements: &EntityContentRequirements,
    ) -> CoreResult<Option<SealedEntity>> {
        let txn = self.transaction();
        self.collection(entity_type)?
            .get_entity(txn.as_deref(), primary_key, requirements)
    }

    /// Fetches the sections of `requirements` that `entity` lacks.
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` if the entity's type is gone; enrichment errors.
    pub fn enrich_entity(
        &self,
        entity: &SealedEntity,
        requirements: &EntityContentRequirements,
    ) -> CoreResult<SealedEntity> {
        let txn = self.transaction();
        self.collection(entity.entity_type())?
            .enrich_entity(txn.as_deref(), entity, requirements)
    }

    /// Narrows `entity` to `requirements`.
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` if the entity's type is gone.
    pub fn limit_entity(
        &self,
        entity: &SealedEntity,
        requirements: &EntityContentRequirements,
    ) -> CoreResult<SealedEntity> {
        Ok(self
            .collection(entity.entity_type())?
            .limit_entity(entity, requirements))
    }

    /// Runs `write` in the open transaction, or in an implicit one that
    /// commits right after. Implicit transactions are durable only once
    /// the catalog is alive.
    fn write<R>(&self, write: impl FnOnce(&Transaction) -> CoreResult<R>) -> CoreResult<R> {
        self.db.ensure_open()?;
        if let Some(txn) = self.transaction() {
            return write(&*txn);
        }
        let catalog = self.db.publisher().load_full();
        let durable = catalog.state() == CatalogState::Alive;
        let txn = Transaction::begin(catalog, durable);
        match write(&txn) {
            Ok(result) => match txn.close(self.db.publisher())? {
                CommitOutcome::RolledBack => Err(CoreError::invalid_state(format!(
                    "implicit transaction {} was rolled back",
                    txn.id()
                ))),
                _ => Ok(result),
            },
            Err(err) => {
                txn.rollback()?;
                Err(err)
            }
        }
    }

    /// Inserts, updates or removes an entity, creating its collection if
    /// needed.
    ///
    /// # Errors
    ///
    /// Mutation errors, which doom the open transaction; commit errors of
    /// the implicit transaction.
    pub fn upsert_entity(&self, mutation: &EntityMutation) -> CoreResult<EntityReference> {
        self.write(|txn| {
            txn.get_or_create_collection(mutation.entity_type())?
                .upsert_entity(txn, mutation)
        })
    }

    /// Removes entity `primary_key`; `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` for an unknown entity type; storage errors.
    pub fn delete_entity(&self, entity_type: &str, primary_key: PrimaryKey) -> CoreResult<bool> {
        self.write(|txn| {
            txn.collection(entity_type)
                .ok_or_else(|| CoreError::collection_not_found(entity_type))?
                .delete_entity(txn, primary_key)
        })
    }

    /// Removes entity `primary_key` with its hierarchical descendants.
    ///
    /// # Errors
    ///
    /// `CollectionNotFound` for an unknown entity type; storage errors.
    pub fn delete_entity_and_subtree(
        &self,
        entity_type: &str,
        primary_key: PrimaryKey,
    ) -> CoreResult<usize> {
        self.write(|txn| {
            txn.collection(entity_type)
                .ok_or_else(|| CoreError::collection_not_found(entity_type))?
                .delete_entity_and_subtree(txn, primary_key)
        })
    }

    /// Returns collection `entity_type`, creating it with an empty schema.
    ///
    /// # Errors
    ///
    /// Commit errors of the implicit transaction.
    pub fn get_or_create_collection(&self, entity_type: &str) -> CoreResult<Arc<EntityCollection>> {
        self.write(|txn| txn.get_or_create_collection(entity_type).map(drop))?;
        self.collection(entity_type)
    }

    /// Creates collection `schema.name`.
    ///
    /// # Errors
    ///
    /// `DuplicateCollection` if it exists already.
    pub fn create_collection(&self, schema: EntitySchema) -> CoreResult<Arc<EntityCollection>> {
        let entity_type = schema.name.clone();
        self.write(|txn| txn.create_collection(schema).map(drop))?;
        self.collection(&entity_type)
    }

    /// Removes collection `entity_type`; `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Commit errors of the implicit transaction.
    pub fn delete_collection(&self, entity_type: &str) -> CoreResult<bool> {
        self.write(|txn| txn.delete_collection(entity_type))
    }

    /// Persists everything written while warming up.
    ///
    /// # Errors
    ///
    /// `InvalidState` once the catalog is alive; storage errors.
    pub fn flush(&self) -> CoreResult<Arc<Catalog>> {
        self.db.ensure_open()?;
        let catalog = self.db.publisher().load_full();
        catalog.flush(self.db.publisher())
    }

    /// Switches the catalog to ALIVE.
    ///
    /// # Errors
    ///
    /// See [`Catalog::go_live`].
    pub fn go_live(&self) -> CoreResult<Arc<Catalog>> {
        self.db.ensure_open()?;
        let catalog = self.db.publisher().load_full();
        catalog.go_live(self.db.publisher())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.lock().take() {
            if let Err(err) = txn.rollback() {
                tracing::debug!(session = %self.id, error = %err, "open transaction not rolled back");
            }
        }
        self.db.publisher().load().shared().sessions.leave();
        tracing::debug!(session = %self.id, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_follow_session_count() {
        let registry = SessionRegistry::default();
        assert!(registry.buffers().is_none());

        registry.enter();
        registry.enter();
        let buffers = registry.buffers().unwrap();
        assert_eq!(registry.active(), 2);

        registry.leave();
        assert!(Arc::ptr_eq(&buffers, &registry.buffers().unwrap()));

        registry.leave();
        assert_eq!(registry.active(), 0);
        assert!(registry.buffers().is_none());
    }

    #[test]
    fn leave_without_enter_is_harmless() {
        let registry = SessionRegistry::default();
        registry.leave();
        assert_eq!(registry.active(), 0);
    }
}
