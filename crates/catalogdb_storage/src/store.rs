//! The keyed append-only record store.
//!
//! Each entity collection owns one `RecordStore`. Writes are staged in
//! memory per transaction and only reach the backend when the owning
//! transaction commits, at which point [`RecordStore::flush`] appends the
//! staged frames followed by a fresh key table frame.
//!
//! ## Durability
//!
//! A flush is only *published* once the catalog header referencing its key
//! table location is written. Frames appended after the last published key
//! table are cut away by [`RecordStore::open`].

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::key_table::{KeyTable, PersistedKeyTable};
use crate::record::{decode_record, encode_record, FileLocation, RecordKey, RecordType};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of flushing one transaction's staged records.
#[derive(Debug, Clone)]
pub struct FlushOutcome {
    /// Version of the new key table.
    pub version: u64,
    /// Location of the key table frame; goes into the catalog header.
    pub location: FileLocation,
    /// The new key table.
    pub key_table: Arc<KeyTable>,
    /// Record types written or removed by the flush.
    pub record_types: BTreeSet<RecordType>,
}

/// Summary produced by [`RecordStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Live records checked.
    pub records: usize,
    /// Bytes in the backend.
    pub size: u64,
    /// Highest transaction id stamped on a checked record.
    pub last_transaction_id: u64,
    /// Records that failed their checksum or key check.
    pub problems: Vec<String>,
}

#[derive(Debug, Clone)]
struct StagedRecord {
    txid: u64,
    payload: Option<Vec<u8>>,
}

/// Append-only store of keyed records.
pub struct RecordStore {
    backend: RwLock<Box<dyn StorageBackend>>,
    staged: Mutex<BTreeMap<RecordKey, StagedRecord>>,
    sync: bool,
    closed: AtomicBool,
}

impl RecordStore {
    /// Opens a store whose last published key table lives at `location`.
    ///
    /// Bytes past the key table frame are truncated. With no location the
    /// store is treated as never published and emptied.
    ///
    /// # Errors
    ///
    /// Fails if the key table frame is unreadable or corrupted.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        location: Option<FileLocation>,
    ) -> StorageResult<(Self, Arc<KeyTable>)> {
        let size = backend.size()?;
        let (table, end) = match location {
            Some(location) => (read_key_table(&*backend, location)?, location.end()),
            None => (KeyTable::new(), 0),
        };
        if size > end {
            tracing::warn!(
                discarded = size - end,
                "truncating unpublished tail of record store"
            );
            backend.truncate(end)?;
        }
        let store = Self {
            backend: RwLock::new(backend),
            staged: Mutex::new(BTreeMap::new()),
            sync: true,
            closed: AtomicBool::new(false),
        };
        Ok((store, Arc::new(table)))
    }

    /// Sets whether [`RecordStore::flush`] syncs the backend (default on).
    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Reads the payload of `key` as seen by `table`.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, checksum failures or a key mismatch.
    pub fn get(&self, table: &KeyTable, key: &RecordKey) -> StorageResult<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        self.read_with(table, key, &mut buf, |payload| payload.to_vec())
    }

    /// Reads `key` into `buf` and hands the payload to `f`.
    ///
    /// Lets callers decode straight out of a pooled buffer.
    ///
    /// # Errors
    ///
    /// Same as [`RecordStore::get`].
    pub fn read_with<R>(
        &self,
        table: &KeyTable,
        key: &RecordKey,
        buf: &mut Vec<u8>,
        f: impl FnOnce(&[u8]) -> R,
    ) -> StorageResult<Option<R>> {
        self.ensure_open()?;
        let Some(location) = table.location(key) else {
            return Ok(None);
        };
        self.backend
            .read()
            .read_into(location.offset, location.length as usize, buf)?;
        let view = decode_record(buf)?;
        if view.record_type != key.record_type || Some(view.id) != table.resolve(key) {
            return Err(StorageError::KeyMismatch {
                offset: location.offset,
            });
        }
        Ok(Some(f(view.payload)))
    }

    /// Stages a write of `key` for transaction `txid`.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed.
    pub fn put(&self, txid: u64, key: RecordKey, payload: Vec<u8>) -> StorageResult<()> {
        self.ensure_open()?;
        self.staged.lock().insert(
            key,
            StagedRecord {
                txid,
                payload: Some(payload),
            },
        );
        Ok(())
    }

    /// Stages a removal of `key` for transaction `txid`.
    ///
    /// # Errors
    ///
    /// Fails if the store is closed.
    pub fn remove(&self, txid: u64, key: RecordKey) -> StorageResult<()> {
        self.ensure_open()?;
        self.staged.lock().insert(
            key,
            StagedRecord {
                txid,
                payload: None,
            },
        );
        Ok(())
    }

    /// Returns whether `txid` has staged records.
    #[must_use]
    pub fn has_staged(&self, txid: u64) -> bool {
        self.staged.lock().values().any(|r| r.txid == txid)
    }

    /// Drops everything staged by `txid`.
    pub fn discard(&self, txid: u64) {
        let mut staged = self.staged.lock();
        let before = staged.len();
        staged.retain(|_, record| record.txid != txid);
        let dropped = before - staged.len();
        if dropped > 0 {
            tracing::debug!(txid, dropped, "discarded staged records");
        }
    }

    /// Appends the records staged by `txid` and a new key table derived
    /// from `base`, then syncs unless disabled with
    /// [`RecordStore::with_sync`].
    ///
    /// `base` is not modified; the returned table is only visible to
    /// readers once the caller publishes it.
    ///
    /// # Errors
    ///
    /// Fails on I/O or encoding errors. Whatever was appended is cut back
    /// off; staged records are kept so the caller can
    /// [`RecordStore::discard`] them.
    pub fn flush(&self, txid: u64, base: &KeyTable) -> StorageResult<FlushOutcome> {
        self.ensure_open()?;
        let records: Vec<(RecordKey, Option<Vec<u8>>)> = self
            .staged
            .lock()
            .iter()
            .filter(|(_, r)| r.txid == txid)
            .map(|(k, r)| (k.clone(), r.payload.clone()))
            .collect();

        let mut backend = self.backend.write();
        let end = backend.size()?;
        let appended = Self::append_records(&mut backend, txid, base, &records, self.sync);
        let (table, record_types, location) = match appended {
            Ok(appended) => appended,
            Err(err) => {
                if let Err(cut) = backend.truncate(end) {
                    tracing::warn!(error = %cut, "failed to cut back record store");
                }
                return Err(err);
            }
        };
        drop(backend);

        self.discard(txid);
        tracing::debug!(
            txid,
            records = records.len(),
            version = table.version(),
            "flushed record store"
        );
        Ok(FlushOutcome {
            version: table.version(),
            location,
            key_table: Arc::new(table),
            record_types,
        })
    }

    fn append_records(
        backend: &mut Box<dyn StorageBackend>,
        txid: u64,
        base: &KeyTable,
        records: &[(RecordKey, Option<Vec<u8>>)],
        sync: bool,
    ) -> StorageResult<(KeyTable, BTreeSet<RecordType>, FileLocation)> {
        let mut table = base.next_version();
        let mut record_types = BTreeSet::new();
        for (key, payload) in records {
            record_types.insert(key.record_type);
            let id = table.resolve_or_alias(key);
            match payload {
                Some(payload) => {
                    let frame = encode_record(key.record_type, id, txid, payload);
                    let offset = backend.append(&frame)?;
                    table.set(
                        key.record_type,
                        id,
                        FileLocation {
                            offset,
                            length: frame_length(frame.len())?,
                        },
                    );
                }
                None => table.unset(key.record_type, id),
            }
        }

        let body = catalogdb_codec::encode(&table.to_persisted())?;
        let frame = catalogdb_codec::frame(&body);
        let offset = backend.append(&frame)?;
        backend.flush()?;
        if sync {
            backend.sync()?;
        }
        let location = FileLocation {
            offset,
            length: frame_length(frame.len())?,
        };
        Ok((table, record_types, location))
    }

    /// Current backend size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.read().size()
    }

    /// Re-reads every record `table` references and checks it.
    ///
    /// # Errors
    ///
    /// Only fails if the backend itself is unusable; damaged records are
    /// listed in the report.
    pub fn verify(&self, table: &KeyTable) -> StorageResult<VerifyReport> {
        self.ensure_open()?;
        verify_records(&**self.backend.read(), table)
    }

    /// Closes the store; staged records are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.staged.lock().clear();
    }

    /// Returns whether [`RecordStore::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Reads the key table frame at `location` without touching the rest of
/// the backend.
///
/// # Errors
///
/// Fails if the frame is unreadable, fails its checksum or does not decode.
pub fn read_key_table(backend: &dyn StorageBackend, location: FileLocation) -> StorageResult<KeyTable> {
    let frame = backend.read_at(location.offset, location.length as usize)?;
    let body = catalogdb_codec::unframe(&frame)?;
    let persisted: PersistedKeyTable = catalogdb_codec::decode(body)?;
    Ok(KeyTable::from_persisted(persisted))
}

/// Re-reads every record `table` references in `backend` and checks its
/// checksum and key.
///
/// # Errors
///
/// Only fails if the backend cannot report its size; damaged records are
/// listed in the report.
pub fn verify_records(backend: &dyn StorageBackend, table: &KeyTable) -> StorageResult<VerifyReport> {
    let mut report = VerifyReport {
        size: backend.size()?,
        ..VerifyReport::default()
    };
    let mut buf = Vec::new();
    for (record_type, id, location) in table.entries() {
        report.records += 1;
        if let Err(err) = backend.read_into(location.offset, location.length as usize, &mut buf) {
            report
                .problems
                .push(format!("{record_type}/{id}: unreadable: {err}"));
            continue;
        }
        match decode_record(&buf) {
            Ok(view) if view.record_type == record_type && view.id == id => {
                report.last_transaction_id = report.last_transaction_id.max(view.txid);
            }
            Ok(_) => report
                .problems
                .push(format!("{record_type}/{id}: key mismatch at {}", location.offset)),
            Err(err) => report.problems.push(format!("{record_type}/{id}: {err}")),
        }
    }
    Ok(report)
}

fn frame_length(len: usize) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| StorageError::Corrupted(format!("frame of {len} bytes")))
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("staged", &self.staged.lock().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
