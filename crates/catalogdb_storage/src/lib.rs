//! # CatalogDB Storage
//!
//! Byte backends and the keyed record store underneath CatalogDB.
//!
//! Backends are **opaque byte stores**: they append, read and truncate,
//! nothing more. The [`RecordStore`] layers keyed, checksummed records on
//! top of one backend and describes its live contents with immutable
//! [`KeyTable`] snapshots.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral catalogs
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! Backends are handed out by name through a [`BackendProvider`]
//! ([`DirectoryProvider`] or [`MemoryProvider`]).
//!
//! ## Example
//!
//! ```rust
//! use catalogdb_storage::{InMemoryBackend, RecordKey, RecordStore, RecordType};
//!
//! let (store, table) = RecordStore::open(Box::new(InMemoryBackend::new()), None).unwrap();
//! let key = RecordKey::numeric(RecordType(1), 7);
//! store.put(1, key.clone(), b"espresso machine".to_vec()).unwrap();
//! let outcome = store.flush(1, &table).unwrap();
//! let body = store.get(&outcome.key_table, &key).unwrap();
//! assert_eq!(body.as_deref(), Some(&b"espresso machine"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod key_table;
mod memory;
mod pool;
mod provider;
mod record;
mod store;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use key_table::KeyTable;
pub use memory::InMemoryBackend;
pub use pool::{BufferPool, PooledBuffer};
pub use provider::{BackendProvider, DirectoryProvider, MemoryProvider};
pub use record::{FileLocation, KeyId, RecordKey, RecordType};
pub use store::{read_key_table, verify_records, FlushOutcome, RecordStore, VerifyReport};
