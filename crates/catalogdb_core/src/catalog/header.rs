//! The durable catalog header.
//!
//! Headers are appended to `catalog.hdr` as checksummed frames; the last
//! valid frame is the current header. Writing a header is what publishes
//! the record store flushes it references.

use crate::collection::CollectionHeader;
use crate::error::{CoreError, CoreResult};
use crate::types::CatalogState;
use catalogdb_codec::{CodecError, FRAME_HEADER_SIZE};
use catalogdb_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the header log inside a catalog directory.
pub const HEADER_FILE: &str = "catalog.hdr";

/// Current header format version.
pub const FORMAT_VERSION: u32 = 1;

/// Everything needed to reopen a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogHeader {
    /// Format version of the header.
    pub format_version: u32,
    /// Catalog name.
    pub name: String,
    /// Lifecycle state.
    pub state: CatalogState,
    /// Catalog version at the time of writing.
    pub version: u64,
    /// Last transaction whose changes are in this header.
    pub last_committed_transaction_id: u64,
    /// Collection id high-water mark.
    pub last_collection_id: u32,
    /// One header per entity type.
    pub collections: BTreeMap<String, CollectionHeader>,
}

impl CatalogHeader {
    /// Header of a catalog that was just created.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            name: name.into(),
            state: CatalogState::WarmingUp,
            version: 1,
            last_committed_transaction_id: 0,
            last_collection_id: 0,
            collections: BTreeMap::new(),
        }
    }

    /// Reads the current header from a header log without modifying it.
    ///
    /// A torn trailing frame is ignored; `None` for an empty log.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` on a corrupted frame or an unknown format version.
    pub fn read(backend: &dyn StorageBackend) -> CoreResult<Option<Self>> {
        Ok(scan(&read_all(backend)?)?.0)
    }

    /// Highest transaction id recorded anywhere in the header.
    #[must_use]
    pub fn last_transaction_id(&self) -> u64 {
        self.collections
            .values()
            .map(|collection| collection.last_transaction_id)
            .fold(self.last_committed_transaction_id, u64::max)
    }
}

fn read_all(backend: &dyn StorageBackend) -> CoreResult<Vec<u8>> {
    let size = usize::try_from(backend.size()?)
        .map_err(|_| CoreError::invalid_format("catalog header log is too large"))?;
    Ok(backend.read_at(0, size)?)
}

/// Returns the last header in `data` and the length of its valid prefix.
fn scan(data: &[u8]) -> CoreResult<(Option<CatalogHeader>, usize)> {
    let mut offset = 0;
    let mut last = None;
    while offset < data.len() {
        let rest = &data[offset..];
        let complete = rest.len() >= FRAME_HEADER_SIZE
            && catalogdb_codec::frame_len(rest).is_ok_and(|len| len <= rest.len());
        if !complete {
            break;
        }
        let len = catalogdb_codec::frame_len(rest)?;
        let payload = catalogdb_codec::unframe(&rest[..len]).map_err(|err| match err {
            CodecError::ChecksumMismatch { .. } => CoreError::invalid_format(format!(
                "catalog header at offset {offset} is corrupted: {err}"
            )),
            other => other.into(),
        })?;
        last = Some(catalogdb_codec::decode::<CatalogHeader>(payload)?);
        offset += len;
    }
    if let Some(header) = &last {
        if header.format_version != FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported catalog header format {}",
                header.format_version
            )));
        }
    }
    Ok((last, offset))
}

/// Append-only log of [`CatalogHeader`] frames.
pub(crate) struct HeaderStore {
    backend: Box<dyn StorageBackend>,
    sync: bool,
    writes: u64,
}

impl fmt::Debug for HeaderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderStore")
            .field("sync", &self.sync)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

impl HeaderStore {
    /// Opens the log and returns the last valid header in it.
    ///
    /// A torn frame at the end of the log is cut away. A complete frame
    /// with a bad checksum is an error.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        sync: bool,
    ) -> CoreResult<(Self, Option<CatalogHeader>)> {
        let data = read_all(backend.as_ref())?;
        let (last, valid) = scan(&data)?;
        if valid < data.len() {
            tracing::warn!(
                discarded = data.len() - valid,
                "truncating torn catalog header"
            );
            backend.truncate(valid as u64)?;
        }
        Ok((
            Self {
                backend,
                sync,
                writes: 0,
            },
            last,
        ))
    }

    fn append_frame(&mut self, frame: &[u8]) -> CoreResult<()> {
        self.backend.append(frame)?;
        self.backend.flush()?;
        if self.sync {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Appends `header`, making it the current one.
    ///
    /// A failed append is cut back off the log.
    pub(crate) fn write(&mut self, header: &CatalogHeader) -> CoreResult<()> {
        let payload = catalogdb_codec::encode(header)?;
        let frame = catalogdb_codec::frame(&payload);
        let end = self.backend.size()?;
        if let Err(err) = self.append_frame(&frame) {
            if let Err(cut) = self.backend.truncate(end) {
                tracing::warn!(error = %cut, "failed to cut back catalog header log");
            }
            return Err(err);
        }
        self.writes += 1;
        tracing::debug!(
            catalog = %header.name,
            version = header.version,
            txn = header.last_committed_transaction_id,
            collections = header.collections.len(),
            "catalog header written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CollectionId;
    use catalogdb_storage::InMemoryBackend;

    fn create_header(version: u64) -> CatalogHeader {
        let mut header = CatalogHeader::new("shop");
        header.version = version;
        header.collections.insert(
            "product".into(),
            CollectionHeader::empty("product", CollectionId::new(1)),
        );
        header
    }

    #[test]
    fn empty_log_has_no_header() {
        let (_, header) = HeaderStore::open(Box::new(InMemoryBackend::new()), false).unwrap();
        assert!(header.is_none());
    }

    #[test]
    fn last_header_wins() {
        let backend = InMemoryBackend::new();
        let (mut store, _) = HeaderStore::open(Box::new(backend.clone()), false).unwrap();
        store.write(&create_header(1)).unwrap();
        store.write(&create_header(2)).unwrap();

        let (_, header) = HeaderStore::open(Box::new(backend), false).unwrap();
        assert_eq!(header.unwrap().version, 2);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        let (mut store, _) = HeaderStore::open(Box::new(backend.clone()), false).unwrap();
        store.write(&create_header(1)).unwrap();
        let intact = backend.data().len();
        store.write(&create_header(2)).unwrap();
        backend.data_mut().truncate(intact + 5);

        let (_, header) = HeaderStore::open(Box::new(backend.clone()), false).unwrap();
        assert_eq!(header.unwrap().version, 1);
        assert_eq!(backend.data().len(), intact);
    }

    #[test]
    fn read_leaves_a_torn_tail_in_place() {
        let backend = InMemoryBackend::new();
        let (mut store, _) = HeaderStore::open(Box::new(backend.clone()), false).unwrap();
        store.write(&create_header(1)).unwrap();
        backend.data_mut().extend_from_slice(&[1, 2, 3]);
        let len = backend.data().len();

        let header = CatalogHeader::read(&backend).unwrap();
        assert_eq!(header.unwrap().version, 1);
        assert_eq!(backend.data().len(), len);
    }

    #[test]
    fn corrupted_frame_is_an_error() {
        let backend = InMemoryBackend::new();
        let (mut store, _) = HeaderStore::open(Box::new(backend.clone()), false).unwrap();
        store.write(&create_header(1)).unwrap();
        backend.data_mut()[6] ^= 0xFF;

        let err = HeaderStore::open(Box::new(backend), false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn last_transaction_id_covers_collections() {
        let mut header = create_header(1);
        header.last_committed_transaction_id = 4;
        if let Some(collection) = header.collections.get_mut("product") {
            collection.last_transaction_id = 9;
        }
        assert_eq!(header.last_transaction_id(), 9);
    }
}
