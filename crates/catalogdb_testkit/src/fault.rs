//! Fault injection for commit atomicity testing.
//!
//! [`FaultyProvider`] wraps a [`MemoryProvider`] and fails writes once a
//! [`FaultPlan`] is armed. The files stay in the inner provider, so a
//! database can be reopened from [`FaultyProvider::files`] to check what
//! actually reached storage.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catalogdb_testkit::fault::FaultyProvider;
//!
//! let provider = FaultyProvider::new();
//! let db = Database::open_with_provider(Arc::new(provider.clone()), "shop", Config::default())?;
//! provider.plan().only_in(HEADER_FILE);
//! provider.plan().fail_after_appends(0);
//! assert!(session.upsert_entity(&mutation).is_err());
//! ```

use catalogdb_storage::{
    BackendProvider, MemoryProvider, StorageBackend, StorageError, StorageResult,
};
use parking_lot::RwLock;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const DISARMED: usize = usize::MAX;

/// When injected faults fire. Shared by a provider and every backend it
/// hands out.
#[derive(Debug)]
pub struct FaultPlan {
    appends_left: AtomicUsize,
    fail_on_sync: AtomicBool,
    torn_writes: AtomicBool,
    target: RwLock<Option<String>>,
    faults: AtomicUsize,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            appends_left: AtomicUsize::new(DISARMED),
            fail_on_sync: AtomicBool::new(false),
            torn_writes: AtomicBool::new(false),
            target: RwLock::new(None),
            faults: AtomicUsize::new(0),
        }
    }
}

impl FaultPlan {
    /// Lets `appends` more appends through, then fails every later one.
    pub fn fail_after_appends(&self, appends: usize) {
        self.appends_left.store(appends, Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Sets whether a failing append writes half of its bytes first.
    pub fn set_torn_writes(&self, torn: bool) {
        self.torn_writes.store(torn, Ordering::SeqCst);
    }

    /// Restricts faults, and the append budget, to the file `name`.
    pub fn only_in(&self, name: &str) {
        *self.target.write() = Some(name.to_owned());
    }

    /// Disarms every fault and clears the file restriction.
    pub fn reset(&self) {
        self.appends_left.store(DISARMED, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
        self.torn_writes.store(false, Ordering::SeqCst);
        *self.target.write() = None;
    }

    fn targets(&self, name: &str) -> bool {
        self.target.read().as_deref().map_or(true, |target| target == name)
    }

    /// Number of faults injected so far.
    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    /// Consumes one append to `name` from the budget; false once it is
    /// exhausted.
    fn admit_append(&self, name: &str) -> bool {
        if !self.targets(name) {
            return true;
        }
        let admitted = self
            .appends_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                DISARMED => Some(DISARMED),
                0 => None,
                left => Some(left - 1),
            })
            .is_ok();
        if !admitted {
            self.faults.fetch_add(1, Ordering::SeqCst);
        }
        admitted
    }

    fn admit_sync(&self, name: &str) -> bool {
        let fail = self.fail_on_sync.load(Ordering::SeqCst) && self.targets(name);
        if fail {
            self.faults.fetch_add(1, Ordering::SeqCst);
        }
        !fail
    }
}

fn injected(operation: &str) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("injected fault during {operation}"),
    ))
}

/// A storage backend wrapper that fails according to a [`FaultPlan`].
pub struct FaultyBackend {
    name: String,
    inner: Box<dyn StorageBackend>,
    plan: Arc<FaultPlan>,
}

impl FaultyBackend {
    /// Wraps `inner`, the file called `name`.
    pub fn new(name: impl Into<String>, inner: Box<dyn StorageBackend>, plan: Arc<FaultPlan>) -> Self {
        Self {
            name: name.into(),
            inner,
            plan,
        }
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.plan.admit_append(&self.name) {
            return self.inner.append(data);
        }
        if self.plan.torn_writes.load(Ordering::SeqCst) && data.len() > 1 {
            self.inner.append(&data[..data.len() / 2])?;
        }
        Err(injected("append"))
    }

    fn flush(&mut self) -> StorageResult<()> {
        if !self.plan.admit_sync(&self.name) {
            return Err(injected("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if !self.plan.admit_sync(&self.name) {
            return Err(injected("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// A [`BackendProvider`] whose backends fail on demand.
///
/// Clones share the plan and the files.
#[derive(Clone, Default)]
pub struct FaultyProvider {
    files: MemoryProvider,
    plan: Arc<FaultPlan>,
}

impl FaultyProvider {
    /// Creates a provider with no faults armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// The fault plan shared by every backend of this provider.
    pub fn plan(&self) -> &FaultPlan {
        &self.plan
    }

    /// The underlying files, without fault injection.
    pub fn files(&self) -> &MemoryProvider {
        &self.files
    }
}

impl fmt::Debug for FaultyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyProvider")
            .field("files", &self.files.file_names())
            .field("faults", &self.plan.faults())
            .finish()
    }
}

impl BackendProvider for FaultyProvider {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FaultyBackend::new(
            name,
            self.files.open(name)?,
            Arc::clone(&self.plan),
        )))
    }

    fn exists(&self, name: &str) -> bool {
        self.files.exists(name)
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.files.remove(name)
    }
}
