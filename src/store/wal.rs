//! Write-ahead overlay used to keep snapshots non-blocking.
//!
//! While the primary map is being serialized, writes are absorbed by a
//! second map of the same shape (the overlay) so that no record mutates
//! under the encoder. The [`SnapshotPhase`] state machine decides where a
//! write lands; only the persistence driver advances it.
//!
//! Lock layering, outermost first: snapshot phase (shared for the duration
//! of every write, exclusive for transitions), map lock (overlay before
//! primary when both are needed), record mutex innermost.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::store::record::ImpactRecord;

/// Shared handle to one IP's record. Cloning the handle is cheap; the
/// record contents stay behind their own mutex.
pub(crate) type RecordHandle = Arc<Mutex<ImpactRecord>>;

/// Snapshot coordination state.
///
/// Transitions run strictly `Idle -> Writing -> Draining -> Idle` and are
/// driven only by the persistence driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SnapshotPhase {
    /// No snapshot in progress; writes go to the primary map.
    Idle,
    /// The encoder is iterating the primary; writes are shadowed into the
    /// overlay, leaving the primary untouched.
    Writing,
    /// The snapshot is on disk; overlay entries are moving back into the
    /// primary. Writes try the overlay first, then the primary.
    Draining,
}

/// A map from IPv4 (as u32) to record handles behind a coarse lock.
///
/// Both the primary map and the overlay are this type. Records, once
/// inserted, are never removed or relocated except by the overlay drain,
/// which transfers the handle itself.
#[derive(Debug, Default)]
pub(crate) struct RecordMap {
    inner: RwLock<HashMap<u32, RecordHandle>>,
}

impl RecordMap {
    /// Wraps decoded snapshot records into live handles.
    pub fn from_records(records: HashMap<u32, ImpactRecord>) -> Self {
        let inner = records
            .into_iter()
            .map(|(ip, rec)| (ip, Arc::new(Mutex::new(rec))))
            .collect();
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Clones the handle for `ip`, holding the shared map lock only long
    /// enough to find it.
    pub fn get(&self, ip: u32) -> Option<RecordHandle> {
        self.read().get(&ip).cloned()
    }

    /// Returns the handle for `ip`, inserting a fresh zero record first if
    /// the address was never seen.
    pub fn get_or_insert(&self, ip: u32) -> RecordHandle {
        let mut map = self.write();
        Arc::clone(map.entry(ip).or_default())
    }

    pub fn keys(&self) -> Vec<u32> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HashMap<u32, RecordHandle>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HashMap<u32, RecordHandle>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Locks a record, recovering the guard when a previous holder panicked.
///
/// Record contents are plain saturating counters with no invariant that
/// poisoning would protect, and the store must keep serving the IP for the
/// life of the process.
pub fn lock_record(handle: &RecordHandle) -> MutexGuard<'_, ImpactRecord> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
