//! Distributed WAL checkpoint trigger.
//!
//! The engine invokes the commit hook after every successful write
//! transaction with the post-commit WAL frame count. Once the WAL crosses
//! the configured threshold, the hook inspects the WAL-index header and
//! attempts a cluster-coordinated checkpoint, but only when no local
//! reader is trailing the log: a trailing reader would be starved by
//! truncation, so the checkpoint is postponed until the next commit. This
//! mirrors the engine's own passive-checkpoint admission rule, lifted to
//! the cluster layer.
//!
//! The hook runs on the engine's commit path. It takes no locks of its
//! own beyond the probe locks below, treats BUSY as an expected outcome,
//! and always reports success to the engine.

use std::ffi::c_char;
use std::ffi::c_int;
use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use larch_cluster::Cluster;
use larch_core::constants::WAL_READER_SLOTS;
use rusqlite::Connection;
use rusqlite::ffi;
use tracing::debug;
use tracing::warn;

/// Offset of `mxFrame` in the WAL-index header.
const MX_FRAME_OFFSET: usize = 16;

/// Offset of the reader-mark array: two header copies of 48 bytes each,
/// then the backfill counter.
const READ_MARKS_OFFSET: usize = 100;

/// Size of the first shared-memory region, which holds the WAL index.
const WAL_INDEX_REGION_SIZE: c_int = 32_768;

/// Reader locks follow the write, checkpoint, and recover locks in the
/// shared-memory lock table; reader slot `i` is guarded by lock `3 + i`.
const WAL_READ_LOCK_BASE: usize = 3;

/// Snapshot of the WAL-index fields the admission rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalIndexHeader {
    /// Highest frame committed to the log.
    pub mx_frame: u32,
    /// Last frame each reader slot has observed.
    pub read_marks: [u32; WAL_READER_SLOTS],
}

/// Outcome of probing a reader slot's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockProbe {
    /// The slot was idle; the probe lock was taken and released.
    Idle,
    /// An active reader holds the slot.
    Busy,
}

/// Access to the live WAL index of one database.
///
/// The production implementation reads the engine's shared-memory region;
/// tests substitute a fake to exercise the admission rule.
pub trait WalIndex {
    /// Read the current header fields.
    fn header(&mut self) -> WalIndexHeader;

    /// Probe the reader slot's exclusive lock, releasing it immediately
    /// when acquired.
    fn probe_reader(&mut self, slot: usize) -> LockProbe;
}

/// The checkpoint admission rule.
///
/// A reader slot whose mark trails `mxFrame` may belong to an active read
/// transaction; a BUSY probe on any such slot postpones the checkpoint.
/// Slot 0 belongs to readers of the fully-backfilled database image and
/// never blocks truncation.
pub fn readers_idle(index: &mut dyn WalIndex) -> bool {
    let header = index.header();
    for slot in 1..WAL_READER_SLOTS {
        if header.mx_frame > header.read_marks[slot]
            && index.probe_reader(slot) == LockProbe::Busy
        {
            return false;
        }
    }
    true
}

/// WAL index of a live connection, read through the VFS shared-memory
/// interface.
struct ShmWalIndex {
    file: *mut ffi::sqlite3_file,
    region: *const u8,
}

impl ShmWalIndex {
    /// Map the first shared-memory region of the connection's main
    /// database. Returns `None` when the database has no WAL index yet.
    unsafe fn map(db: *mut ffi::sqlite3) -> Option<Self> {
        unsafe {
            let mut file: *mut ffi::sqlite3_file = ptr::null_mut();
            let rc = ffi::sqlite3_file_control(
                db,
                c"main".as_ptr(),
                ffi::SQLITE_FCNTL_FILE_POINTER,
                &mut file as *mut *mut ffi::sqlite3_file as *mut c_void,
            );
            if rc != ffi::SQLITE_OK || file.is_null() || (*file).pMethods.is_null() {
                return None;
            }

            let shm_map = (*(*file).pMethods).xShmMap?;
            let mut region: *mut c_void = ptr::null_mut();
            let rc = shm_map(file, 0, WAL_INDEX_REGION_SIZE, 0, &mut region);
            if rc != ffi::SQLITE_OK || region.is_null() {
                return None;
            }

            Some(Self { file, region: region as *const u8 })
        }
    }

    unsafe fn read_u32(&self, offset: usize) -> u32 {
        // The region is shared memory mutated by other connections; go
        // through a volatile read of the aligned word.
        unsafe { ptr::read_volatile(self.region.add(offset) as *const u32) }
    }
}

impl WalIndex for ShmWalIndex {
    fn header(&mut self) -> WalIndexHeader {
        let mut read_marks = [0_u32; WAL_READER_SLOTS];
        let mx_frame = unsafe { self.read_u32(MX_FRAME_OFFSET) };
        for (slot, mark) in read_marks.iter_mut().enumerate() {
            *mark = unsafe { self.read_u32(READ_MARKS_OFFSET + 4 * slot) };
        }
        WalIndexHeader { mx_frame, read_marks }
    }

    fn probe_reader(&mut self, slot: usize) -> LockProbe {
        let Some(shm_lock) = (unsafe { (*(*self.file).pMethods).xShmLock }) else {
            return LockProbe::Idle;
        };

        let lock = (WAL_READ_LOCK_BASE + slot) as c_int;
        let rc = unsafe {
            shm_lock(self.file, lock, 1, ffi::SQLITE_SHM_LOCK | ffi::SQLITE_SHM_EXCLUSIVE)
        };
        if rc == ffi::SQLITE_BUSY {
            return LockProbe::Busy;
        }

        unsafe {
            shm_lock(self.file, lock, 1, ffi::SQLITE_SHM_UNLOCK | ffi::SQLITE_SHM_EXCLUSIVE);
        }
        LockProbe::Idle
    }
}

/// State handed to the engine's commit hook.
struct HookState {
    threshold: u32,
    cluster: Arc<dyn Cluster>,
}

/// Registration handle for the commit hook; dropping it unregisters the
/// hook and releases its state.
pub(crate) struct CheckpointHook {
    db: *mut ffi::sqlite3,
    state: *mut HookState,
}

unsafe impl Send for CheckpointHook {}

impl CheckpointHook {
    /// Install the distributed checkpoint hook on a connection.
    ///
    /// The connection's autocheckpoint must already be disabled: the
    /// engine's autocheckpoint claims the same hook slot.
    pub(crate) fn install(
        conn: &Connection,
        threshold: u32,
        cluster: Arc<dyn Cluster>,
    ) -> Self {
        let state = Box::into_raw(Box::new(HookState { threshold, cluster }));
        let db = unsafe { conn.handle() };
        unsafe {
            ffi::sqlite3_wal_hook(db, Some(wal_hook), state as *mut c_void);
        }
        Self { db, state }
    }
}

impl Drop for CheckpointHook {
    fn drop(&mut self) {
        unsafe {
            ffi::sqlite3_wal_hook(self.db, None, ptr::null_mut());
            drop(Box::from_raw(self.state));
        }
    }
}

impl std::fmt::Debug for CheckpointHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointHook").finish_non_exhaustive()
    }
}

/// The commit hook registered with the engine.
unsafe extern "C" fn wal_hook(
    arg: *mut c_void,
    db: *mut ffi::sqlite3,
    _db_name: *const c_char,
    frames: c_int,
) -> c_int {
    let state = unsafe { &*(arg as *mut HookState) };
    maybe_checkpoint(state, db, frames.max(0) as u32);
    ffi::SQLITE_OK
}

/// Steps 1-4 of the checkpoint trigger protocol.
fn maybe_checkpoint(state: &HookState, db: *mut ffi::sqlite3, frames: u32) {
    if frames < state.threshold {
        return;
    }

    let Some(mut index) = (unsafe { ShmWalIndex::map(db) }) else {
        return;
    };
    if !readers_idle(&mut index) {
        debug!(frames, "checkpoint postponed: active reader trailing the log");
        return;
    }

    let conn = match unsafe { Connection::from_handle(db) } {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "checkpoint skipped: cannot borrow connection");
            return;
        }
    };

    // The return value must not disturb the commit path, but persistent
    // failures should still be visible to operators.
    if let Err(e) = state.cluster.checkpoint(&conn) {
        warn!(error = %e, frames, "cluster checkpoint failed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct FakeWalIndex {
        header: WalIndexHeader,
        busy: HashSet<usize>,
        probed: Vec<usize>,
    }

    impl FakeWalIndex {
        fn new(mx_frame: u32, read_marks: [u32; WAL_READER_SLOTS]) -> Self {
            Self {
                header: WalIndexHeader { mx_frame, read_marks },
                busy: HashSet::new(),
                probed: Vec::new(),
            }
        }

        fn with_busy(mut self, slot: usize) -> Self {
            self.busy.insert(slot);
            self
        }
    }

    impl WalIndex for FakeWalIndex {
        fn header(&mut self) -> WalIndexHeader {
            self.header
        }

        fn probe_reader(&mut self, slot: usize) -> LockProbe {
            self.probed.push(slot);
            if self.busy.contains(&slot) { LockProbe::Busy } else { LockProbe::Idle }
        }
    }

    #[test]
    fn test_all_readers_caught_up_is_idle() {
        let mut index = FakeWalIndex::new(50, [0, 50, 50, 50, 50]);
        assert!(readers_idle(&mut index));
        // Caught-up slots need no probe at all.
        assert!(index.probed.is_empty());
    }

    #[test]
    fn test_trailing_unlocked_reader_is_idle() {
        let mut index = FakeWalIndex::new(50, [0, 10, 50, 50, 50]);
        assert!(readers_idle(&mut index));
        assert_eq!(index.probed, vec![1]);
    }

    #[test]
    fn test_trailing_locked_reader_postpones() {
        let mut index = FakeWalIndex::new(50, [0, 10, 50, 50, 50]).with_busy(1);
        assert!(!readers_idle(&mut index));
    }

    #[test]
    fn test_probe_stops_at_first_busy_slot() {
        let mut index = FakeWalIndex::new(50, [0, 10, 20, 30, 40]).with_busy(2);
        assert!(!readers_idle(&mut index));
        assert_eq!(index.probed, vec![1, 2]);
    }

    #[test]
    fn test_slot_zero_never_blocks() {
        // Slot 0 trails but belongs to backfilled-image readers.
        let mut index = FakeWalIndex::new(50, [0, 50, 50, 50, 50]).with_busy(0);
        assert!(readers_idle(&mut index));
        assert!(index.probed.is_empty());
    }
}
