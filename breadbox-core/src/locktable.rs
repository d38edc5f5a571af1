use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

/// Strong handle to an inode's reader/writer lock. The guards below hold a
/// clone, so the lock lives exactly as long as somebody is using it.
pub(crate) type InodeLock = Arc<RwLock<()>>;

pub(crate) type SharedGuard = lock_api::ArcRwLockReadGuard<parking_lot::RawRwLock, ()>;
pub(crate) type UpgradeGuard = lock_api::ArcRwLockUpgradableReadGuard<parking_lot::RawRwLock, ()>;

/// Per-inode locks, created on first use. The table keeps only weak
/// references; a stale entry is replaced on the next lookup.
#[derive(Default)]
pub(crate) struct LockTable {
    entries: Mutex<HashMap<u32, Weak<RwLock<()>>>>,
}

impl LockTable {
    /// The table mutex is a leaf: nothing else is acquired while it is held.
    pub(crate) fn get(&self, block: u32) -> InodeLock {
        let mut entries = self.entries.lock();
        let weak = entries.entry(block).or_default();
        if let Some(lock) = weak.upgrade() {
            return lock;
        }
        let lock = Arc::new(RwLock::new(()));
        *weak = Arc::downgrade(&lock);
        lock
    }
}
