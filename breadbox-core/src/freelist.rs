use std::collections::BTreeSet;

use parking_lot::Mutex;

/// The set of block numbers nothing reachable from the root references.
/// Rebuilt from the disk at mount time, never persisted.
pub(crate) struct FreeList {
    blocks: Mutex<BTreeSet<u32>>,
}

impl FreeList {
    pub(crate) fn new(blocks: BTreeSet<u32>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
        }
    }

    /// Remove and return the lowest free block. Lowest-first keeps
    /// allocation deterministic.
    pub(crate) fn alloc(&self) -> Option<u32> {
        let block = self.blocks.lock().pop_first();
        if let Some(block) = block {
            log::debug!("alloc block {block}");
        }
        block
    }

    pub(crate) fn release(&self, block: u32) {
        log::debug!("free block {block}");
        if !self.blocks.lock().insert(block) {
            log::error!("block {block} freed twice");
        }
    }

    /// Return several blocks under one lock acquisition.
    pub(crate) fn release_all(&self, blocks: impl IntoIterator<Item = u32>) {
        let mut guard = self.blocks.lock();
        for block in blocks {
            log::debug!("free block {block}");
            if !guard.insert(block) {
                log::error!("block {block} freed twice");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> BTreeSet<u32> {
        self.blocks.lock().clone()
    }
}
