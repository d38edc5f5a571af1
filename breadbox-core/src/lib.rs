//! The filesystem engine behind the block file server: fixed-size inodes
//! and directory pages on a raw block device, a per-inode lock table, and
//! the four client-visible operations with crash-safe disk-write ordering.

use std::collections::BTreeSet;
use std::mem::MaybeUninit;
use std::sync::Arc;

use bytemuck::Zeroable;
use lock_api::ArcRwLockUpgradableReadGuard;
use snafu::prelude::*;

use breadbox_traits::{BlockAccess, BlockIndex, Error as BlockError};

mod directory;
mod freelist;
mod inode;
mod locktable;
mod resolve;

use crate::directory::{
    read_dir_block, scan_for_create, scan_for_delete, write_dir_block, DirEntryBlock,
};
use crate::freelist::FreeList;
use crate::inode::{read_inode, write_inode, Inode};
use crate::locktable::LockTable;
use crate::resolve::{resolve, Shared, Upgradable};

pub use crate::directory::DIR_ENTRIES_PER_BLOCK;
pub use crate::inode::InodeKind;

pub const BLOCK_SIZE: usize = 512;
pub const MAX_FILE_BLOCKS: usize = 124;
pub const MAX_FILENAME: usize = 59;
pub const MAX_USERNAME: usize = 10;
pub const MAX_PATHNAME: usize = 128;

/// Block 0 always holds the root directory inode.
pub(crate) const ROOT_BLOCK: u32 = 0;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("file or directory not found"))]
    NotFound,
    #[snafu(display("not permitted for this user"))]
    NotPermitted,
    #[snafu(display("not a file"))]
    NotFile,
    #[snafu(display("not a directory"))]
    NotDirectory,
    #[snafu(display("name already exists"))]
    AlreadyExists,
    #[snafu(display("directory not empty"))]
    NotEmpty,
    #[snafu(display("no block to spare"))]
    OutOfSpace,
    #[snafu(display("block index out of range"))]
    BlockRange,
    #[snafu(display("the root itself cannot be created or deleted"))]
    EmptyPath,
    #[snafu(display("device too small or too large"))]
    DeviceBounds,
    #[snafu(display("block device error {e:?}"))]
    Disk { e: BlockError },
}

impl From<BlockError> for Error {
    fn from(e: BlockError) -> Self {
        Error::Disk { e }
    }
}

pub(crate) struct FilesystemInner<D> {
    device: D,
    free: FreeList,
    locks: LockTable,
}

/// Handle to a mounted filesystem, cheaply cloneable across connection
/// workers.
pub struct Filesystem<D>(Arc<FilesystemInner<D>>);

impl<D> Clone for Filesystem<D> {
    fn clone(&self) -> Self {
        Filesystem(self.0.clone())
    }
}

impl<D: BlockAccess<BLOCK_SIZE>> Filesystem<D> {
    /// Write a fresh root directory inode. Everything else on the device
    /// becomes unreachable and therefore free.
    pub fn format(device: &D) -> Result<(), Error> {
        if device.device_size()?.0 < 1 {
            return Err(Error::DeviceBounds);
        }
        let root = Inode::new(InodeKind::Directory, "");
        write_inode(device, ROOT_BLOCK, &root)
    }

    /// Mount an existing image: walk everything reachable from the root and
    /// take the complement as the free set.
    pub fn mount(device: D) -> Result<Self, Error> {
        let total = device.device_size()?;
        let total = u32::try_from(total.0).map_err(|_| Error::DeviceBounds)?;
        if total < 1 {
            return Err(Error::DeviceBounds);
        }

        let free = scan_reachable(&device, total)?;
        log::info!("mounted: {} of {total} blocks free", free.len());

        Ok(Filesystem(Arc::new(FilesystemInner {
            device,
            free: FreeList::new(free),
            locks: LockTable::default(),
        })))
    }

    /// Read one block of a file the user owns. The shared lock is released
    /// before the caller replies.
    pub fn read_block(
        &self,
        user: &str,
        path: &[String],
        index: u32,
    ) -> Result<[u8; BLOCK_SIZE], Error> {
        let fs = &*self.0;
        let (target_block, _guard) = resolve::<_, Shared>(fs, user, path)?;

        let target = read_inode(&fs.device, target_block)?;
        if !target.is_file() {
            return Err(Error::NotFile);
        }
        if !target.owned_by(user) {
            return Err(Error::NotPermitted);
        }
        if index as usize >= MAX_FILE_BLOCKS || index >= target.size {
            return Err(Error::BlockRange);
        }
        let data_block = target.blocks[index as usize];
        if data_block == 0 {
            return Err(Error::BlockRange);
        }

        read_data(&fs.device, data_block)
    }

    /// Write one block. `index == size` extends the file by a freshly
    /// allocated block, `index < size` overwrites in place, anything larger
    /// is rejected.
    pub fn write_block(
        &self,
        user: &str,
        path: &[String],
        index: u32,
        payload: &[u8; BLOCK_SIZE],
    ) -> Result<(), Error> {
        let fs = &*self.0;
        let (target_block, guard) = resolve::<_, Upgradable>(fs, user, path)?;

        let mut target = read_inode(&fs.device, target_block)?;
        if !target.is_file() {
            return Err(Error::NotFile);
        }
        if !target.owned_by(user) {
            return Err(Error::NotPermitted);
        }
        if index as usize >= MAX_FILE_BLOCKS || index > target.size {
            return Err(Error::BlockRange);
        }

        if index < target.size {
            let data_block = target.blocks[index as usize];
            if data_block == 0 {
                return Err(Error::BlockRange);
            }
            let _exclusive = ArcRwLockUpgradableReadGuard::upgrade(guard);
            write_data(&fs.device, data_block, payload)?;
        } else {
            let Some(new_block) = fs.free.alloc() else {
                return Err(Error::OutOfSpace);
            };
            target.blocks[target.size as usize] = new_block;
            target.size += 1;

            // Data first: until the inode write lands, the new block is
            // unreachable and a crash merely leaks it.
            if let Err(e) = write_data(&fs.device, new_block, payload) {
                fs.free.release(new_block);
                return Err(e);
            }
            let _exclusive = ArcRwLockUpgradableReadGuard::upgrade(guard);
            if let Err(e) = write_inode(&fs.device, target_block, &target) {
                fs.free.release(new_block);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Create a file or directory. The new inode is durable before any
    /// direntry names it, and a new directory page is durable before the
    /// parent inode references it.
    pub fn create(&self, user: &str, path: &[String], kind: InodeKind) -> Result<(), Error> {
        let fs = &*self.0;
        let Some((name, parent_path)) = path.split_last() else {
            return Err(Error::EmptyPath);
        };

        let (parent_block, guard) = resolve::<_, Upgradable>(fs, user, parent_path)?;
        let mut parent = read_inode(&fs.device, parent_block)?;
        if !parent.is_dir() {
            return Err(Error::NotDirectory);
        }
        if !parent.owned_by(user) && !parent.root_owned() {
            return Err(Error::NotPermitted);
        }

        let scan = scan_for_create(&fs.device, &parent, name)?;
        if scan.exists {
            return Err(Error::AlreadyExists);
        }

        let (mut page, blocks_idx, entry_idx, page_block, new_page) = match scan.open_slot {
            Some(slot) => {
                let page_block = parent.blocks[slot.blocks_idx];
                (slot.page, slot.blocks_idx, slot.entry_idx, page_block, false)
            }
            None => {
                if parent.size as usize >= MAX_FILE_BLOCKS {
                    return Err(Error::OutOfSpace);
                }
                let Some(new_dir_page) = fs.free.alloc() else {
                    return Err(Error::OutOfSpace);
                };
                (
                    DirEntryBlock::zeroed(),
                    parent.size as usize,
                    0,
                    new_dir_page,
                    true,
                )
            }
        };

        let Some(new_inode_block) = fs.free.alloc() else {
            if new_page {
                fs.free.release(page_block);
            }
            return Err(Error::OutOfSpace);
        };

        let rollback = |fs: &FilesystemInner<D>| {
            fs.free.release(new_inode_block);
            if new_page {
                fs.free.release(page_block);
            }
        };

        // The child inode must land before any direntry names it.
        let child = Inode::new(kind, user);
        if let Err(e) = write_inode(&fs.device, new_inode_block, &child) {
            rollback(fs);
            return Err(e);
        }

        page.0[entry_idx].set(name, new_inode_block);

        let result = if new_page {
            parent.blocks[blocks_idx] = page_block;
            parent.size += 1;
            // The page sits at a block nothing on disk references yet, so
            // it may be written before the parent lock is promoted.
            if let Err(e) = write_dir_block(&fs.device, page_block, &page) {
                rollback(fs);
                return Err(e);
            }
            let _exclusive = ArcRwLockUpgradableReadGuard::upgrade(guard);
            write_inode(&fs.device, parent_block, &parent)
        } else {
            let _exclusive = ArcRwLockUpgradableReadGuard::upgrade(guard);
            write_dir_block(&fs.device, page_block, &page)
        };
        if let Err(e) = result {
            rollback(fs);
            return Err(e);
        }

        Ok(())
    }

    /// Delete a file or an empty directory. The parent stops referencing the
    /// target on disk before any of the target's blocks return to the free
    /// set, so a crash in between leaks blocks but never double-allocates.
    pub fn delete(&self, user: &str, path: &[String]) -> Result<(), Error> {
        let fs = &*self.0;
        let Some((name, parent_path)) = path.split_last() else {
            return Err(Error::EmptyPath);
        };

        let (parent_block, parent_guard) = resolve::<_, Upgradable>(fs, user, parent_path)?;
        let mut parent = read_inode(&fs.device, parent_block)?;
        if !parent.is_dir() {
            return Err(Error::NotDirectory);
        }
        if !parent.owned_by(user) && !parent.root_owned() {
            return Err(Error::NotPermitted);
        }

        let Some(mut found) = scan_for_delete(&fs.device, &parent, name)? else {
            return Err(Error::NotFound);
        };

        // Promote the parent before taking the target lock. Promoting while
        // a descendant lock is held can cycle with a walker that still holds
        // the parent shared and wants that same descendant.
        let parent_exclusive = ArcRwLockUpgradableReadGuard::upgrade(parent_guard);
        let target_lock = fs.locks.get(found.inode_block);
        let target_guard = target_lock.upgradable_read_arc();

        let target = read_inode(&fs.device, found.inode_block)?;
        if !target.owned_by(user) {
            return Err(Error::NotPermitted);
        }
        if target.is_dir() && target.size > 0 {
            return Err(Error::NotEmpty);
        }

        if !found.only_entry {
            found.page.0[found.entry_idx].clear();
            write_dir_block(&fs.device, found.page_block, &found.page)?;
            drop(parent_exclusive);
        } else {
            // The entry was alone on its page: drop the whole page and close
            // the gap in the parent's block list.
            for i in found.blocks_idx..parent.size as usize - 1 {
                parent.blocks[i] = parent.blocks[i + 1];
            }
            parent.size -= 1;
            parent.blocks[parent.size as usize] = 0;
            write_inode(&fs.device, parent_block, &parent)?;
            drop(parent_exclusive);
            fs.free.release(found.page_block);
        }

        // The direntry is durably gone; nobody can re-resolve the target.
        let _target_exclusive = ArcRwLockUpgradableReadGuard::upgrade(target_guard);
        let freed = target
            .used_blocks()
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .chain(std::iter::once(found.inode_block));
        fs.free.release_all(freed);

        Ok(())
    }
}

fn read_data<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    block: u32,
) -> Result<[u8; BLOCK_SIZE], Error> {
    let mut data: MaybeUninit<[u8; BLOCK_SIZE]> = MaybeUninit::uninit();
    device.read(BlockIndex(block.into()), &mut data)?;

    Ok(unsafe { data.assume_init() })
}

fn write_data<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    block: u32,
    data: &[u8; BLOCK_SIZE],
) -> Result<(), Error> {
    device.write(BlockIndex(block.into()), data)?;

    Ok(())
}

/// Depth-first walk from the root, removing every reachable inode,
/// directory page, and data block from the candidate free set. Each block
/// leaves the set at most once, so the walk terminates on any image that
/// honours the exactly-once reachability invariant.
fn scan_reachable<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    total: u32,
) -> Result<BTreeSet<u32>, Error> {
    let mut free: BTreeSet<u32> = (0..total).collect();
    let mut stack = vec![ROOT_BLOCK];

    while let Some(block) = stack.pop() {
        free.remove(&block);
        let inode = read_inode(device, block)?;

        if inode.is_dir() {
            for &page_block in inode.used_blocks() {
                if page_block == 0 {
                    continue;
                }
                free.remove(&page_block);
                let page = read_dir_block(device, page_block)?;
                for entry in page.iter() {
                    if !entry.is_empty() {
                        stack.push(entry.inode_block());
                    }
                }
            }
        } else if inode.is_file() {
            for &data_block in inode.used_blocks() {
                if data_block != 0 {
                    free.remove(&data_block);
                }
            }
        }
    }

    Ok(free)
}
