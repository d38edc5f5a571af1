use std::mem::MaybeUninit;

use breadbox_traits::{BlockAccess, BlockIndex};

use crate::inode::Inode;
use crate::{Error, BLOCK_SIZE, MAX_FILENAME};

pub(crate) const DIRENTRY_SIZE: usize = std::mem::size_of::<DiskDirEntry>();
pub const DIR_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRENTRY_SIZE;

/// One directory slot. `inode_block == 0` marks the slot unused; block 0 is
/// the root inode and can never be somebody's child.
#[derive(bytemuck::Zeroable, bytemuck::Pod, Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct DiskDirEntry {
    name: [u8; MAX_FILENAME + 1],
    inode_block: u32,
}

impl DiskDirEntry {
    pub(crate) fn is_empty(&self) -> bool {
        self.inode_block == 0
    }

    pub(crate) fn name(&self) -> &[u8] {
        let zero = self
            .name
            .iter()
            .position(|c| *c == 0)
            .unwrap_or(self.name.len());

        &self.name[..zero]
    }

    pub(crate) fn inode_block(&self) -> u32 {
        self.inode_block
    }

    pub(crate) fn set(&mut self, name: &str, inode_block: u32) {
        self.name = [0; MAX_FILENAME + 1];
        let len = name.len().min(MAX_FILENAME);
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        self.inode_block = inode_block;
    }

    pub(crate) fn clear(&mut self) {
        self.inode_block = 0;
        self.name[0] = 0;
    }
}

/// A directory page: a full block of direntries.
#[derive(bytemuck::Zeroable, bytemuck::Pod, bytemuck::TransparentWrapper, Clone, Copy)]
#[repr(transparent)]
pub(crate) struct DirEntryBlock(pub(crate) [DiskDirEntry; DIR_ENTRIES_PER_BLOCK]);

impl DirEntryBlock {
    pub(crate) fn iter(&self) -> impl Iterator<Item = &DiskDirEntry> {
        self.0.iter()
    }
}

pub(crate) fn read_dir_block<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    block: u32,
) -> Result<DirEntryBlock, Error> {
    let mut page: MaybeUninit<DirEntryBlock> = MaybeUninit::uninit();
    let bytes: &mut MaybeUninit<[u8; BLOCK_SIZE]> = unsafe { std::mem::transmute(&mut page) };
    device.read(BlockIndex(block.into()), bytes)?;

    Ok(unsafe { page.assume_init() })
}

pub(crate) fn write_dir_block<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    block: u32,
    page: &DirEntryBlock,
) -> Result<(), Error> {
    let bytes = bytemuck::bytes_of(page).try_into().unwrap();
    device.write(BlockIndex(block.into()), bytes)?;

    Ok(())
}

/// Look a name up in a directory. Returns the child's inode block.
pub(crate) fn find_child<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    dir: &Inode,
    name: &str,
) -> Result<Option<u32>, Error> {
    for &page_block in dir.used_blocks() {
        let page = read_dir_block(device, page_block)?;
        for entry in page.iter() {
            if !entry.is_empty() && entry.name() == name.as_bytes() {
                return Ok(Some(entry.inode_block()));
            }
        }
    }

    Ok(None)
}

/// Where a new direntry will go: the page snapshot plus its position in the
/// parent's `blocks` array.
pub(crate) struct OpenSlot {
    pub(crate) blocks_idx: usize,
    pub(crate) entry_idx: usize,
    pub(crate) page: DirEntryBlock,
}

pub(crate) struct CreateScan {
    pub(crate) exists: bool,
    pub(crate) open_slot: Option<OpenSlot>,
}

/// One pass over the directory: detect a name collision and remember the
/// first empty slot seen. No empty slot anywhere means the caller has to
/// allocate a fresh page.
pub(crate) fn scan_for_create<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    parent: &Inode,
    name: &str,
) -> Result<CreateScan, Error> {
    let mut open_slot = None;

    for (i, &page_block) in parent.used_blocks().iter().enumerate() {
        let page = read_dir_block(device, page_block)?;
        for (j, entry) in page.iter().enumerate() {
            if entry.is_empty() {
                if open_slot.is_none() {
                    open_slot = Some(OpenSlot {
                        blocks_idx: i,
                        entry_idx: j,
                        page,
                    });
                }
                continue;
            }
            if entry.name() == name.as_bytes() {
                return Ok(CreateScan {
                    exists: true,
                    open_slot: None,
                });
            }
        }
    }

    Ok(CreateScan {
        exists: false,
        open_slot,
    })
}

/// Everything delete needs to know about the entry it will remove.
/// `only_entry` means the page holds nothing else and goes away with the
/// entry.
pub(crate) struct DeleteLocator {
    pub(crate) inode_block: u32,
    pub(crate) blocks_idx: usize,
    pub(crate) entry_idx: usize,
    pub(crate) page_block: u32,
    pub(crate) page: DirEntryBlock,
    pub(crate) only_entry: bool,
}

pub(crate) fn scan_for_delete<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    parent: &Inode,
    name: &str,
) -> Result<Option<DeleteLocator>, Error> {
    for (i, &page_block) in parent.used_blocks().iter().enumerate() {
        let page = read_dir_block(device, page_block)?;

        let mut live = 0;
        let mut hit = None;
        for (j, entry) in page.iter().enumerate() {
            if entry.is_empty() {
                continue;
            }
            live += 1;
            if hit.is_none() && entry.name() == name.as_bytes() {
                hit = Some((j, entry.inode_block()));
            }
        }

        if let Some((entry_idx, inode_block)) = hit {
            return Ok(Some(DeleteLocator {
                inode_block,
                blocks_idx: i,
                entry_idx,
                page_block,
                page,
                only_entry: live == 1,
            }));
        }
    }

    Ok(None)
}
