use std::mem::MaybeUninit;

use bytemuck::Zeroable;

use breadbox_traits::{BlockAccess, BlockIndex};

use crate::{Error, BLOCK_SIZE, MAX_FILE_BLOCKS, MAX_USERNAME};

pub(crate) const FILE_KIND: u8 = b'f';
pub(crate) const DIR_KIND: u8 = b'd';

/// What a freshly created inode should be.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InodeKind {
    File,
    Directory,
}

impl InodeKind {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            InodeKind::File => FILE_KIND,
            InodeKind::Directory => DIR_KIND,
        }
    }
}

/// One inode record, filling its disk block exactly. `size` counts data
/// blocks for a file and directory pages for a directory; `blocks[0..size)`
/// is the used prefix.
#[derive(bytemuck::Zeroable, bytemuck::Pod, Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct Inode {
    pub(crate) kind: u8,
    pub(crate) owner: [u8; MAX_USERNAME + 1],
    pub(crate) size: u32,
    pub(crate) blocks: [u32; MAX_FILE_BLOCKS],
}

const _: () = assert!(std::mem::size_of::<Inode>() == BLOCK_SIZE);

impl Inode {
    pub(crate) fn new(kind: InodeKind, owner: &str) -> Inode {
        let mut inode = Inode::zeroed();
        inode.kind = kind.as_byte();
        let len = owner.len().min(MAX_USERNAME);
        inode.owner[..len].copy_from_slice(&owner.as_bytes()[..len]);
        inode
    }

    pub(crate) fn is_file(&self) -> bool {
        self.kind == FILE_KIND
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.kind == DIR_KIND
    }

    pub(crate) fn owner(&self) -> &[u8] {
        let zero = self
            .owner
            .iter()
            .position(|c| *c == 0)
            .unwrap_or(self.owner.len());

        &self.owner[..zero]
    }

    pub(crate) fn owned_by(&self, user: &str) -> bool {
        self.owner() == user.as_bytes()
    }

    /// An empty owner marks the root-owned subtree.
    pub(crate) fn root_owned(&self) -> bool {
        self.owner().is_empty()
    }

    /// The used prefix of `blocks`, clamped so a corrupt `size` can never
    /// index past the array.
    pub(crate) fn used_blocks(&self) -> &[u32] {
        &self.blocks[..(self.size as usize).min(MAX_FILE_BLOCKS)]
    }
}

pub(crate) fn read_inode<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    block: u32,
) -> Result<Inode, Error> {
    let mut inode: MaybeUninit<Inode> = MaybeUninit::uninit();
    let bytes: &mut MaybeUninit<[u8; BLOCK_SIZE]> = unsafe { std::mem::transmute(&mut inode) };
    device.read(BlockIndex(block.into()), bytes)?;

    Ok(unsafe { inode.assume_init() })
}

pub(crate) fn write_inode<D: BlockAccess<BLOCK_SIZE>>(
    device: &D,
    block: u32,
    inode: &Inode,
) -> Result<(), Error> {
    let bytes = bytemuck::bytes_of(inode).try_into().unwrap();
    device.write(BlockIndex(block.into()), bytes)?;

    Ok(())
}
