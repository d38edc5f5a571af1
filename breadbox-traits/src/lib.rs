use std::mem::MaybeUninit;

/// Absolute block number on the device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct BlockIndex(pub u64);

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    General,
    IO,
    Invalid,
}

/// Synchronous fixed-size block I/O.
///
/// # Safety
///
/// `read` must fully initialize `buffer` whenever it returns `Ok`; callers
/// will `assume_init` on success.
pub unsafe trait BlockAccess<const BLOCK_SIZE: usize> {
    fn read(
        &self,
        block_idx: BlockIndex,
        buffer: &mut MaybeUninit<[u8; BLOCK_SIZE]>,
    ) -> Result<(), Error>;
    fn write(&self, block_idx: BlockIndex, buffer: &[u8; BLOCK_SIZE]) -> Result<(), Error>;
    /// Returns the size of the device in blocks, must be constant.
    fn device_size(&self) -> Result<BlockIndex, Error>;
}
