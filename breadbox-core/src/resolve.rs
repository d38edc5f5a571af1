use breadbox_traits::BlockAccess;

use crate::directory::find_child;
use crate::inode::read_inode;
use crate::locktable::{InodeLock, SharedGuard, UpgradeGuard};
use crate::{Error, FilesystemInner, BLOCK_SIZE, ROOT_BLOCK};

/// How the resolver locks the final path component. Readers take `Shared`;
/// anything that may go on to write takes `Upgradable` so concurrent readers
/// stay unblocked until the decisive promotion.
pub(crate) trait LockMode {
    type Guard;
    fn acquire(lock: &InodeLock) -> Self::Guard;
}

pub(crate) struct Shared;
pub(crate) struct Upgradable;

impl LockMode for Shared {
    type Guard = SharedGuard;

    fn acquire(lock: &InodeLock) -> SharedGuard {
        lock.read_arc()
    }
}

impl LockMode for Upgradable {
    type Guard = UpgradeGuard;

    fn acquire(lock: &InodeLock) -> UpgradeGuard {
        lock.upgradable_read_arc()
    }
}

/// Walk `path` from the root and return the final inode block, locked in the
/// requested mode. The descent is hand-over-hand: the next lock is always
/// taken before the previous one is released, so at most two locks are held
/// and always parent before child. A missing component, a non-directory on
/// the way, or an ownership failure all collapse into `NotFound`.
pub(crate) fn resolve<D, M>(
    fs: &FilesystemInner<D>,
    user: &str,
    path: &[String],
) -> Result<(u32, M::Guard), Error>
where
    D: BlockAccess<BLOCK_SIZE>,
    M: LockMode,
{
    let Some((last, interior)) = path.split_last() else {
        // Empty path names the root itself.
        let root = fs.locks.get(ROOT_BLOCK);
        let guard = M::acquire(&root);
        return Ok((ROOT_BLOCK, guard));
    };

    let mut current = ROOT_BLOCK;
    let mut walker = fs.locks.get(current).read_arc();

    for component in interior {
        let child = descend(fs, current, user, component)?;
        let next = fs.locks.get(child).read_arc();
        walker = next;
        current = child;
    }

    let child = descend(fs, current, user, last)?;
    let final_lock = fs.locks.get(child);
    let guard = M::acquire(&final_lock);
    drop(walker);

    Ok((child, guard))
}

/// One step down: the current inode must be a directory the user may search,
/// and the child must exist in it.
fn descend<D: BlockAccess<BLOCK_SIZE>>(
    fs: &FilesystemInner<D>,
    dir_block: u32,
    user: &str,
    name: &str,
) -> Result<u32, Error> {
    let dir = read_inode(&fs.device, dir_block)?;
    if !dir.is_dir() {
        return Err(Error::NotFound);
    }
    if !dir.owned_by(user) && !dir.root_owned() {
        return Err(Error::NotFound);
    }

    find_child(&fs.device, &dir, name)?.ok_or(Error::NotFound)
}
