//! Per-thread registry of descriptors the guest is permitted to touch.
//!
//! Descriptors enter the set on a successful whitelisted `open` or `socket`
//! and leave it on `close`. The sets are thread-local: in a shared
//! address-space host, descriptors leaking between guest threads would
//! violate the sandbox boundary, so each executing thread only ever sees the
//! descriptors it created itself.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::error::Trap;

thread_local! {
    static OPEN_FDS: RefCell<HashSet<i32>> = RefCell::new(HashSet::new());
}

/// Record `fd` as owned by the calling thread.
pub fn insert(fd: i32) {
    OPEN_FDS.with(|fds| {
        fds.borrow_mut().insert(fd);
    });
}

/// Drop ownership of `fd`. Returns whether it was present.
pub fn remove(fd: i32) -> bool {
    OPEN_FDS.with(|fds| fds.borrow_mut().remove(&fd))
}

pub fn contains(fd: i32) -> bool {
    OPEN_FDS.with(|fds| fds.borrow().contains(&fd))
}

/// Reject any syscall touching a descriptor the calling thread does not own.
pub fn check(fd: i32) -> Result<(), Trap> {
    if !contains(fd) {
        tracing::error!(fd, "fd not owned by this thread");
        return Err(Trap::FdNotOwned(fd));
    }
    Ok(())
}

/// Forget everything the calling thread owns. Used when a worker thread is
/// recycled for a fresh invocation.
pub fn clear() {
    OPEN_FDS.with(|fds| fds.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_rejects_unowned_fd() {
        clear();
        assert!(matches!(check(99), Err(Trap::FdNotOwned(99))));
    }

    #[test]
    fn insert_then_check_then_remove() {
        clear();
        insert(5);
        assert!(check(5).is_ok());
        assert!(remove(5));
        assert!(check(5).is_err());
    }

    #[test]
    fn ownership_is_per_thread() {
        clear();
        insert(7);
        std::thread::spawn(|| {
            assert!(check(7).is_err());
        })
        .join()
        .unwrap();
        assert!(check(7).is_ok());
    }
}
