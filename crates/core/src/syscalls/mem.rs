//! Memory syscalls: growth and unmap over the module's linear memory.
//!
//! There is no file-backed mapping: `mmap` with a real descriptor traps, and
//! anonymous mappings are plain grows of linear memory.

use crate::error::Trap;
use crate::memory::WASM_PAGE_SIZE;

use super::SyscallEnv;

impl SyscallEnv {
    /// `mmap(addr, length, prot, flags, fd, offset)`: the start address is
    /// ignored and the module's memory grows by the page-rounded length.
    /// Returns the byte address of the first new page.
    pub fn mmap(
        &self,
        addr: u32,
        length: u32,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: u32,
    ) -> Result<i32, Trap> {
        tracing::debug!(addr, length, prot, flags, fd, offset, "mmap");

        if fd != -1 {
            tracing::error!(fd, "file-backed mmap is not supported");
            return Err(Trap::UnsupportedSyscall("mmap with file descriptor"));
        }

        let num_pages = (length as u64).div_ceil(WASM_PAGE_SIZE as u64) as u32;
        tracing::debug!(num_pages, "mmap growing memory");
        let base_page = self.memory.grow(num_pages)?;

        Ok((base_page as u64 * WASM_PAGE_SIZE as u64) as i32)
    }

    /// `munmap(addr, length)`: unmap the covering page range.
    pub fn munmap(&self, addr: u32, length: u32) -> Result<i32, Trap> {
        tracing::debug!(addr, length, "munmap");

        let base_page = addr / WASM_PAGE_SIZE as u32;
        let num_pages = (length as u64).div_ceil(WASM_PAGE_SIZE as u64) as u32;

        tracing::debug!(base_page, num_pages, "munmap releasing pages");
        self.memory.unmap(base_page, num_pages)?;
        Ok(0)
    }

    /// `brk(addr)`: grow memory so the break covers `addr`, returning the
    /// **pre-grow** break. The guest allocator treats the call as "reserved
    /// up to addr, old break still satisfies old allocations"; see the
    /// contract notes on `brk` before changing this.
    pub fn brk(&self, addr: u32) -> Result<i32, Trap> {
        tracing::debug!(addr, "brk");

        let target_pages = addr / WASM_PAGE_SIZE as u32;
        let current_pages = self.memory.size_pages();
        let current_break = (current_pages as u64 * WASM_PAGE_SIZE as u64) as i32;

        let max_pages = self.memory.max_pages();
        if target_pages > max_pages {
            tracing::warn!(target_pages, max_pages, "brk requesting more than max pages");
        }

        if target_pages <= current_pages {
            tracing::debug!("brk with no effect");
            return Ok(current_break);
        }

        let expansion = target_pages - current_pages;
        tracing::debug!(expansion, "brk growing memory");
        if let Err(err) = self.memory.grow(expansion) {
            // Engine enforces the hard cap; the break simply does not move.
            tracing::warn!(%err, "brk growth rejected");
        }

        Ok(current_break)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::error::Trap;
    use crate::memory::{MemoryView, WASM_PAGE_SIZE};
    use crate::mock::HeapMemory;
    use crate::whitelist::PathWhitelist;

    use super::super::SyscallEnv;

    const PAGE: u32 = WASM_PAGE_SIZE as u32;

    fn env(pages: u32, max: u32) -> SyscallEnv {
        let memory = MemoryView::new(Arc::new(HeapMemory::new(pages, max)));
        SyscallEnv::new(memory, PathWhitelist::empty())
    }

    #[test]
    fn mmap_grows_and_returns_new_base() {
        let env = env(2, 16);
        // 130000 bytes rounds up to 2 pages
        let base = env.mmap(0, 130_000, 0, 0, -1, 0).unwrap();
        assert_eq!(base, 2 * PAGE as i32);
        assert_eq!(env.memory().size_pages(), 4);
    }

    #[test]
    fn mmap_with_fd_traps() {
        let env = env(2, 16);
        assert!(matches!(
            env.mmap(0, 4096, 0, 0, 3, 0),
            Err(Trap::UnsupportedSyscall(_))
        ));
        assert_eq!(env.memory().size_pages(), 2);
    }

    #[test]
    fn mmap_munmap_round_trip_restores_size() {
        let env = env(2, 16);
        let addr = env.mmap(0, 130_000, 0, 0, -1, 0).unwrap();
        assert_eq!(env.memory().size_pages(), 4);
        assert_eq!(env.munmap(addr as u32, 130_000).unwrap(), 0);
        assert_eq!(env.memory().size_pages(), 2);
    }

    #[test]
    fn brk_returns_pre_grow_break_and_is_monotonic() {
        let env = env(2, 16);

        let mut previous = 0i32;
        for target in [1, 3, 3, 5, 4, 8] {
            let brk = env.brk(target * PAGE).unwrap();
            assert!(brk >= previous, "break must never decrease");
            previous = brk;
        }

        // Growth returns the pre-grow break, not the new one.
        let before = env.memory().size_pages();
        let brk = env.brk((before + 2) * PAGE).unwrap();
        assert_eq!(brk, (before * PAGE) as i32);
        assert_eq!(env.memory().size_pages(), before + 2);
    }

    #[test]
    fn brk_beyond_max_pages_keeps_the_old_break() {
        let env = env(2, 4);
        let brk = env.brk(100 * PAGE).unwrap();
        assert_eq!(brk, (2 * PAGE) as i32);
        assert_eq!(env.memory().size_pages(), 2);
    }

    #[test]
    fn brk_below_current_break_is_a_no_op() {
        let env = env(4, 16);
        let brk = env.brk(PAGE).unwrap();
        assert_eq!(brk, (4 * PAGE) as i32);
        assert_eq!(env.memory().size_pages(), 4);
    }
}
