//! Typed, bounds-checked access to guest linear memory.
//!
//! Every guest offset is untrusted, so all access funnels through one
//! bounds check against the *current* memory size. Nothing here caches a
//! host pointer: `grow`, `mmap` and `brk` may relocate the backing store, so
//! each operation re-translates its offset.

use std::sync::Arc;

use crate::abi::GuestPod;
use crate::error::MemoryError;

/// WASM page size in bytes (64 KiB).
pub const WASM_PAGE_SIZE: usize = 65536;

/// Longest NUL-terminated string the runtime will read out of guest memory.
const MAX_GUEST_STR: usize = 4096;

/// Linear memory primitives supplied by the WebAssembly engine.
///
/// Offsets and sizes are guest-side (32-bit); the implementation owns the
/// backing store and enforces its own maximum.
pub trait GuestMemory: Send + Sync {
    /// Current size in pages.
    fn size_pages(&self) -> u32;

    /// Maximum size in pages.
    fn max_pages(&self) -> u32;

    /// Grow by `delta_pages`, returning the page index of the first newly
    /// allocated page (the pre-grow size).
    fn grow(&self, delta_pages: u32) -> Result<u32, MemoryError>;

    /// Unmap `count` pages starting at `base_page`.
    fn unmap(&self, base_page: u32, count: u32) -> Result<(), MemoryError>;

    /// Copy `out.len()` bytes out of memory starting at `offset`.
    fn read(&self, offset: u32, out: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `data` into memory starting at `offset`.
    fn write(&self, offset: u32, data: &[u8]) -> Result<(), MemoryError>;
}

/// Cheap-to-clone handle over the executing module's linear memory, adding
/// the typed accessors the syscall and parallel layers marshal through.
#[derive(Clone)]
pub struct MemoryView {
    inner: Arc<dyn GuestMemory>,
}

impl MemoryView {
    pub fn new(inner: Arc<dyn GuestMemory>) -> Self {
        Self { inner }
    }

    pub fn size_pages(&self) -> u32 {
        self.inner.size_pages()
    }

    pub fn max_pages(&self) -> u32 {
        self.inner.max_pages()
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner.size_pages() as u64 * WASM_PAGE_SIZE as u64
    }

    pub fn grow(&self, delta_pages: u32) -> Result<u32, MemoryError> {
        self.inner.grow(delta_pages)
    }

    pub fn unmap(&self, base_page: u32, count: u32) -> Result<(), MemoryError> {
        self.inner.unmap(base_page, count)
    }

    /// Validate that `[offset, offset + len)` lies inside current memory.
    pub fn check_range(&self, offset: u32, len: u32) -> Result<(), MemoryError> {
        let end = offset as u64 + len as u64;
        let size = self.size_bytes();
        if end > size {
            return Err(MemoryError::OutOfBounds {
                offset: offset as u64,
                len: len as u64,
                size,
            });
        }
        Ok(())
    }

    pub fn read_bytes(&self, offset: u32, len: u32) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0u8; len as usize];
        self.inner.read(offset, &mut buf)?;
        Ok(buf)
    }

    pub fn write_bytes(&self, offset: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.inner.write(offset, data)
    }

    /// Read a POD value at a guest offset.
    pub fn read_pod<T: GuestPod>(&self, offset: u32) -> Result<T, MemoryError> {
        let mut buf = vec![0u8; T::SIZE];
        self.inner.read(offset, &mut buf)?;
        Ok(T::decode(&buf))
    }

    /// Write a POD value at a guest offset.
    pub fn write_pod<T: GuestPod>(&self, offset: u32, value: &T) -> Result<(), MemoryError> {
        let mut buf = vec![0u8; T::SIZE];
        value.encode(&mut buf);
        self.inner.write(offset, &buf)
    }

    pub fn read_i32(&self, offset: u32) -> Result<i32, MemoryError> {
        self.read_pod(offset)
    }

    pub fn write_i32(&self, offset: u32, value: i32) -> Result<(), MemoryError> {
        self.write_pod(offset, &value)
    }

    pub fn read_u32(&self, offset: u32) -> Result<u32, MemoryError> {
        self.read_pod(offset)
    }

    /// Read `count` packed 32-bit words (an argument array).
    pub fn read_u32s(&self, offset: u32, count: u32) -> Result<Vec<u32>, MemoryError> {
        let bytes = self.read_bytes(offset, count.saturating_mul(4))?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Read a NUL-terminated guest string, capped at a path-sized limit.
    pub fn read_cstr(&self, offset: u32) -> Result<String, MemoryError> {
        let size = self.size_bytes();
        let mut collected = Vec::new();
        let mut cursor = offset as u64;
        while cursor < size && collected.len() < MAX_GUEST_STR {
            let chunk_len = (size - cursor).min(256) as u32;
            let chunk = self.read_bytes(cursor as u32, chunk_len)?;
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                collected.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&collected).into_owned());
            }
            collected.extend_from_slice(&chunk);
            cursor += chunk_len as u64;
        }
        Err(MemoryError::UnterminatedString { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::HeapMemory;

    fn view(pages: u32) -> MemoryView {
        MemoryView::new(Arc::new(HeapMemory::new(pages, 16)))
    }

    #[test]
    fn read_write_round_trip() {
        let mem = view(1);
        mem.write_i32(128, -42).unwrap();
        assert_eq!(mem.read_i32(128).unwrap(), -42);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let mem = view(1);
        let end = WASM_PAGE_SIZE as u32;
        assert!(mem.read_i32(end - 3).is_err());
        assert!(mem.write_bytes(end, &[1]).is_err());
        assert!(mem.check_range(end - 4, 4).is_ok());
    }

    #[test]
    fn grow_returns_first_new_page() {
        let mem = view(2);
        assert_eq!(mem.grow(3).unwrap(), 2);
        assert_eq!(mem.size_pages(), 5);
    }

    #[test]
    fn grow_past_max_fails() {
        let mem = view(2);
        assert!(mem.grow(64).is_err());
        assert_eq!(mem.size_pages(), 2);
    }

    #[test]
    fn cstr_reads_until_nul() {
        let mem = view(1);
        mem.write_bytes(100, b"/etc/hosts\0").unwrap();
        assert_eq!(mem.read_cstr(100).unwrap(), "/etc/hosts");
    }

    #[test]
    fn cstr_without_terminator_fails() {
        let mem = view(1);
        // Fill the tail of memory with non-zero bytes so no NUL is found.
        let end = WASM_PAGE_SIZE as u32;
        mem.write_bytes(end - 64, &[b'x'; 64]).unwrap();
        assert!(mem.read_cstr(end - 64).is_err());
    }
}
