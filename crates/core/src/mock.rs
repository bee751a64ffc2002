//! In-tree mocks: a heap-backed module and an in-process cluster.
//!
//! These back the test suite and local simulation without a compiled guest:
//! the module's linear memory is a plain byte buffer, microtasks are host
//! closures registered in a fake function table, and the cluster records
//! submissions and answers result waits through a scripted responder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::engine::{Microtask, WasmExecutor};
use crate::error::{MemoryError, Trap};
use crate::memory::{GuestMemory, MemoryView, WASM_PAGE_SIZE};
use crate::scheduler::{BusError, Message, MessageBus, Scheduler};

/// Linear memory over a host heap buffer.
pub struct HeapMemory {
    data: Mutex<Vec<u8>>,
    max_pages: u32,
}

impl HeapMemory {
    pub fn new(initial_pages: u32, max_pages: u32) -> Self {
        Self {
            data: Mutex::new(vec![0u8; initial_pages as usize * WASM_PAGE_SIZE]),
            max_pages,
        }
    }
}

impl GuestMemory for HeapMemory {
    fn size_pages(&self) -> u32 {
        (self.data.lock().len() / WASM_PAGE_SIZE) as u32
    }

    fn max_pages(&self) -> u32 {
        self.max_pages
    }

    fn grow(&self, delta_pages: u32) -> Result<u32, MemoryError> {
        let mut data = self.data.lock();
        let current = (data.len() / WASM_PAGE_SIZE) as u32;
        if current + delta_pages > self.max_pages {
            return Err(MemoryError::GrowFailed {
                delta: delta_pages,
                current,
                max: self.max_pages,
            });
        }
        let new_len = data.len() + delta_pages as usize * WASM_PAGE_SIZE;
        data.resize(new_len, 0);
        Ok(current)
    }

    fn unmap(&self, base_page: u32, count: u32) -> Result<(), MemoryError> {
        let mut data = self.data.lock();
        let size = (data.len() / WASM_PAGE_SIZE) as u32;
        if base_page + count > size {
            return Err(MemoryError::UnmapOutOfRange {
                base: base_page,
                count,
                size,
            });
        }
        if base_page + count == size {
            data.truncate(base_page as usize * WASM_PAGE_SIZE);
        } else {
            // Interior unmap leaves an inaccessible-by-convention hole; the
            // heap backing just zeroes it.
            let start = base_page as usize * WASM_PAGE_SIZE;
            let end = start + count as usize * WASM_PAGE_SIZE;
            data[start..end].fill(0);
        }
        Ok(())
    }

    fn read(&self, offset: u32, out: &mut [u8]) -> Result<(), MemoryError> {
        let data = self.data.lock();
        let range = checked_range(data.len(), offset, out.len())?;
        out.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let mut data = self.data.lock();
        let range = checked_range(data.len(), offset, bytes.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }
}

fn checked_range(
    size: usize,
    offset: u32,
    len: usize,
) -> Result<std::ops::Range<usize>, MemoryError> {
    let start = offset as usize;
    let end = start.checked_add(len).filter(|&e| e <= size);
    match end {
        Some(end) => Ok(start..end),
        None => Err(MemoryError::OutOfBounds {
            offset: offset as u64,
            len: len as u64,
            size: size as u64,
        }),
    }
}

/// A module whose function table holds host closures.
pub struct MockModule {
    memory: Arc<HeapMemory>,
    table: DashMap<i32, Microtask>,
    snapshots: DashMap<String, usize>,
}

impl MockModule {
    pub fn new(initial_pages: u32, max_pages: u32) -> Self {
        Self {
            memory: Arc::new(HeapMemory::new(initial_pages, max_pages)),
            table: DashMap::new(),
            snapshots: DashMap::new(),
        }
    }

    /// Install a microtask at a function-table index.
    pub fn register_microtask(
        &self,
        table_index: i32,
        f: impl Fn(&[i32]) -> i64 + Send + Sync + 'static,
    ) {
        self.table.insert(table_index, Arc::new(f));
    }

    pub fn snapshot_size(&self, key: &str) -> Option<usize> {
        self.snapshots.get(key).map(|s| *s)
    }
}

impl WasmExecutor for MockModule {
    fn memory(&self) -> MemoryView {
        MemoryView::new(self.memory.clone())
    }

    fn microtask(&self, table_index: i32) -> Result<Microtask, Trap> {
        self.table
            .get(&table_index)
            .map(|entry| entry.value().clone())
            .ok_or(Trap::BadMicrotask(table_index))
    }

    fn snapshot(&self, key: &str) -> Result<usize, Trap> {
        let size = self.memory.data.lock().len();
        self.snapshots.insert(key.to_owned(), size);
        Ok(size)
    }
}

type Responder = Box<dyn Fn(&Message) -> Result<Message, BusError> + Send + Sync>;

/// Scheduler + message bus pair that stays in-process.
///
/// Submitted calls are recorded; result waits consult the responder, which
/// defaults to answering every call with a zero return value.
#[derive(Default)]
pub struct MockCluster {
    submitted: DashMap<i32, Message>,
    submission_order: Mutex<Vec<i32>>,
    inbound: Mutex<Vec<Message>>,
    awaiting: AtomicUsize,
    finished_awaiting: AtomicUsize,
    responder: Mutex<Option<Responder>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result each awaited call resolves to.
    pub fn set_responder(
        &self,
        f: impl Fn(&Message) -> Result<Message, BusError> + Send + Sync + 'static,
    ) {
        *self.responder.lock() = Some(Box::new(f));
    }

    /// Queue a message for the global listener to pick up.
    pub fn push_inbound(&self, msg: Message) {
        self.inbound.lock().push(msg);
    }

    pub fn submitted(&self) -> Vec<Message> {
        let order = self.submission_order.lock();
        order
            .iter()
            .filter_map(|id| self.submitted.get(id).map(|m| m.value().clone()))
            .collect()
    }

    pub fn awaiting_notifications(&self) -> (usize, usize) {
        (
            self.awaiting.load(Ordering::SeqCst),
            self.finished_awaiting.load(Ordering::SeqCst),
        )
    }
}

impl Scheduler for MockCluster {
    fn call_function(&self, msg: Message, block: bool) {
        tracing::debug!(call = %msg.label(), block, "mock cluster received call");
        self.submission_order.lock().push(msg.id);
        self.submitted.insert(msg.id, msg);
    }

    fn notify_awaiting(&self, _msg: &Message) {
        self.awaiting.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_finished_awaiting(&self, _msg: &Message) {
        self.finished_awaiting.fetch_add(1, Ordering::SeqCst);
    }
}

impl MessageBus for MockCluster {
    fn get_function_result(&self, call_id: i32, timeout_ms: u64) -> Result<Message, BusError> {
        let Some(call) = self.submitted.get(&call_id).map(|m| m.value().clone()) else {
            return Err(BusError::NoResponse(call_id, timeout_ms));
        };
        match self.responder.lock().as_ref() {
            Some(responder) => responder(&call),
            None => {
                let mut result = call;
                result.return_value = 0;
                Ok(result)
            }
        }
    }

    fn next_message(&self, timeout_ms: u64) -> Result<Message, BusError> {
        let mut inbound = self.inbound.lock();
        if inbound.is_empty() {
            return Err(BusError::NoResponse(-1, timeout_ms));
        }
        Ok(inbound.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_memory_interior_unmap_zeroes_without_shrinking() {
        let mem = HeapMemory::new(4, 8);
        mem.write(0, &[0xAA; 16]).unwrap();
        mem.unmap(0, 1).unwrap();
        assert_eq!(mem.size_pages(), 4);
        let mut probe = [0xFFu8; 16];
        mem.read(0, &mut probe).unwrap();
        assert_eq!(probe, [0u8; 16]);
    }

    #[test]
    fn heap_memory_tail_unmap_shrinks() {
        let mem = HeapMemory::new(4, 8);
        mem.unmap(2, 2).unwrap();
        assert_eq!(mem.size_pages(), 2);
        assert!(mem.unmap(1, 2).is_err());
    }

    #[test]
    fn mock_module_resolves_registered_microtasks() {
        let module = MockModule::new(1, 4);
        module.register_microtask(5, |args| args[0] as i64);
        assert!(module.microtask(5).is_ok());
        assert!(matches!(module.microtask(6), Err(Trap::BadMicrotask(6))));
    }

    #[test]
    fn cluster_default_responder_returns_success() {
        let cluster = MockCluster::new();
        let msg = Message::factory("demo", "pi");
        let id = msg.id;
        cluster.call_function(msg, false);
        let result = cluster.get_function_result(id, 100).unwrap();
        assert_eq!(result.return_value, 0);
    }

    #[test]
    fn cluster_unknown_call_is_a_timeout() {
        let cluster = MockCluster::new();
        assert!(matches!(
            cluster.get_function_result(424242, 100),
            Err(BusError::NoResponse(424242, 100))
        ));
    }
}
