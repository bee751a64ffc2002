//! WebAssembly engine collaborator contract.
//!
//! The compiler/interpreter itself lives outside this crate; the runtime
//! only consumes a handful of primitives from it: the module's linear
//! memory, indirect-call table lookup, execution of a guest function on the
//! calling thread, and snapshotting module state into the external store.
//! [`crate::mock::MockModule`] is the in-tree implementation used by tests
//! and local simulation.

use std::sync::Arc;

use crate::error::Trap;
use crate::memory::MemoryView;

/// A guest function resolved out of the module's indirect-call table.
///
/// The argument vector follows the microtask calling convention: thread
/// number, shared-variable count, then one guest pointer per shared
/// variable. The return value is the guest's exit code for that thread.
pub type Microtask = Arc<dyn Fn(&[i32]) -> i64 + Send + Sync>;

/// Everything a spawned team member needs to run its slice of a parallel
/// region.
pub struct ThreadSpec {
    pub microtask: Microtask,
    pub args: Vec<i32>,
    pub tid: i32,
    pub stack_size: usize,
}

/// Primitives the executing module exposes to the runtime.
pub trait WasmExecutor: Send + Sync + 'static {
    /// Handle to the module's linear memory.
    fn memory(&self) -> MemoryView;

    /// Look up a microtask by its function-table index.
    fn microtask(&self, table_index: i32) -> Result<Microtask, Trap>;

    /// Run a team member's microtask on the calling thread, returning its
    /// exit code. The fork engine has already installed the per-thread
    /// context when this runs.
    fn execute_thread(&self, spec: &ThreadSpec) -> i64 {
        (spec.microtask)(&spec.args)
    }

    /// Serialise the module into the external store under `key`, returning
    /// the snapshot size in bytes.
    fn snapshot(&self, key: &str) -> Result<usize, Trap>;
}
