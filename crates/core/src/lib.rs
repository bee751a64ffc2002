//! Host-side execution environment for sandboxed WebAssembly functions.
//!
//! Two subsystems form the core: the guest-to-host syscall bridge
//! ([`syscalls`]) and the cooperative multi-threading runtime for parallel
//! loop constructs ([`threads`]). They share the bounds-checked view onto
//! the guest's linear memory ([`memory`]) and the per-thread isolation
//! machinery ([`fdtable`], [`threads::context`]).
//!
//! The WebAssembly engine itself, the distributed scheduler, and the state
//! store are external collaborators; this crate defines the contracts it
//! consumes from them ([`engine`], [`scheduler`], [`state`]) and ships
//! in-process implementations for tests and single-host deployments
//! ([`mock`], [`state::InMemoryStateStore`]).

/// Guest-ABI shadow structures and their native conversions.
pub mod abi;

/// Process-wide system configuration.
pub mod config;

mod error;
pub use error::{MemoryError, Trap};

/// WebAssembly engine collaborator contract.
pub mod engine;

/// Per-thread descriptor ownership registry.
pub mod fdtable;

/// Bounds-checked guest linear memory access.
pub mod memory;

/// In-tree mock module and in-process cluster.
pub mod mock;

/// Scheduler and message-bus collaborator contracts.
pub mod scheduler;

/// Shared-state collaborator contract and the in-memory backend.
pub mod state;

/// The guest-facing syscall surface.
pub mod syscalls;

/// The parallel runtime: team state, fork engine, reductions, partitioner.
pub mod threads;

/// Guest-path to host-path whitelist.
pub mod whitelist;

/// Worker pool and queue listeners.
pub mod worker;

pub use config::{StateMode, SystemConfig};
pub use memory::{MemoryView, WASM_PAGE_SIZE};
pub use syscalls::{SyscallEnv, GUEST_IMPORTS};
pub use threads::{OmpRuntime, OMP_STACK_SIZE};
pub use whitelist::PathWhitelist;
