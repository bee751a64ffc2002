//! Error taxonomy for the host runtime.
//!
//! Two disjoint channels exist for reporting failure to the guest:
//!
//! - **Transparent**: host kernel return codes (`-1` from `connect`, a short
//!   `read`, ...) are handed back to the guest unchanged.
//! - **Fatal**: policy violations and unsupported operations are a [`Trap`].
//!   A trap is never converted into a guest-visible errno; it terminates
//!   guest execution with unimplemented-intrinsic semantics.

/// Fatal guest error. Terminates execution of the offending module.
#[derive(Debug, thiserror::Error)]
pub enum Trap {
    /// The guest invoked a syscall the sandbox does not implement.
    #[error("unimplemented intrinsic: {0}")]
    UnsupportedSyscall(&'static str),

    /// A descriptor-taking syscall was passed an fd the calling thread does
    /// not own.
    #[error("fd {0} not owned by calling thread")]
    FdNotOwned(i32),

    /// Attempt to open a path outside the whitelist.
    #[error("blocked path: {0}")]
    BlockedPath(String),

    /// A whitelisted path resolved but the host-side open failed.
    #[error("failed to open host file {0}")]
    HostOpen(String),

    /// `open` with a non-zero mode argument; only read-only access exists.
    #[error("open in non-read-only mode ({0})")]
    NonReadOnlyOpen(i32),

    /// `poll` over anything other than exactly one descriptor.
    #[error("polling {0} fds, only a single fd is supported")]
    MultiFdPoll(i32),

    /// Server-side socket operation (`listen`, `accept`); functions are
    /// clients only.
    #[error("server-side socket operation: {0}")]
    ServerSocketOp(&'static str),

    /// A loop schedule kind outside the supported static schedules.
    #[error("unimplemented loop schedule: {0}")]
    UnsupportedSchedule(i32),

    /// Guest memory access or growth failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// A microtask table index that resolves to nothing.
    #[error("invalid microtask table index: {0}")]
    BadMicrotask(i32),

    /// One or more team members returned non-zero or timed out.
    #[error("{0} parallel workers exited with errors")]
    WorkerErrors(i64),

    /// A second parallel snapshot was requested while one is active.
    #[error("parallel snapshot already active: {0}")]
    SnapshotActive(String),

    /// Module snapshot into the state store failed.
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// Host thread spawn for a team member failed.
    #[error("failed to spawn parallel worker: {0}")]
    ThreadSpawn(String),

    /// `end_reduce` has no meaning once the region is distributed; the final
    /// combine happens in the fork engine.
    #[error("end of reduction called in distributed context")]
    DistributedReduceEnd,
}

/// Guest linear memory access/growth errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("out-of-bounds guest access: offset {offset:#x}, len {len}, memory size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("cannot grow guest memory by {delta} pages ({current} of {max} pages in use)")]
    GrowFailed { delta: u32, current: u32, max: u32 },

    #[error("cannot unmap {count} pages at page {base} of a {size}-page memory")]
    UnmapOutOfRange { base: u32, count: u32, size: u32 },

    #[error("unterminated string at guest offset {offset:#x}")]
    UnterminatedString { offset: u32 },
}
