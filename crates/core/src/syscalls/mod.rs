//! Guest-facing syscall surface.
//!
//! Everything the guest's libc port can invoke lands here. Each entry point
//! validates against the descriptor registry and path whitelist, marshals
//! between guest shadow layouts and native kernel ABIs through the memory
//! view, and either performs the kernel call or mutates guest memory.
//!
//! Return-code convention: the kernel's return value goes back to the guest
//! as a 32-bit signed integer, unchanged. Policy violations and unsupported
//! operations never become errno values; they are a fatal [`Trap`].

mod files;
mod mem;
mod sockets;
mod time;

pub use sockets::SocketCall;

use crate::error::Trap;
use crate::memory::MemoryView;
use crate::whitelist::PathWhitelist;

/// Import names the guest's libc port references. Stable across guest
/// builds; the embedder binds each name against the matching
/// [`SyscallEnv`] / [`crate::threads::OmpRuntime`] method.
pub const GUEST_IMPORTS: &[&str] = &[
    "__syscall_open",
    "__syscall_read",
    "__syscall_close",
    "__syscall_fcntl64",
    "__syscall_poll",
    "__syscall_writev",
    "__syscall_ioctl",
    "__syscall_socketcall",
    "__syscall_mmap",
    "__syscall_munmap",
    "__syscall_brk",
    "__syscall_clock_gettime",
    "__syscall_exit",
    "__syscall_exit_group",
    "__syscall_gettid",
    "__syscall_tkill",
    "__syscall_rt_sigprocmask",
    "__syscall_readv",
    "__syscall_llseek",
    "__syscall_futex",
    "__syscall_fstat64",
    "__syscall_stat64",
    "__syscall_access",
    "__syscall_madvise",
    "__syscall_mremap",
    "__syscall_gettimeofday",
    "__unsupported_syscall",
    "ioctl",
    "puts",
    "_gethostbyname",
    "omp_get_thread_num",
    "omp_get_num_threads",
    "omp_get_max_threads",
    "omp_get_level",
    "omp_get_max_active_levels",
    "omp_set_max_active_levels",
    "omp_set_num_threads",
    "omp_get_num_devices",
    "omp_set_default_device",
    "__kmpc_barrier",
    "__kmpc_critical",
    "__kmpc_end_critical",
    "__kmpc_flush",
    "__kmpc_master",
    "__kmpc_end_master",
    "__kmpc_push_num_threads",
    "__kmpc_global_thread_num",
    "__kmpc_fork_call",
    "__kmpc_for_static_init_4",
    "__kmpc_for_static_fini",
    "__kmpc_reduce",
    "__kmpc_reduce_nowait",
    "__kmpc_end_reduce",
    "__kmpc_end_reduce_nowait",
];

/// Host-side environment a module's syscall imports are bound against.
pub struct SyscallEnv {
    pub(crate) memory: MemoryView,
    pub(crate) whitelist: PathWhitelist,
}

impl SyscallEnv {
    pub fn new(memory: MemoryView, whitelist: PathWhitelist) -> Self {
        Self { memory, whitelist }
    }

    pub fn memory(&self) -> &MemoryView {
        &self.memory
    }

    /// Shared handler for the explicitly unsupported surface (`readv`,
    /// `llseek`, `futex`, `fstat64`, `stat64`, `access`, `gettimeofday`,
    /// `exit`, `exit_group`, `gettid`, `tkill`, `rt_sigprocmask`,
    /// `__unsupported_syscall`, ...).
    pub fn unsupported(&self, name: &'static str, args: &[i32]) -> Result<i32, Trap> {
        tracing::error!(name, ?args, "unsupported syscall");
        Err(Trap::UnsupportedSyscall(name))
    }
}
