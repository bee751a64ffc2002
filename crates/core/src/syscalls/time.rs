//! Timing syscalls.

use crate::abi::GuestTimespec;
use crate::error::Trap;

use super::SyscallEnv;

impl SyscallEnv {
    /// `clock_gettime(clockId, resultAddr)`: fills the guest's 32-bit
    /// timespec shadow from the host clock.
    pub fn clock_gettime(&self, clock_id: i32, result_addr: u32) -> Result<i32, Trap> {
        tracing::debug!(clock_id, result_addr, "clock_gettime");

        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let res = unsafe { libc::clock_gettime(clock_id, &mut ts) };
        if res != 0 {
            tracing::warn!(clock_id, res, "host clock_gettime failed");
            return Ok(res);
        }

        self.memory
            .write_pod(result_addr, &GuestTimespec::from_native(&ts))?;
        Ok(0)
    }
}
