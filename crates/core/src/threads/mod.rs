//! Host-level cooperative multi-threading runtime for the guest's parallel
//! loop constructs.
//!
//! The guest's OpenMP-lowered imports (`omp_*`, `__kmpc_*`) land on
//! [`OmpRuntime`]. Team state lives in [`level::Level`]; the executing
//! thread's membership is implicit per-thread state installed by the fork
//! engine.

pub mod context;
mod fork;
pub mod level;
pub mod loops;
mod reduce;

pub use fork::OMP_STACK_SIZE;
pub use reduce::{EMPTY_REDUCE_BLOCK, REDUCE_KEY};

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SystemConfig;
use crate::engine::WasmExecutor;
use crate::error::Trap;
use crate::scheduler::{MessageBus, Scheduler};
use crate::state::StateStore;

/// The parallel runtime bound to one executing module.
pub struct OmpRuntime {
    pub(crate) executor: Arc<dyn WasmExecutor>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) config: SystemConfig,

    /// Device count the user requested; 1 means local threads, anything
    /// else distributes parallel regions across hosts.
    pub(crate) devices: AtomicI32,

    /// Snapshot key/size once this invocation has forked distributed work.
    pub(crate) active_snapshot: Mutex<Option<(String, usize)>>,
}

impl OmpRuntime {
    pub fn new(
        executor: Arc<dyn WasmExecutor>,
        scheduler: Arc<dyn Scheduler>,
        bus: Arc<dyn MessageBus>,
        state: Arc<dyn StateStore>,
        config: SystemConfig,
    ) -> Self {
        Self {
            executor,
            scheduler,
            bus,
            state,
            config,
            devices: AtomicI32::new(1),
            active_snapshot: Mutex::new(None),
        }
    }

    /// `omp_get_thread_num`: the caller's number within its team.
    pub fn thread_num(&self) -> i32 {
        tracing::debug!("omp_get_thread_num");
        context::thread_num()
    }

    /// `omp_get_num_threads`: size of the team executing the current region.
    pub fn num_threads(&self) -> i32 {
        tracing::debug!("omp_get_num_threads");
        context::current_level().num_threads
    }

    /// `omp_get_max_threads`: team size a region forked now would get.
    pub fn max_threads(&self) -> i32 {
        tracing::debug!("omp_get_max_threads");
        context::current_level().next_team_size()
    }

    /// `omp_get_level`: current nesting depth.
    pub fn level_depth(&self) -> i32 {
        tracing::debug!("omp_get_level");
        context::current_level().depth
    }

    /// `omp_get_max_active_levels`.
    pub fn max_active_levels(&self) -> i32 {
        tracing::debug!("omp_get_max_active_levels");
        context::current_level().max_active_level()
    }

    /// `omp_set_max_active_levels`.
    pub fn set_max_active_levels(&self, level: i32) {
        tracing::debug!(level, "omp_set_max_active_levels");
        context::current_level().set_max_active_level(level);
    }

    /// `omp_set_num_threads`.
    pub fn set_num_threads(&self, num_threads: i32) {
        tracing::debug!(num_threads, "omp_set_num_threads");
        context::current_level().set_wanted_num_threads(num_threads);
    }

    /// `__kmpc_push_num_threads`: one-shot team size for the next fork.
    pub fn push_num_threads(&self, loc: i32, global_tid: i32, num_threads: i32) {
        tracing::debug!(loc, global_tid, num_threads, "push_num_threads");
        context::current_level().push_num_threads(num_threads);
    }

    /// `__kmpc_global_thread_num`.
    pub fn global_thread_num(&self, loc: i32) -> i32 {
        tracing::debug!(loc, "global_thread_num");
        context::thread_num()
    }

    /// `__kmpc_barrier`: rendezvous of the whole team.
    pub fn barrier(&self, loc: i32, global_tid: i32) {
        tracing::debug!(loc, global_tid, "barrier");
        context::current_level().barrier_wait();
    }

    /// `__kmpc_critical`.
    pub fn critical(&self, loc: i32, global_tid: i32, crit: i32) {
        tracing::debug!(loc, global_tid, crit, "critical");
        context::current_level().critical_enter();
    }

    /// `__kmpc_end_critical`.
    pub fn end_critical(&self, loc: i32, global_tid: i32, crit: i32) {
        tracing::debug!(loc, global_tid, crit, "end_critical");
        context::current_level().critical_exit();
    }

    /// `__kmpc_flush`: full fence plus a yield hint so `while (flag)` spins
    /// do not starve the writer.
    pub fn flush(&self, loc: i32) {
        tracing::debug!(loc, "flush");
        std::sync::atomic::fence(Ordering::SeqCst);
        std::thread::yield_now();
    }

    /// `__kmpc_master`: 1 iff the caller runs the master block.
    pub fn master(&self, loc: i32, global_tid: i32) -> i32 {
        tracing::debug!(loc, global_tid, "master");
        i32::from(context::thread_num() == 0)
    }

    /// `__kmpc_end_master`: only the master thread may run this.
    pub fn end_master(&self, loc: i32, global_tid: i32) {
        tracing::debug!(loc, global_tid, "end_master");
        if context::thread_num() != 0 {
            tracing::warn!(
                thread = context::thread_num(),
                "end_master called off the master thread"
            );
        }
    }

    /// `omp_get_num_devices`.
    pub fn num_devices(&self) -> i32 {
        tracing::debug!("omp_get_num_devices");
        self.devices.load(Ordering::SeqCst)
    }

    /// `omp_set_default_device`: a negative count requests distributing
    /// parallel regions across that many devices.
    pub fn set_default_device(&self, device: i32) {
        tracing::debug!(device, "omp_set_default_device");
        if device.abs() > self.config.max_devices_per_user {
            tracing::warn!(
                device,
                max = self.config.max_devices_per_user,
                "device index exceeds available devices, ignoring"
            );
            return;
        }
        self.devices.store(device.abs(), Ordering::SeqCst);
    }

    /// `__kmpc_for_static_init_4`: computes the caller's slice of a static
    /// loop, mutating the guest's bound variables in place.
    pub fn for_static_init_4(
        &self,
        loc: i32,
        gtid: i32,
        schedule: i32,
        last_iter_ptr: i32,
        lower_ptr: i32,
        upper_ptr: i32,
        stride_ptr: i32,
        incr: i32,
        chunk: i32,
    ) -> Result<(), Trap> {
        tracing::debug!(
            loc,
            gtid,
            schedule,
            last_iter_ptr,
            lower_ptr,
            upper_ptr,
            stride_ptr,
            incr,
            chunk,
            "for_static_init_4"
        );

        let memory = self.executor.memory();
        let level = context::current_level();

        let partition = loops::partition_static(
            schedule,
            level.num_threads,
            context::thread_num(),
            memory.read_i32(lower_ptr as u32)?,
            memory.read_i32(upper_ptr as u32)?,
            incr,
            chunk,
        )?;

        memory.write_i32(lower_ptr as u32, partition.lower)?;
        memory.write_i32(upper_ptr as u32, partition.upper)?;
        memory.write_i32(stride_ptr as u32, partition.stride)?;
        memory.write_i32(last_iter_ptr as u32, i32::from(partition.last_iter))?;
        Ok(())
    }

    /// `__kmpc_for_static_fini`: the loop's closing barrier is separate, so
    /// nothing to do.
    pub fn for_static_fini(&self, loc: i32, gtid: i32) {
        tracing::debug!(loc, gtid, "for_static_fini");
    }
}
