//! The parallel fork engine.
//!
//! `fork_call` fans a guest's parallel region into a team. In local mode the
//! team is host threads sharing the module's linear memory; in distributed
//! mode it is asynchronous sub-invocations restored from a module snapshot
//! on other hosts. The two modes share little beyond argument extraction,
//! so they are separate functions selected at entry.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crate::engine::ThreadSpec;
use crate::error::Trap;
use crate::scheduler::{BusError, Message};

use super::context;
use super::level::Level;
use super::reduce::REDUCE_KEY;
use super::OmpRuntime;

/// Stack size for spawned team members (2 MiB).
pub const OMP_STACK_SIZE: usize = 2 * 1024 * 1024;

impl OmpRuntime {
    /// `__kmpc_fork_call(locPtr, argc, microtaskPtr, argsPtr)`.
    ///
    /// `microtask_ptr` indexes the module's function table; `args_ptr`
    /// addresses `argc` packed 32-bit words, each a guest pointer to one
    /// shared variable.
    pub fn fork_call(
        &self,
        loc_ptr: i32,
        argc: i32,
        microtask_ptr: i32,
        args_ptr: i32,
    ) -> Result<(), Trap> {
        tracing::debug!(loc_ptr, argc, microtask_ptr, args_ptr, "fork_call");

        if self.is_distributed() {
            self.distributed_fork(argc, microtask_ptr, args_ptr)
        } else {
            self.local_fork(argc, microtask_ptr, args_ptr)
        }
    }

    fn shared_variable_ptrs(&self, argc: i32, args_ptr: i32) -> Result<Vec<u32>, Trap> {
        if argc <= 0 {
            return Ok(Vec::new());
        }
        Ok(self.executor.memory().read_u32s(args_ptr as u32, argc as u32)?)
    }

    fn local_fork(&self, argc: i32, microtask_ptr: i32, args_ptr: i32) -> Result<(), Trap> {
        let microtask = self.executor.microtask(microtask_ptr)?;

        let level = context::current_level();
        let num_threads = level.next_team_size();
        level.reset_pushed();
        let team = Arc::new(Level::from_parent(&level, num_threads));

        let arg_ptrs = self.shared_variable_ptrs(argc, args_ptr)?;

        let mut handles = Vec::with_capacity(num_threads as usize);
        for tid in 0..num_threads {
            // Thread number, shared-variable count, then the pointers to the
            // shared variables themselves.
            let mut args = Vec::with_capacity(2 + arg_ptrs.len());
            args.push(tid);
            args.push(argc);
            args.extend(arg_ptrs.iter().map(|&p| p as i32));

            let spec = ThreadSpec {
                microtask: microtask.clone(),
                args,
                tid,
                stack_size: OMP_STACK_SIZE,
            };
            let executor = self.executor.clone();
            let team = team.clone();

            let handle = thread::Builder::new()
                .name(format!("omp-{tid}"))
                .stack_size(OMP_STACK_SIZE)
                .spawn(move || {
                    context::enter(team, tid);
                    executor.execute_thread(&spec)
                })
                .map_err(|e| Trap::ThreadSpawn(e.to_string()))?;
            handles.push(handle);
        }

        let mut num_errors: i64 = 0;
        for handle in handles {
            match handle.join() {
                Ok(0) => {}
                Ok(code) => {
                    tracing::error!(code, "team member returned non-zero");
                    num_errors += 1;
                }
                Err(_) => {
                    tracing::error!("team member panicked");
                    num_errors += 1;
                }
            }
        }

        if num_errors > 0 {
            return Err(Trap::WorkerErrors(num_errors));
        }
        Ok(())
    }

    fn distributed_fork(&self, argc: i32, microtask_ptr: i32, args_ptr: i32) -> Result<(), Trap> {
        let level = context::current_level();
        let num_threads = level.next_team_size();
        tracing::info!(num_threads, "distributing parallel region");

        let parent_call = context::executing_call().unwrap_or_else(|| {
            tracing::warn!("no executing call bound; deriving sub-calls from a blank parent");
            Message::default()
        });

        self.state.set_long(REDUCE_KEY, 0);

        let (snapshot_key, snapshot_size) = {
            let mut active = self.active_snapshot.lock();
            if let Some((key, _)) = active.as_ref() {
                return Err(Trap::SnapshotActive(key.clone()));
            }
            let key = format!("omp_snapshot_{}", parent_call.id);
            let size = self.executor.snapshot(&key)?;
            *active = Some((key.clone(), size));
            (key, size)
        };

        let arg_ptrs = self.shared_variable_ptrs(argc, args_ptr)?;
        let reduce_dest = arg_ptrs.first().copied();

        let mut chained = Vec::with_capacity(num_threads as usize);
        for tid in 0..num_threads {
            let mut call = Message::factory(&parent_call.user, &parent_call.function);
            call.is_async = true;
            call.omp_function_args = arg_ptrs.iter().map(|&p| p as i32).collect();
            call.snapshot_key = snapshot_key.clone();
            call.snapshot_size = snapshot_size;
            call.func_ptr = microtask_ptr;
            call.omp_thread_num = tid;
            call.omp_num_threads = num_threads;
            level.snapshot_into(&mut call);

            chained.push(call.id);
            tracing::info!(
                parent = %parent_call.label(),
                child = %call.label(),
                microtask_ptr,
                "forked remote team member"
            );
            self.scheduler.call_function(call, false);
        }

        // Await every member before failing: partial joins would leave live
        // sub-invocations mutating the shared accumulator.
        let timeout_ms = self.config.chained_call_timeout_ms;
        let mut num_errors: i64 = 0;
        for (tid, &call_id) in chained.iter().enumerate() {
            tracing::info!(tid, call_id, timeout_ms, "waiting for remote team member");

            self.scheduler.notify_awaiting(&parent_call);
            let return_code = match self.bus.get_function_result(call_id, timeout_ms) {
                Ok(result) => result.return_value,
                Err(BusError::NoResponse(..)) => {
                    tracing::error!(call_id, "timed out waiting for chained call");
                    1
                }
                Err(err) => {
                    tracing::error!(call_id, %err, "failed waiting for chained call");
                    1
                }
            };
            self.scheduler.notify_finished_awaiting(&parent_call);

            if return_code != 0 {
                num_errors += 1;
            }
        }

        if num_errors > 0 {
            return Err(Trap::WorkerErrors(num_errors));
        }

        // Argument zero is the reduction destination by convention; store
        // the accumulated value back into the guest.
        match reduce_dest {
            Some(ptr) => {
                let total = self.state.get_long(REDUCE_KEY);
                tracing::debug!(total, "storing distributed reduction result");
                self.executor.memory().write_i32(ptr, total as i32)?;
            }
            None => tracing::warn!("distributed fork with no shared variables; skipping reduction"),
        }
        Ok(())
    }

    pub(super) fn is_distributed(&self) -> bool {
        self.devices.load(Ordering::SeqCst) != 1
    }
}
