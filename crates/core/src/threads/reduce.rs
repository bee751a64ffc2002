//! End-of-loop reduction coordination.
//!
//! Local teams reduce under the team's reduce mutex (or skip coordination
//! entirely when solo). Distributed teams never combine guest-side: each
//! member folds its partial into the shared accumulator, and the fork engine
//! performs the final combine after the join.

use crate::error::Trap;

use super::context;
use super::level::Level;
use super::OmpRuntime;

/// Key of the shared reduction accumulator in the external store.
pub const REDUCE_KEY: &str = "omp_wowzoid";

/// Sentinel telling the guest no combine step is needed. Any value other
/// than 1 (critical) and 2 (atomic) works; this mirrors the empty reduce
/// block constant of the guest's OpenMP runtime.
pub const EMPTY_REDUCE_BLOCK: i32 = 4 << 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReductionMethod {
    /// Caller runs the reduction while holding the reduce mutex.
    Critical,
    /// Caller combines with atomics; currently never selected locally.
    Atomic,
    /// Solo team: no coordination needed.
    Empty,
}

fn method_for(level: &Level) -> ReductionMethod {
    if level.num_threads == 1 {
        ReductionMethod::Empty
    } else {
        ReductionMethod::Critical
    }
}

/// Returns 1 when the caller should reduce under the held mutex, 2 for
/// atomic reduction, 0 when no reduction is needed.
fn begin_reduction(level: &Level) -> i32 {
    match method_for(level) {
        ReductionMethod::Critical => {
            tracing::debug!(thread = context::thread_num(), "reduction locking");
            level.reduce_enter();
            1
        }
        ReductionMethod::Empty => 0,
        ReductionMethod::Atomic => 2,
    }
}

fn end_reduction(level: &Level) {
    // Unlocking a mutex the team never locked is undefined; solo teams took
    // the Empty path and hold nothing.
    if level.num_threads > 1 {
        tracing::debug!(thread = context::thread_num(), "reduction unlocking");
        level.reduce_exit();
    }
}

impl OmpRuntime {
    /// `__kmpc_reduce`: blocking reduce with an implicit barrier.
    pub fn reduce(
        &self,
        loc: i32,
        gtid: i32,
        num_vars: i32,
        reduce_size: i32,
        reduce_data: i32,
        reduce_func: i32,
        lck: i32,
    ) -> Result<i32, Trap> {
        tracing::debug!(
            loc,
            gtid,
            num_vars,
            reduce_size,
            reduce_data,
            reduce_func,
            lck,
            "reduce"
        );
        Ok(begin_reduction(&context::current_level()))
    }

    /// `__kmpc_reduce_nowait`: reduce without the trailing barrier.
    ///
    /// In distributed mode the guest hands over `reduce_data`, a pointer to
    /// a pointer to its partial value; the partial is folded into the shared
    /// accumulator here and the guest performs no combine of its own.
    pub fn reduce_nowait(
        &self,
        loc: i32,
        gtid: i32,
        num_vars: i32,
        reduce_size: i32,
        reduce_data: i32,
        reduce_func: i32,
        lck: i32,
    ) -> Result<i32, Trap> {
        tracing::debug!(
            loc,
            gtid,
            num_vars,
            reduce_size,
            reduce_data,
            reduce_func,
            lck,
            "reduce_nowait"
        );

        if !self.is_distributed() {
            return Ok(begin_reduction(&context::current_level()));
        }

        let memory = self.executor.memory();
        let partial_ptr = memory.read_u32(reduce_data as u32)?;
        let partial = memory.read_i32(partial_ptr)?;
        tracing::debug!(thread = context::thread_num(), partial, "accumulating partial");
        self.state.incr_by_long(REDUCE_KEY, partial as i64);
        Ok(EMPTY_REDUCE_BLOCK)
    }

    /// `__kmpc_end_reduce`.
    pub fn end_reduce(&self, loc: i32, gtid: i32, lck: i32) -> Result<(), Trap> {
        tracing::debug!(loc, gtid, lck, "end_reduce");
        if self.is_distributed() {
            return Err(Trap::DistributedReduceEnd);
        }
        end_reduction(&context::current_level());
        Ok(())
    }

    /// `__kmpc_end_reduce_nowait`.
    pub fn end_reduce_nowait(&self, loc: i32, gtid: i32, lck: i32) -> Result<(), Trap> {
        tracing::debug!(loc, gtid, lck, "end_reduce_nowait");
        if self.is_distributed() {
            return Err(Trap::DistributedReduceEnd);
        }
        end_reduction(&context::current_level());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::context;
    use super::super::level::Level;
    use super::*;

    #[test]
    fn solo_team_needs_no_combine() {
        std::thread::spawn(|| {
            let level = context::current_level();
            assert_eq!(level.num_threads, 1);
            assert_eq!(begin_reduction(&level), 0);
            end_reduction(&level); // must not touch the mutex
        })
        .join()
        .unwrap();
    }

    #[test]
    fn team_reduction_serialises_under_the_mutex() {
        let team = Arc::new(Level::from_parent(&Level::root(), 4));
        let total = Arc::new(std::sync::Mutex::new(0i32));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let team = team.clone();
            let total = total.clone();
            handles.push(std::thread::spawn(move || {
                assert_eq!(begin_reduction(&team), 1);
                *total.lock().unwrap() += 1;
                end_reduction(&team);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*total.lock().unwrap(), 4);
    }
}
