//! Per-parallel-region team state.
//!
//! One `Level` exists per nesting depth of a parallel region. Team size is
//! fixed at construction; every member observes the same `num_threads` and
//! `depth`. The parent is only consulted for its preferences while the child
//! is being built, so no long-lived back-reference exists.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Barrier;

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::scheduler::Message;

/// Default ceiling on nested parallelism: one active level.
const DEFAULT_MAX_ACTIVE_LEVELS: i32 = 1;

pub struct Level {
    /// Nesting depth; 0 is outside any parallel region.
    pub depth: i32,

    /// Team size, fixed at construction.
    pub num_threads: i32,

    max_active_level: AtomicI32,
    wanted_num_threads: AtomicI32,
    pushed_num_threads: AtomicI32,

    /// Team-wide rendezvous; absent for solo teams.
    barrier: Option<Barrier>,

    // Raw mutexes rather than RAII guards: the guest brackets its critical
    // and reduction sections across separate import calls, so lock and
    // unlock happen in different host stack frames.
    critical: RawMutex,
    reduce: RawMutex,
}

impl Level {
    /// The implicit serial region a fresh thread starts in.
    pub fn root() -> Self {
        Self {
            depth: 0,
            num_threads: 1,
            max_active_level: AtomicI32::new(DEFAULT_MAX_ACTIVE_LEVELS),
            wanted_num_threads: AtomicI32::new(default_team_size()),
            pushed_num_threads: AtomicI32::new(-1),
            barrier: None,
            critical: RawMutex::INIT,
            reduce: RawMutex::INIT,
        }
    }

    /// The team for the next nesting depth. The parent's preferences are
    /// copied out here and not referenced again.
    pub fn from_parent(parent: &Level, num_threads: i32) -> Self {
        Self {
            depth: parent.depth + 1,
            num_threads,
            max_active_level: AtomicI32::new(parent.max_active_level.load(Ordering::SeqCst)),
            wanted_num_threads: AtomicI32::new(parent.wanted_num_threads.load(Ordering::SeqCst)),
            pushed_num_threads: AtomicI32::new(-1),
            barrier: (num_threads > 1).then(|| Barrier::new(num_threads as usize)),
            critical: RawMutex::INIT,
            reduce: RawMutex::INIT,
        }
    }

    /// Team size for a region forked from this one, in priority order:
    /// pushed, then wanted, then inherited; clamped to 1 when the next depth
    /// would exceed the maximum active level.
    pub fn next_team_size(&self) -> i32 {
        if self.depth + 1 > self.max_active_level.load(Ordering::SeqCst) {
            return 1;
        }
        let pushed = self.pushed_num_threads.load(Ordering::SeqCst);
        if pushed > 0 {
            return pushed;
        }
        let wanted = self.wanted_num_threads.load(Ordering::SeqCst);
        if wanted > 0 {
            return wanted;
        }
        self.num_threads.max(1)
    }

    /// Consume a pushed team size preference.
    pub fn reset_pushed(&self) {
        self.pushed_num_threads.store(-1, Ordering::SeqCst);
    }

    pub fn max_active_level(&self) -> i32 {
        self.max_active_level.load(Ordering::SeqCst)
    }

    pub fn set_max_active_level(&self, level: i32) {
        if level < 0 {
            tracing::warn!(level, "trying to set a negative max active level");
            return;
        }
        self.max_active_level.store(level, Ordering::SeqCst);
    }

    pub fn set_wanted_num_threads(&self, num_threads: i32) {
        if num_threads <= 0 {
            tracing::warn!(num_threads, "ignoring non-positive team size request");
            return;
        }
        self.wanted_num_threads.store(num_threads, Ordering::SeqCst);
    }

    pub fn push_num_threads(&self, num_threads: i32) {
        if num_threads <= 0 {
            tracing::warn!(num_threads, "ignoring non-positive pushed team size");
            return;
        }
        self.pushed_num_threads.store(num_threads, Ordering::SeqCst);
    }

    /// Block until all team members have arrived. No-op for solo teams.
    pub fn barrier_wait(&self) {
        if self.num_threads <= 1 {
            return;
        }
        if let Some(barrier) = &self.barrier {
            barrier.wait();
        }
    }

    pub fn critical_enter(&self) {
        if self.num_threads > 1 {
            self.critical.lock();
        }
    }

    pub fn critical_exit(&self) {
        if self.num_threads > 1 {
            // Guest critical sections bracket enter/exit pairs; the lock is
            // held by construction when this runs.
            unsafe { self.critical.unlock() };
        }
    }

    pub fn reduce_enter(&self) {
        if self.num_threads > 1 {
            self.reduce.lock();
        }
    }

    pub fn reduce_exit(&self) {
        if self.num_threads > 1 {
            unsafe { self.reduce.unlock() };
        }
    }

    /// Record this team's shape into a sub-invocation message so a remote
    /// child can rebuild its parent's preferences from the snapshot.
    pub fn snapshot_into(&self, call: &mut Message) {
        call.omp_depth = self.depth;
        call.omp_max_active_levels = self.max_active_level.load(Ordering::SeqCst);
        call.omp_wanted_num_threads = self.wanted_num_threads.load(Ordering::SeqCst);
    }
}

fn default_team_size() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(1)
}
