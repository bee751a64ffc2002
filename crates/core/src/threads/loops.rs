//! Static loop partitioning.
//!
//! Computes the `[lower, upper, stride, lastIter]` tuple each team member
//! uses to drive its slice of a statically scheduled parallel loop.

use crate::error::Trap;

/// Lower bound of the unordered schedule kinds.
pub const SCH_LOWER: i32 = 32;
/// Static schedule with an explicit chunk size.
pub const SCH_STATIC_CHUNKED: i32 = 33;
/// Static unspecialised (balanced) schedule.
pub const SCH_STATIC: i32 = 34;

/// A thread's slice of a static loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticPartition {
    pub lower: i32,
    pub upper: i32,
    pub stride: i32,
    pub last_iter: bool,
}

/// Partition `[lower, upper]` with increment `incr` across a team of
/// `num_threads`, returning thread `tid`'s bounds.
pub fn partition_static(
    schedule: i32,
    num_threads: i32,
    tid: i32,
    lower: i32,
    upper: i32,
    incr: i32,
    chunk: i32,
) -> Result<StaticPartition, Trap> {
    if num_threads == 1 {
        let stride = if incr > 0 {
            (upper as i64 - lower as i64 + 1) as i32
        } else {
            -((lower as i64 - upper as i64 + 1) as i32)
        };
        return Ok(StaticPartition {
            lower,
            upper,
            stride,
            last_iter: true,
        });
    }

    let trip_count: u32 = if incr == 1 {
        (upper as i64 - lower as i64 + 1) as u32
    } else if incr == -1 {
        (lower as i64 - upper as i64 + 1) as u32
    } else if incr > 0 {
        ((upper as i64 - lower as i64) / incr as i64 + 1) as u32
    } else {
        ((lower as i64 - upper as i64) / -(incr as i64) + 1) as u32
    };

    match schedule {
        SCH_STATIC_CHUNKED => {
            let chunk = chunk.max(1);
            let span = chunk * incr;
            let lower = lower + span * tid;
            Ok(StaticPartition {
                lower,
                upper: lower + span - incr,
                stride: span * num_threads,
                last_iter: tid as u32 == ((trip_count - 1) / chunk as u32) % num_threads as u32,
            })
        }
        SCH_STATIC => {
            let (lower, upper, last_iter) = if trip_count < num_threads as u32 {
                tracing::warn!(trip_count, num_threads, "loop shorter than team");
                if (tid as u32) < trip_count {
                    let slot = lower + tid * incr;
                    (slot, slot, tid as u32 == trip_count - 1)
                } else {
                    // Empty range: lower past upper in iteration order.
                    (upper + incr, upper, tid as u32 == trip_count - 1)
                }
            } else {
                let small_chunk = (trip_count / num_threads as u32) as i32;
                let extras = (trip_count % num_threads as u32) as i32;
                let lower = lower + incr * (tid * small_chunk + tid.min(extras));
                let upper = lower + small_chunk * incr - if tid < extras { 0 } else { incr };
                (lower, upper, tid == num_threads - 1)
            };
            Ok(StaticPartition {
                lower,
                upper,
                stride: trip_count as i32,
                last_iter,
            })
        }
        other => {
            tracing::error!(schedule = other, "unimplemented loop schedule");
            Err(Trap::UnsupportedSchedule(other))
        }
    }
}
