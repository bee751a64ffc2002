//! Scheduler and message-bus collaborator contracts.
//!
//! The distributed scheduler and its message bus live outside this crate.
//! The runtime consumes four operations: submit an invocation, await its
//! result with a timeout, and the awaiting/finished-awaiting notifications
//! that release and reclaim this worker's scheduling slot while it blocks on
//! sub-invocations.

use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_CALL_ID: AtomicI32 = AtomicI32::new(1);

/// One function invocation as carried by the message bus.
///
/// The `omp_*` fields are populated when the invocation is a member of a
/// distributed parallel region: the snapshot to restore, the microtask
/// table index, the shared-variable pointers, and the member's position in
/// its team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i32,
    pub user: String,
    pub function: String,
    pub is_async: bool,
    pub is_python: bool,
    pub python_user: String,
    pub python_function: String,
    pub scheduled_node: String,
    pub return_value: i32,

    pub snapshot_key: String,
    pub snapshot_size: usize,
    pub func_ptr: i32,
    pub omp_thread_num: i32,
    pub omp_num_threads: i32,
    pub omp_function_args: Vec<i32>,
    pub omp_depth: i32,
    pub omp_max_active_levels: i32,
    pub omp_wanted_num_threads: i32,
}

impl Message {
    /// A fresh message with a process-unique call id.
    pub fn factory(user: &str, function: &str) -> Self {
        Self {
            id: NEXT_CALL_ID.fetch_add(1, Ordering::SeqCst),
            user: user.to_owned(),
            function: function.to_owned(),
            ..Self::default()
        }
    }

    /// Short human-readable form for log records.
    pub fn label(&self) -> String {
        format!("{}/{}:{}", self.user, self.function, self.id)
    }
}

/// Submission side of the external scheduler.
pub trait Scheduler: Send + Sync {
    /// Submit an invocation. `block` waits for local execution to complete
    /// (used only for warmup calls).
    fn call_function(&self, msg: Message, block: bool);

    /// This worker is about to block awaiting sub-invocations; release its
    /// scheduling slot so dependent work can land here.
    fn notify_awaiting(&self, msg: &Message);

    /// The await is over; reclaim the slot.
    fn notify_finished_awaiting(&self, msg: &Message);
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// No result arrived for the call within the timeout.
    #[error("no response for call {0} within {1} ms")]
    NoResponse(i32, u64),

    #[error("message bus failure: {0}")]
    Other(String),
}

/// Result/queue side of the external message bus.
pub trait MessageBus: Send + Sync {
    /// Await the result of a previously submitted call.
    fn get_function_result(&self, call_id: i32, timeout_ms: u64) -> Result<Message, BusError>;

    /// Pop the next inbound invocation for this host's queue.
    fn next_message(&self, timeout_ms: u64) -> Result<Message, BusError>;
}
