//! Implicit per-thread runtime state.
//!
//! Every runtime import needs to know which team the calling thread belongs
//! to and its number within that team. The fork engine installs this cell on
//! thread entry; threads that were never forked (the serial top level) get a
//! lazily created root context.

use std::cell::RefCell;
use std::sync::Arc;

use crate::scheduler::Message;

use super::level::Level;

pub struct ThreadContext {
    pub level: Arc<Level>,
    pub thread_num: i32,
}

impl ThreadContext {
    fn root() -> Self {
        Self {
            level: Arc::new(Level::root()),
            thread_num: 0,
        }
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
    static EXECUTING_CALL: RefCell<Option<Message>> = const { RefCell::new(None) };
}

/// Install the calling thread's team membership. Called by the fork engine
/// on each spawned team member.
pub fn enter(level: Arc<Level>, thread_num: i32) {
    CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = Some(ThreadContext { level, thread_num });
    });
}

/// The calling thread's current team, creating the serial root on first use.
pub fn current_level() -> Arc<Level> {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.get_or_insert_with(ThreadContext::root).level.clone()
    })
}

/// The calling thread's number within its team; 0 designates the master.
pub fn thread_num() -> i32 {
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.get_or_insert_with(ThreadContext::root).thread_num
    })
}

/// Bind the invocation message being executed on this thread. The
/// distributed fork path derives user, function and call id from it.
pub fn set_executing_call(msg: Option<Message>) {
    EXECUTING_CALL.with(|call| {
        *call.borrow_mut() = msg;
    });
}

pub fn executing_call() -> Option<Message> {
    EXECUTING_CALL.with(|call| call.borrow().clone())
}
