//! Thread control block (C5).
//!
//! Grounded on the teacher's `process/thread.rs` for the stack-region/guard-
//! page conventions and the `ThreadId`/`ThreadState` newtypes; the NUMA-
//! aware TLS region and `ThreadBuilder` are dropped along with the rest of
//! the teacher's user-mode thread model (no ring-3, §1 Non-goals).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::context::Context;
use crate::process::pcb::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "tid{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Sleeping,
    Waiting(WaitReason),
    Joining,
    Zombie,
    Copying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Futex(u32),
    Lock(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Correctly,
    Panic,
    InitCode,
    ForkFail,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnState {
    Returned,
    Killed,
}

/// A cleanup action run once, when the owning thread is reaped.
pub enum ResourceCleanup {
    FreeStack { dir_phys: u32, base: u32, size: u32 },
    Custom(Box<dyn FnOnce() + Send>),
}

pub struct Thread {
    pub id: ThreadId,
    pub process: ProcessId,
    pub name: String,
    pub state: ThreadState,
    pub priority: u8,
    pub kstack_base: u32,
    pub kstack_size: u32,
    pub entry: extern "C" fn(u32) -> !,
    pub arg: u32,
    pub wakeup_ns: Option<u64>,
    pub joiner: Option<ThreadId>,
    pub return_value: i32,
    pub cause: TerminationCause,
    pub return_state: ReturnState,
    pub context: Context,
    pub resources: Vec<ResourceCleanup>,
}

impl Thread {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ThreadId,
        process: ProcessId,
        name: String,
        priority: u8,
        kstack_base: u32,
        kstack_size: u32,
        entry: extern "C" fn(u32) -> !,
        arg: u32,
        context: Context,
    ) -> Self {
        Self {
            id,
            process,
            name,
            state: ThreadState::Ready,
            priority,
            kstack_base,
            kstack_size,
            entry,
            arg,
            wakeup_ns: None,
            joiner: None,
            return_value: 0,
            cause: TerminationCause::Correctly,
            return_state: ReturnState::Returned,
            context,
            resources: Vec::new(),
        }
    }
}
