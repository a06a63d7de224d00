//! Process control block (C5).
//!
//! Grounded on the teacher's `process/pcb.rs`: `ProcessId` newtype and
//! `Process` field shape kept, the richer `ProcessPriority`/`MemoryStats`/
//! `ProcessBuilder` trimmed — this crate's process carries only what
//! SPEC_FULL.md §3 names (parent, name, children, threads, address space,
//! main thread).

use alloc::{string::String, vec::Vec};

use crate::mm::AddressSpace;
use crate::process::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

/// The root kernel process every orphan is re-parented to on reap.
pub const ROOT_PID: ProcessId = ProcessId(0);

pub struct Process {
    pub id: ProcessId,
    pub parent: ProcessId,
    pub name: String,
    pub children: Vec<ProcessId>,
    pub threads: Vec<ThreadId>,
    pub main_thread: ThreadId,
    pub address_space: AddressSpace,
}

impl Process {
    pub fn new(
        id: ProcessId,
        parent: ProcessId,
        name: String,
        main_thread: ThreadId,
        address_space: AddressSpace,
    ) -> Self {
        Self { id, parent, name, children: Vec::new(), threads: alloc::vec![main_thread], main_thread, address_space }
    }
}
