//! Global process/thread tables and id allocation (C5).
//!
//! Grounded on the teacher's `process/table.rs` fixed-capacity-array idiom,
//! replaced with `BTreeMap`s keyed by id — this crate has no fixed
//! `MAX_PROCESSES` budget in SPEC_FULL, and reaping must be able to remove
//! an arbitrary id rather than clear a fixed slot.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::process::pcb::{Process, ProcessId};
use crate::process::thread::{Thread, ThreadId};

static NEXT_PID: AtomicU64 = AtomicU64::new(1);
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

// Table entries are boxed so a thread's or process's address stays stable
// across tree rebalancing — the scheduler keeps raw pointers into a boxed
// `Thread` across the context switch that takes it off the CPU.
static PROCESSES: Mutex<BTreeMap<ProcessId, Box<Process>>> = Mutex::new(BTreeMap::new());
static THREADS: Mutex<BTreeMap<ThreadId, Box<Thread>>> = Mutex::new(BTreeMap::new());

pub fn processes() -> &'static Mutex<BTreeMap<ProcessId, Box<Process>>> {
    &PROCESSES
}

pub fn threads() -> &'static Mutex<BTreeMap<ThreadId, Box<Thread>>> {
    &THREADS
}

pub fn insert_process(process: Process) {
    PROCESSES.lock().insert(process.id, Box::new(process));
}

pub fn remove_process(pid: ProcessId) -> Option<Box<Process>> {
    PROCESSES.lock().remove(&pid)
}

pub fn process_exists(pid: ProcessId) -> bool {
    PROCESSES.lock().contains_key(&pid)
}

pub fn insert_thread(thread: Thread) {
    THREADS.lock().insert(thread.id, Box::new(thread));
}

pub fn remove_thread(tid: ThreadId) -> Option<Box<Thread>> {
    THREADS.lock().remove(&tid)
}
