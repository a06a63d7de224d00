//! Process and thread control blocks (C5).
//!
//! Grounded on the teacher's `process/mod.rs` entry points
//! (`current_process`/`current_thread`/`init`), narrowed to what
//! SPEC_FULL.md §4.5 names; `set_thread_affinity` and the NUMA-aware
//! creation helpers are dropped (no SMP scheduling beyond discovery, §1
//! Non-goals).

extern crate alloc;

pub mod fork;
pub mod pcb;
pub mod table;
pub mod thread;
pub mod wait;

use alloc::string::String;

use pcb::{Process, ProcessId, ROOT_PID};
use thread::{Thread, ThreadId};

extern "C" fn root_idle_entry(_arg: u32) -> ! {
    crate::sched::idle_loop()
}

/// Build the root kernel process (pid 0), wrapping the kernel's own
/// address space, with the idle thread as its main thread.
pub fn init() {
    let dir_phys = crate::mm::kernel_space()
        .as_ref()
        .expect("mm::init must run before process::init")
        .dir_phys;
    let space = crate::mm::AddressSpace::wrap_existing(dir_phys);

    let idle_tid = table::alloc_tid();
    let idle = Thread::new(
        idle_tid,
        ROOT_PID,
        String::from("idle"),
        crate::sched::scheduler::IDLE_PRIORITY,
        0,
        0,
        root_idle_entry,
        0,
        crate::arch::context::Context::null(),
    );
    table::insert_thread(idle);

    let root = Process::new(ROOT_PID, ROOT_PID, String::from("root"), idle_tid, space);
    table::insert_process(root);

    crate::sched::scheduler::set_idle(idle_tid);
}

pub fn current_process_id() -> Option<ProcessId> {
    crate::sched::scheduler::active_process()
}

pub fn current_thread_id() -> Option<ThreadId> {
    crate::sched::scheduler::active_thread()
}
