//! `waitpid()` and process teardown (C5).
//!
//! Grounded on the teacher's `process/wait.rs` zombie-collection half
//! (reap-then-remove-from-parent); the POSIX `WaitOptions`/`WaitStatus`
//! encoding and the non-blocking/signal-interrupt paths are dropped —
//! SPEC_FULL.md §4.5 names a single blocking `waitpid(pid)` with no option
//! flags and no signals.

use crate::error::{KernelError, KernelResult};
use crate::mm::{frame_allocator, page_table};
use crate::process::pcb::{ProcessId, ROOT_PID};
use crate::process::table;
use crate::process::thread::TerminationCause;
use crate::sched::scheduler;

/// Wait for the child `pid` to terminate, then fully tear it down.
///
/// Per SPEC_FULL.md §4.5: finds a child with the given pid by a linear scan
/// of the caller's children list, joins its main thread (blocking if it
/// has not exited yet), then frees the child's process. Fails with
/// `NoSuchId` if `pid` does not name a child of the calling process.
pub fn waitpid(pid: ProcessId) -> KernelResult<(i32, TerminationCause)> {
    let caller_pid = scheduler::active_process().ok_or(KernelError::NotInitialized)?;
    {
        let processes = table::processes().lock();
        let caller = processes.get(&caller_pid).ok_or(KernelError::NoSuchId)?;
        if !caller.children.contains(&pid) {
            return Err(KernelError::NoSuchId);
        }
    }

    let main_thread = {
        let processes = table::processes().lock();
        processes.get(&pid).ok_or(KernelError::NoSuchId)?.main_thread
    };

    let (value, cause) = scheduler::join(main_thread)?;

    reap_process(pid);
    if let Some(caller) = table::processes().lock().get_mut(&caller_pid) {
        caller.children.retain(|&c| c != pid);
    }

    Ok((value, cause))
}

/// Free a terminated child's remaining threads, re-parent any grandchildren
/// to the root process, release its address space, and drop its control
/// block. The child's main thread has already been reaped by the `join` in
/// `waitpid`; any others left behind (only possible if the child forked and
/// was waited on before its own fork children exited) are dropped here
/// without running their resource cleanups, since the whole address space
/// they'd free is about to go with the rest of the process anyway.
fn reap_process(pid: ProcessId) {
    let process = match table::remove_process(pid) {
        Some(p) => p,
        None => return,
    };

    for &grandchild in &process.children {
        if let Some(g) = table::processes().lock().get_mut(&grandchild) {
            g.parent = ROOT_PID;
        }
        if let Some(root) = table::processes().lock().get_mut(&ROOT_PID) {
            root.children.push(grandchild);
        }
    }

    for &tid in &process.threads {
        table::remove_thread(tid);
    }

    teardown_address_space(process.address_space.dir_phys);
}

/// Release every frame and leaf table referenced below `KERNEL_SPLIT` in
/// `dir_phys`, then the directory frame itself.
fn teardown_address_space(dir_phys: u32) {
    let current = unsafe { page_table::current_directory_phys() };
    let switched = current != dir_phys;
    if switched {
        unsafe { page_table::switch_directory(dir_phys) };
    }
    let _ = page_table::unmap_range(0, page_table::KERNEL_SPLIT);
    if switched {
        unsafe { page_table::switch_directory(current) };
    }
    let _ = frame_allocator::free_frames(dir_phys, 1);
}
