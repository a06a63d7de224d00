//! `fork()` (C5/C4): copy the calling thread into a new process.
//!
//! Grounded on the teacher's `process/fork.rs` shape (clone address space,
//! clone the calling thread's context, insert the child into the tables,
//! schedule it) but without a syscall frame to seed the child's registers
//! from — there is no ring-3 entry path here (§1 Non-goals), so the only
//! CPU state `fork` has to hand the child is its own kernel stack. The
//! dual-return is built on that stack directly instead.

use alloc::format;
use alloc::string::String;

use crate::arch::context::{fork_capture, patch_resume_frame, Context};
use crate::error::{KernelError, KernelResult};
use crate::process::pcb::Process;
use crate::process::table;
use crate::process::thread::{Thread, ThreadState};
use crate::sched::scheduler;

/// Copy the calling thread into a new process and thread, sharing only the
/// copy-on-write pages `clone_address_space` marks. Per SPEC_FULL.md §4.5:
/// returns the child's pid to the parent and `0` to the child.
///
/// The trick that makes one function body produce two different callers:
/// `fork_capture` captures the parent's own stack pointer at a point where
/// the only thing left on the stack above it is a return address back into
/// this function, in exactly the five-word shape `switch_to`'s epilogue
/// expects. That captured frame is copied byte-for-byte into the child's
/// (already deep-copied) kernel stack at the same virtual address. The
/// first time the scheduler ever switches to the child thread, it resumes
/// not at some synthetic entry point but right here, as if this very call
/// to `fork_capture` had just returned a second time. The two resumes are
/// told apart by asking the scheduler who is currently running.
pub fn fork() -> KernelResult<i32> {
    crate::irq::with_critical_section(|| -> KernelResult<i32> {
        let parent_tid = scheduler::active_thread().ok_or(KernelError::NotInitialized)?;
        let parent_pid = scheduler::active_process().ok_or(KernelError::NotInitialized)?;

        let (kstack_base, kstack_size, priority, entry, arg) = {
            let threads = table::threads().lock();
            let t = threads.get(&parent_tid).ok_or(KernelError::NoSuchId)?;
            (t.kstack_base, t.kstack_size, t.priority, t.entry, t.arg)
        };

        let (child_space, parent_name) = {
            let processes = table::processes().lock();
            let parent = processes.get(&parent_pid).ok_or(KernelError::NoSuchId)?;
            let space =
                crate::mm::clone_address_space(&parent.address_space, (kstack_base, kstack_size))?;
            (space, parent.name.clone())
        };
        let child_dir_phys = child_space.dir_phys;

        let child_pid = table::alloc_pid();
        let child_tid = table::alloc_tid();

        let child_thread = Thread::new(
            child_tid,
            child_pid,
            format!("{parent_name}-fork"),
            priority,
            kstack_base,
            kstack_size,
            entry,
            arg,
            Context::null(),
        );
        table::insert_thread(child_thread);

        let child_process =
            Process::new(child_pid, parent_pid, String::from(parent_name.as_str()), child_tid, child_space);
        table::insert_process(child_process);
        if let Some(parent) = table::processes().lock().get_mut(&parent_pid) {
            parent.children.push(child_pid);
        }

        // The child's eventual resume lands immediately after this call to
        // `fork_capture` returns, with `frame` and `captured_esp` holding
        // whatever garbage was last in memory and `eax` at that point — so
        // the very next thing either path does is find out which one it is,
        // before touching either.
        let mut frame = [0u8; 24];
        let captured_esp = unsafe { fork_capture(frame.as_mut_ptr()) };
        let is_child = scheduler::active_thread() == Some(child_tid);

        if !is_child {
            unsafe { patch_resume_frame(child_dir_phys, captured_esp, &frame) };
            if let Some(thread) = table::threads().lock().get_mut(&child_tid) {
                thread.context = Context(captured_esp);
                thread.state = ThreadState::Ready;
            }
            scheduler::enqueue_ready(priority, child_tid);
        }

        if is_child {
            Ok(0)
        } else {
            Ok(child_pid.0 as i32)
        }
    })
}
