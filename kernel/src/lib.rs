//! veridian-kernel-core: the i386 kernel core SPEC_FULL.md describes.
//!
//! Platform discovery (C1), the interrupt fabric (C2), the physical frame
//! allocator (C3), the virtual memory manager (C4), the priority scheduler
//! and process/thread control blocks (C5), system-call dispatch (C6), and
//! the timer abstraction (C7). Device drivers other than the serial port,
//! the filesystem layer, the boot trampoline, and user-mode execution are
//! all out of scope (§1) and live outside this crate.

#![no_std]

extern crate alloc;

use linked_list_allocator::LockedHeap;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[macro_use]
pub mod print;

pub mod acpi;
pub mod arch;
pub mod bootstrap;
pub mod error;
pub mod irq;
pub mod mm;
pub mod process;
pub mod raii;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;
pub mod timer;
