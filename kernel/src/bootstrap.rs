//! Boot sequence (SPEC_FULL.md §2) and the kernel-wide panic path.
//!
//! Grounded on the teacher's `bootstrap.rs` stage-tracking shape, narrowed
//! from its twelve generic stages (hardware/memory/process/services/
//! drivers/user-space) to the seven components this crate actually has,
//! run in the dependency order §2 states: C2 first (so faults and IRQs can
//! be received), C1 feeding C2 controller addresses, C3 seeded from the
//! trampoline's memory map, C4 on top of C3, C5 once C4 is live, C7's tick
//! installed last before C5 is handed control, C6 routed on top of C2.

extern crate alloc;

use alloc::vec::Vec;

use crate::irq::TrapFrame;

/// CPU exception vector for `#PF`, the only exception this crate installs a
/// non-default handler for.
const PAGE_FAULT_VECTOR: u8 = 14;

/// Fixed low-memory address the trampoline leaves the boot-info structure
/// at (SPEC_FULL.md §6). The region is identity-mapped by the substrate the
/// trampoline hands off, same as the kernel's own low-startup pages.
const BOOT_INFO_ADDR: u32 = 0x0009_0000;

const TAG_MEMORY_MAP: u32 = 1;
const MEM_TYPE_AVAILABLE: u32 = 1;

#[repr(C)]
struct BootInfoHeader {
    total_size: u32,
    _reserved: u32,
}

#[repr(C)]
struct TagHeader {
    tag_type: u32,
    tag_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MemMapEntry {
    base: u64,
    len: u64,
    typ: u32,
    _pad: u32,
}

// Linker symbols delimiting the loaded kernel image, per SPEC_FULL.md §6.
// Provided by the trampoline's link step, not this crate.
extern "C" {
    static __kernel_text_start: u8;
    static __kernel_rodata_start: u8;
    static __kernel_rodata_end: u8;
    static __kernel_data_end: u8;
    static __kernel_bss_end: u8;
}

fn sym_addr(sym: &u8) -> u32 {
    sym as *const u8 as u32
}

/// Walk the trampoline's tagged boot-info structure and return the
/// AVAILABLE physical ranges as `(base, len)` pairs, dropping any entry
/// with `base > u32::MAX` per SPEC_FULL.md §6.
unsafe fn parse_memory_map(addr: u32) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let header = unsafe { &*(addr as *const BootInfoHeader) };
    let mut offset = core::mem::size_of::<BootInfoHeader>() as u32;

    while offset < header.total_size {
        let tag_addr = addr + offset;
        let tag = unsafe { &*(tag_addr as *const TagHeader) };
        if tag.tag_size == 0 {
            break;
        }
        if tag.tag_type == TAG_MEMORY_MAP {
            let entries_addr = tag_addr + core::mem::size_of::<TagHeader>() as u32;
            let entries_bytes = tag.tag_size - core::mem::size_of::<TagHeader>() as u32;
            let count = entries_bytes / core::mem::size_of::<MemMapEntry>() as u32;
            for i in 0..count {
                let entry =
                    unsafe { &*((entries_addr + i * core::mem::size_of::<MemMapEntry>() as u32) as *const MemMapEntry) };
                if entry.typ != MEM_TYPE_AVAILABLE || entry.base > u32::MAX as u64 {
                    continue;
                }
                let base = entry.base as u32;
                let end = entry.base.saturating_add(entry.len).min(u32::MAX as u64 + 1) as u64;
                let len = (end - entry.base as u64) as u32;
                if len > 0 {
                    ranges.push((base, len));
                }
            }
        }
        offset += tag.tag_size;
    }
    ranges
}

/// Remove `[excl_start, excl_end)` from every range in `ranges`, splitting
/// a range that straddles the excluded window into up to two pieces.
fn subtract_range(ranges: Vec<(u32, u32)>, excl_start: u32, excl_end: u32) -> Vec<(u32, u32)> {
    let mut result = Vec::with_capacity(ranges.len());
    for (base, len) in ranges {
        let end = base + len;
        if excl_end <= base || excl_start >= end {
            result.push((base, len));
            continue;
        }
        if base < excl_start {
            result.push((base, excl_start - base));
        }
        if excl_end < end {
            result.push((excl_end, end - excl_end));
        }
    }
    result
}

/// The kernel image's own physical extent, computed from the linker-
/// provided virtual bounds via the already-live recursive self-map.
fn kernel_image_phys_range() -> (u32, u32) {
    let start_virt = sym_addr(unsafe { &__kernel_text_start });
    let end_virt = sym_addr(unsafe { &__kernel_bss_end });
    let start_phys = crate::mm::virt_to_phys(start_virt).unwrap_or(start_virt);
    (start_phys, end_virt - start_virt)
}

/// Drop write permission on the kernel's text and rodata sections, per
/// SPEC_FULL.md §6 ("text/rodata read-only; data/bss/stacks/heap
/// writable"). Runs after `mm::init` so the recursive self-map is live.
fn protect_kernel_sections() {
    let text_start = sym_addr(unsafe { &__kernel_text_start });
    let rodata_start = sym_addr(unsafe { &__kernel_rodata_start });
    let rodata_end = sym_addr(unsafe { &__kernel_rodata_end });
    let data_end = sym_addr(unsafe { &__kernel_data_end });
    let _ = data_end; // data/bss stay writable; named for documentation symmetry.

    let _ = rodata_start;
    let mut virt = text_start;
    while virt < rodata_end {
        unsafe {
            let entry = crate::mm::page_table::raw_entry_mut(virt);
            *entry &= !crate::mm::page_table::FLAG_WRITABLE;
        }
        virt += crate::mm::page_table::PAGE_SIZE;
    }
}

/// Read the faulting address the CPU latches into CR2 on `#PF`.
fn read_cr2() -> u32 {
    let cr2: u32;
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    cr2
}

/// `#PF` handler: try copy-on-write promotion first (SPEC_FULL.md §4.4),
/// falling back to the fatal path only when the fault isn't a COW write.
fn page_fault_handler(frame: &mut TrapFrame) {
    let faulting_addr = read_cr2();
    if crate::mm::handle_write_fault(faulting_addr).is_err() {
        kernel_panic_trap("unhandled page fault", frame);
    }
}

/// Entry point called from `_start` once the architecture's very earliest
/// requirements (a valid stack, paging already enabled by the substrate
/// the trampoline hands off — see DESIGN.md's boot-paging decision) are
/// met. Brings up C2→C1→C3→C4→C5→C6→C7 in that order and hands off to the
/// scheduler. Never returns.
pub fn run() -> ! {
    crate::println!(
        "veridian-kernel-core {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown")
    );

    // C2 (+ C1 inside it): segmentation/traps, legacy PIC, platform
    // discovery, local/IO APIC.
    crate::irq::init();
    crate::irq::register_exception(PAGE_FAULT_VECTOR, page_fault_handler);
    if unsafe { crate::arch::init() }.is_err() {
        kernel_panic("architecture bring-up failed");
    }

    // C3 + C4: seed the frame allocator from the trampoline's memory map
    // (kernel image excluded) and build the kernel's own address space.
    let raw_ranges = unsafe { parse_memory_map(BOOT_INFO_ADDR) };
    let (kimg_base, kimg_len) = kernel_image_phys_range();
    let ranges = subtract_range(raw_ranges, kimg_base, kimg_base + kimg_len);
    crate::mm::init(&ranges);
    protect_kernel_sections();
    if unsafe { crate::mm::heap::init() }.is_err() {
        kernel_panic("kernel heap bring-up failed");
    }

    // C5: root process and idle thread.
    crate::process::init();
    crate::sched::init();

    // C6: system-call dispatch, routed on top of C2.
    crate::syscall::init();

    // C7: periodic tick, installed last, then hand off forever.
    let have_apic = crate::acpi::with_info(|_| ()).is_some();
    crate::timer::init(have_apic);

    crate::println!("veridian-kernel-core up, entering scheduler");
    crate::sched::run()
}

/// Print a message and halt. The unrecoverable-failure path for boot
/// sequencing errors that have no CPU trap frame to report alongside.
pub fn kernel_panic(msg: &str) -> ! {
    crate::println!("[KERNEL PANIC] {}", msg);
    crate::arch::halt()
}

/// Print a message alongside the trap frame that triggered it, then halt.
/// Called by `irq`'s default exception handler for any CPU exception with
/// no registered handler.
pub fn kernel_panic_trap(msg: &str, frame: &TrapFrame) -> ! {
    crate::println!(
        "[KERNEL PANIC] {} (vector={} error_code={:#x} eip={:#010x} eflags={:#010x})",
        msg,
        frame.vector,
        frame.error_code,
        frame.eip,
        frame.eflags
    );
    crate::arch::halt()
}
