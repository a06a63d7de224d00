//! Global descriptor table and task-state segment (i386).
//!
//! No ring-3 segments are built here (§1 Non-goals: no user-mode execution),
//! unlike the teacher's long-mode GDT which carried a full kernel/user code
//! and data quartet. The TSS still exists and is loaded per SPEC_FULL.md
//! §4.2's boot sequence; on this single-ring kernel it never backs a
//! privilege-level stack switch, but `set_kernel_stack` is kept so a future
//! ring transition has somewhere to plug in.

use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const TSS_SELECTOR: u16 = 0x18;

const ACCESS_PRESENT: u8 = 1 << 7;
const ACCESS_RING0: u8 = 0 << 5;
const ACCESS_DESC_TYPE: u8 = 1 << 4; // code/data, not a system descriptor
const ACCESS_EXECUTABLE: u8 = 1 << 3;
const ACCESS_RW: u8 = 1 << 1; // readable (code) / writable (data)
const ACCESS_TSS_AVAILABLE: u8 = 0x09;

const GRAN_4K: u8 = 1 << 7;
const GRAN_32BIT: u8 = 1 << 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (granularity & 0xF0) | (((limit >> 16) & 0x0F) as u8),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

/// 32-bit task-state segment, i386 hardware layout (104 bytes, IO-map base
/// field included for completeness though no IO bitmap is installed).
#[repr(C, packed)]
pub struct TaskStateSegment {
    link: u16,
    _r0: u16,
    pub esp0: u32,
    pub ss0: u16,
    _r1: u16,
    esp1: u32,
    ss1: u16,
    _r2: u16,
    esp2: u32,
    ss2: u16,
    _r3: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    _r4: u16,
    cs: u16,
    _r5: u16,
    ss: u16,
    _r6: u16,
    ds: u16,
    _r7: u16,
    fs: u16,
    _r8: u16,
    gs: u16,
    _r9: u16,
    ldt: u16,
    _r10: u16,
    trap: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            link: 0, _r0: 0, esp0: 0, ss0: 0, _r1: 0,
            esp1: 0, ss1: 0, _r2: 0, esp2: 0, ss2: 0, _r3: 0,
            cr3: 0, eip: 0, eflags: 0,
            eax: 0, ecx: 0, edx: 0, ebx: 0, esp: 0, ebp: 0, esi: 0, edi: 0,
            es: 0, _r4: 0, cs: 0, _r5: 0, ss: 0, _r6: 0, ds: 0, _r7: 0,
            fs: 0, _r8: 0, gs: 0, _r9: 0, ldt: 0, _r10: 0,
            trap: 0, iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

lazy_static! {
    static ref TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());
}

#[repr(C, packed)]
struct DtPointer {
    limit: u16,
    base: u32,
}

lazy_static! {
    static ref GDT: [GdtEntry; 4] = [
        GdtEntry::null(),
        GdtEntry::new(
            0,
            0xFFFFF,
            ACCESS_PRESENT | ACCESS_RING0 | ACCESS_DESC_TYPE | ACCESS_EXECUTABLE | ACCESS_RW,
            GRAN_4K | GRAN_32BIT,
        ),
        GdtEntry::new(
            0,
            0xFFFFF,
            ACCESS_PRESENT | ACCESS_RING0 | ACCESS_DESC_TYPE | ACCESS_RW,
            GRAN_4K | GRAN_32BIT,
        ),
        GdtEntry::new(
            &*TSS as *const _ as u32,
            (size_of::<TaskStateSegment>() - 1) as u32,
            ACCESS_PRESENT | ACCESS_RING0 | ACCESS_TSS_AVAILABLE,
            0,
        ),
    ];
}

/// Build the GDT/TSS, load them, and reload the segment registers.
///
/// # Safety
/// Must run once, early in boot, before any code relies on the resulting
/// selectors.
pub unsafe fn init() {
    {
        let mut tss = TSS.lock();
        tss.ss0 = KERNEL_DATA_SELECTOR;
    }

    let pointer = DtPointer {
        limit: (size_of::<[GdtEntry; 4]>() - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{0}]",
            in(reg) &pointer,
            options(readonly, nostack, preserves_flags)
        );
        reload_segments();
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) TSS_SELECTOR,
            options(nostack, preserves_flags)
        );
    }
}

/// # Safety
/// Only valid to call once the GDT above has been loaded.
unsafe fn reload_segments() {
    unsafe {
        core::arch::asm!(
            "push {code_sel}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            "mov ax, {data_sel:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            code_sel = in(reg) KERNEL_CODE_SELECTOR as u32,
            data_sel = in(reg) KERNEL_DATA_SELECTOR,
            tmp = out(reg) _,
        );
    }
}

/// Set the ring-0 stack pointer the TSS would switch to on a privilege
/// transition. Unused while no ring-3 code exists, kept so the scheduler's
/// per-thread kernel stack plumbing has a single place to write through.
pub fn set_kernel_stack(stack_top: u32) {
    TSS.lock().esp0 = stack_top;
}
