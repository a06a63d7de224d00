//! Interrupt descriptor table: 256 hand-rolled stubs feeding one common
//! dispatcher (SPEC_FULL.md §4.2).
//!
//! The teacher's IDT gave every vector its own `extern "x86-interrupt"`
//! closure via the `x86_64` crate. That ABI and that crate are both
//! long-mode-specific; here the 256 stubs are generated once in
//! `global_asm!` (using the assembler's `.rept` to avoid writing out 256
//! near-identical labels by hand) and every one of them falls through to a
//! single `isr_common_stub` that saves state and calls `common_dispatch`.

use core::mem::size_of;

use lazy_static::lazy_static;

use crate::arch::gdt::KERNEL_CODE_SELECTOR;

const GATE_PRESENT: u8 = 1 << 7;
const GATE_32BIT_INTERRUPT: u8 = 0x0E;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn new(handler: u32) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            type_attr: GATE_PRESENT | GATE_32BIT_INTERRUPT,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct DtPointer {
    limit: u16,
    base: u32,
}

extern "C" {
    /// Table of 256 stub entry points, built alongside the stubs themselves
    /// in `global_asm!` below so Rust never has to name all 256 labels.
    static ISR_STUB_TABLE: [u32; 256];
}

lazy_static! {
    static ref IDT: [IdtEntry; 256] = {
        let mut table = [IdtEntry::missing(); 256];
        for (vector, entry) in table.iter_mut().enumerate() {
            // SAFETY: ISR_STUB_TABLE is a 256-entry array of stub addresses
            // emitted by the assembler alongside the stubs it points to.
            let addr = unsafe { ISR_STUB_TABLE[vector] };
            *entry = IdtEntry::new(addr);
        }
        table
    };
}

/// Load the IDT. Must run after `gdt::init` (stub entries reference the
/// kernel code selector).
///
/// # Safety
/// Must run once, early in boot.
pub unsafe fn init() {
    let pointer =
        DtPointer { limit: (size_of::<[IdtEntry; 256]>() - 1) as u16, base: IDT.as_ptr() as u32 };
    unsafe {
        core::arch::asm!(
            "lidt [{0}]",
            in(reg) &pointer,
            options(readonly, nostack, preserves_flags)
        );
    }
}

core::arch::global_asm!(
    r#"
.intel_syntax noprefix
.altmacro

.macro isr_no_err num
.global isr_stub_\num
isr_stub_\num:
    push 0
    push \num
    jmp isr_common_stub
.endm

.macro isr_err num
.global isr_stub_\num
isr_stub_\num:
    push \num
    jmp isr_common_stub
.endm

isr_no_err 0
isr_no_err 1
isr_no_err 2
isr_no_err 3
isr_no_err 4
isr_no_err 5
isr_no_err 6
isr_no_err 7
isr_err 8
isr_no_err 9
isr_err 10
isr_err 11
isr_err 12
isr_err 13
isr_err 14
isr_no_err 15
isr_no_err 16
isr_err 17
isr_no_err 18
isr_no_err 19
isr_no_err 20
isr_no_err 21
isr_no_err 22
isr_no_err 23
isr_no_err 24
isr_no_err 25
isr_no_err 26
isr_no_err 27
isr_no_err 28
isr_no_err 29
isr_no_err 30
isr_no_err 31

.set i, 32
.rept 224
isr_no_err %i
.set i, i+1
.endr

isr_common_stub:
    pushad
    mov eax, esp
    push eax
    call common_dispatch
    add esp, 4
    popad
    add esp, 8
    iretd

.section .rodata
.global ISR_STUB_TABLE
.align 4
ISR_STUB_TABLE:
.set i, 0
.rept 256
.long isr_stub_%i
.set i, i+1
.endr
.text
"#
);
