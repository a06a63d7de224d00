//! i386 architecture layer: GDT/TSS, IDT, legacy PIC, local/IO APIC, raw
//! port I/O, and the context-switch primitive the scheduler drives.

pub mod apic;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod port;

use crate::error::KernelResult;

/// Boot sequence per SPEC_FULL.md §4.2 / §2: segmentation and traps first,
/// legacy PIC remapped and fully masked, then platform discovery, then the
/// local/IO APIC (or a bare PIC fallback if ACPI discovery failed).
///
/// # Safety
/// Must run once, very early in boot, before interrupts are enabled.
pub unsafe fn init() -> KernelResult<()> {
    unsafe {
        gdt::init();
        idt::init();
        pic::init();
    }

    match crate::acpi::init() {
        Ok(()) => {
            crate::acpi::with_info(|info| apic::init(info));
        }
        Err(e) => {
            crate::println!("[ACPI] discovery failed ({e}), falling back to legacy PIC routing");
        }
    }

    Ok(())
}

/// Disable interrupts and halt forever. The panic path's final act.
pub fn halt() -> ! {
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}
