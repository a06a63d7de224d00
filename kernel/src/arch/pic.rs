//! Legacy 8259 PIC: boot-time remap to {0x30..0x3F}, then fully masked.
//!
//! SPEC_FULL.md §4.2's boot sequence remaps the legacy PIC before the I/O
//! APIC (if any) is brought up, and masks every legacy line immediately
//! after — on a machine with an APIC, the I/O APIC takes over routing;
//! without one, `irq::set_mask` re-enables individual legacy lines through
//! this driver.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 0x30;
pub const PIC_2_OFFSET: u8 = 0x38;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// # Safety
/// Must run once, early in boot, with interrupts disabled.
pub unsafe fn init() {
    unsafe { PICS.lock().initialize() };
    mask_all();
}

pub fn mask_all() {
    PICS.lock().write_masks(0xFF, 0xFF);
}

/// Enable (`masked = false`) or disable a legacy IRQ line (0..16).
pub fn set_mask(irq: u8, masked: bool) {
    let mut pics = PICS.lock();
    let (mut m1, mut m2) = pics.read_masks();
    if irq < 8 {
        let bit = 1 << irq;
        m1 = if masked { m1 | bit } else { m1 & !bit };
    } else {
        let bit = 1 << (irq - 8);
        m2 = if masked { m2 | bit } else { m2 & !bit };
    }
    pics.write_masks(m1, m2);
}

pub fn covers(vector: u8) -> bool {
    (PIC_1_OFFSET..PIC_1_OFFSET + 16).contains(&vector)
}

/// # Safety
/// Only valid for a vector this PIC actually raised.
pub unsafe fn notify_end_of_interrupt(vector: u8) {
    unsafe { PICS.lock().notify_end_of_interrupt(vector) };
}
