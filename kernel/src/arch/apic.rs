//! Local and I/O APIC driver (C2 interrupt-controller half).
//!
//! Reduced from the teacher's `arch/x86_64/apic.rs`: SMP inter-processor
//! interrupts (`send_ipi`) are dropped (§1 Non-goals: no SMP beyond
//! discovery), and every I/O-controller redirection entry starts masked at
//! boot — SPEC_FULL.md §4.2 wants explicit `set_mask` to be the only way a
//! line becomes live, where the teacher's `set_irq_route` unmasked on write.

use spin::Mutex;

use crate::{
    acpi::AcpiInfo,
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

const IA32_APIC_BASE_MSR: u32 = 0x1B;
const APIC_GLOBAL_ENABLE: u64 = 1 << 11;

const LAPIC_ID: usize = 0x020;
const LAPIC_TPR: usize = 0x080;
const LAPIC_EOI: usize = 0x0B0;
const LAPIC_SVR: usize = 0x0F0;
const LAPIC_LVT_TIMER: usize = 0x320;
const LAPIC_LVT_LINT0: usize = 0x350;
const LAPIC_LVT_LINT1: usize = 0x360;
const LAPIC_LVT_ERROR: usize = 0x370;
const LAPIC_TIMER_INIT_COUNT: usize = 0x380;
const LAPIC_TIMER_CUR_COUNT: usize = 0x390;
const LAPIC_TIMER_DIV: usize = 0x3E0;

const LVT_MASK: u32 = 1 << 16;
const SVR_ENABLE: u32 = 1 << 8;
pub const SPURIOUS_VECTOR: u8 = 0xFF;
const TIMER_MODE_PERIODIC: u32 = 0b01 << 17;

const IOAPIC_IOREGSEL: usize = 0x00;
const IOAPIC_IOWIN: usize = 0x10;
const IOAPIC_REG_VER: u32 = 0x01;
const IOAPIC_REDTBL_BASE: u32 = 0x10;

fn read_msr(msr: u32) -> u64 {
    let (lo, hi): (u32, u32);
    unsafe {
        core::arch::asm!("rdmsr", in("ecx") msr, out("eax") lo, out("edx") hi, options(nomem, nostack));
    }
    ((hi as u64) << 32) | lo as u64
}

fn write_msr(msr: u32, value: u64) {
    let lo = value as u32;
    let hi = (value >> 32) as u32;
    unsafe {
        core::arch::asm!("wrmsr", in("ecx") msr, in("eax") lo, in("edx") hi, options(nomem, nostack));
    }
}

struct LocalApic {
    base: usize,
}

impl LocalApic {
    fn read(&self, reg: usize) -> u32 {
        unsafe { core::ptr::read_volatile((self.base + reg) as *const u32) }
    }

    fn write(&self, reg: usize, value: u32) {
        unsafe { core::ptr::write_volatile((self.base + reg) as *mut u32, value) }
    }

    fn id(&self) -> u8 {
        (self.read(LAPIC_ID) >> 24) as u8
    }

    /// Clear task priority, mask the timer/LINT/error LVTs, set the
    /// spurious vector, and enable the unit.
    fn enable(&self) {
        self.write(LAPIC_TPR, 0);
        self.write(LAPIC_LVT_TIMER, LVT_MASK);
        self.write(LAPIC_LVT_LINT0, LVT_MASK);
        self.write(LAPIC_LVT_LINT1, LVT_MASK);
        self.write(LAPIC_LVT_ERROR, LVT_MASK);
        self.write(LAPIC_SVR, SVR_ENABLE | SPURIOUS_VECTOR as u32);
    }

    fn send_eoi(&self) {
        self.write(LAPIC_EOI, 0);
    }

    fn setup_timer(&self, vector: u8, divide: u32, initial_count: u32) {
        self.write(LAPIC_TIMER_DIV, divide);
        self.write(LAPIC_LVT_TIMER, TIMER_MODE_PERIODIC | vector as u32);
        self.write(LAPIC_TIMER_INIT_COUNT, initial_count);
    }

    fn stop_timer(&self) {
        self.write(LAPIC_LVT_TIMER, LVT_MASK);
        self.write(LAPIC_TIMER_INIT_COUNT, 0);
    }

    fn timer_count(&self) -> u32 {
        self.read(LAPIC_TIMER_CUR_COUNT)
    }
}

#[derive(Clone, Copy)]
struct RedirectionEntry(u64);

impl RedirectionEntry {
    fn masked(vector: u8) -> Self {
        Self(vector as u64 | (1 << 16))
    }

    fn parts(self) -> (u32, u32) {
        (self.0 as u32, (self.0 >> 32) as u32)
    }

    fn from_parts(low: u32, high: u32) -> Self {
        Self((low as u64) | ((high as u64) << 32))
    }

    fn set_masked(&mut self, masked: bool) {
        if masked {
            self.0 |= 1 << 16;
        } else {
            self.0 &= !(1 << 16);
        }
    }
}

struct IoApic {
    base: usize,
    first_global_irq: u32,
}

impl IoApic {
    fn read_reg(&self, reg: u32) -> u32 {
        unsafe {
            core::ptr::write_volatile((self.base + IOAPIC_IOREGSEL) as *mut u32, reg);
            core::ptr::read_volatile((self.base + IOAPIC_IOWIN) as *const u32)
        }
    }

    fn write_reg(&self, reg: u32, value: u32) {
        unsafe {
            core::ptr::write_volatile((self.base + IOAPIC_IOREGSEL) as *mut u32, reg);
            core::ptr::write_volatile((self.base + IOAPIC_IOWIN) as *mut u32, value);
        }
    }

    fn max_entries(&self) -> u32 {
        ((self.read_reg(IOAPIC_REG_VER) >> 16) & 0xFF) + 1
    }

    fn read_redirection(&self, index: u32) -> RedirectionEntry {
        let low = self.read_reg(IOAPIC_REDTBL_BASE + index * 2);
        let high = self.read_reg(IOAPIC_REDTBL_BASE + index * 2 + 1);
        RedirectionEntry::from_parts(low, high)
    }

    fn write_redirection(&self, index: u32, entry: RedirectionEntry) {
        let (low, high) = entry.parts();
        // High dword first so a transient unmask with a stale vector never occurs.
        self.write_reg(IOAPIC_REDTBL_BASE + index * 2 + 1, high);
        self.write_reg(IOAPIC_REDTBL_BASE + index * 2, low);
    }

    /// Mask every redirection entry, assigning vector `0x40 + global_irq`
    /// to each per SPEC_FULL.md §4.2's boot sequence.
    fn mask_all_with_vectors(&self) {
        for i in 0..self.max_entries() {
            let global_irq = self.first_global_irq + i;
            let entry = RedirectionEntry::masked((0x40 + global_irq) as u8);
            self.write_redirection(i, entry);
        }
    }

    fn set_mask(&self, index: u32, masked: bool) {
        let mut entry = self.read_redirection(index);
        entry.set_masked(masked);
        self.write_redirection(index, entry);
    }

    fn handles_global_irq(&self, global_irq: u32) -> bool {
        global_irq >= self.first_global_irq
            && global_irq < self.first_global_irq + self.max_entries()
    }
}

struct ApicState {
    local: LocalApic,
    io: Option<IoApic>,
}

static STATE: GlobalState<Mutex<ApicState>> = GlobalState::new();

/// Bring up the local controller and, if discovery found one, the I/O
/// controller, per SPEC_FULL.md §4.2's boot sequence.
pub fn init(info: &AcpiInfo) {
    let mut base_msr = read_msr(IA32_APIC_BASE_MSR);
    if base_msr & APIC_GLOBAL_ENABLE == 0 {
        base_msr |= APIC_GLOBAL_ENABLE;
        write_msr(IA32_APIC_BASE_MSR, base_msr);
    }
    let local_base = info.local_controller_base() as usize;
    let local = LocalApic { base: local_base };
    local.enable();

    let io = info.first_io_controller().map(|ctrl| {
        let io = IoApic { base: ctrl.base_address as usize, first_global_irq: ctrl.first_global_irq };
        io.mask_all_with_vectors();
        io
    });

    let _ = STATE.init(Mutex::new(ApicState { local, io }));
    crate::println!("[APIC] local controller id={}", STATE.with(|s| s.lock().local.id()).unwrap_or(0));
}

pub fn send_eoi() {
    STATE.with(|s| s.lock().local.send_eoi());
}

pub fn handle_spurious(vector: u8) -> bool {
    vector == SPURIOUS_VECTOR
}

/// Enable/disable the I/O-controller redirection entry serving legacy IRQ
/// `irq`, via `AcpiInfo::irq_to_gsi`'s remap lookup.
pub fn set_irq_mask(irq: u8, masked: bool) -> KernelResult<()> {
    let gsi = crate::acpi::global_irq_for_legacy(irq);
    STATE
        .with(|s| {
            let state = s.lock();
            match &state.io {
                Some(io) if io.handles_global_irq(gsi) => {
                    io.set_mask(gsi - io.first_global_irq, masked);
                    Ok(())
                }
                _ => {
                    crate::arch::pic::set_mask(irq, masked);
                    Ok(())
                }
            }
        })
        .unwrap_or(Err(KernelError::NoSuchIrq))
}

pub fn setup_timer(vector: u8, divide: u32, initial_count: u32) {
    STATE.with(|s| s.lock().local.setup_timer(vector, divide, initial_count));
}

pub fn stop_timer() {
    STATE.with(|s| s.lock().local.stop_timer());
}

pub fn timer_count() -> u32 {
    STATE.with(|s| s.lock().local.timer_count()).unwrap_or(0)
}
