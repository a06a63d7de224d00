//! Interrupt fabric (C2): trap frame, dispatch table, critical sections.
//!
//! The architecture-specific pieces (GDT/TSS, IDT stubs, legacy PIC, local
//! and I/O APIC) live in `crate::arch`; this module owns the
//! architecture-independent dispatch contract described in SPEC_FULL.md
//! §4.2: a 256-entry handler table, a 32-entry exception table, and the
//! paired `enter_critical`/`exit_critical` primitive every other subsystem
//! uses instead of a blocking lock.

use spin::Mutex;

use crate::{
    arch::apic,
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

pub const EXCEPTION_COUNT: usize = 32;
pub const VECTOR_COUNT: usize = 256;

/// Register snapshot saved by the common stub before calling the dispatcher.
///
/// There is no privilege-level change on this kernel (no ring-3 execution,
/// §1 Non-goals), so the CPU never pushes a user ESP/SS: every interrupt
/// lands already in ring 0 with a uniform 8-word frame after `pushad`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

pub type ExceptionHandler = fn(&mut TrapFrame);
pub type VectorHandler = fn(&mut TrapFrame);

fn default_exception_handler(frame: &mut TrapFrame) {
    crate::bootstrap::kernel_panic_trap("unhandled CPU exception", frame);
}

fn default_vector_handler(frame: &mut TrapFrame) {
    panic!("unhandled interrupt vector {} (no handler installed)", frame.vector);
}

struct DispatchTable {
    exceptions: [ExceptionHandler; EXCEPTION_COUNT],
    vectors: [Option<VectorHandler>; VECTOR_COUNT],
}

impl DispatchTable {
    fn new() -> Self {
        Self {
            exceptions: [default_exception_handler; EXCEPTION_COUNT],
            vectors: [None; VECTOR_COUNT],
        }
    }
}

static DISPATCH: GlobalState<Mutex<DispatchTable>> = GlobalState::new();

pub fn init() {
    let _ = DISPATCH.init(Mutex::new(DispatchTable::new()));
}

/// Install a handler for a CPU exception vector (0..32).
pub fn register_exception(vector: u8, handler: ExceptionHandler) {
    assert!((vector as usize) < EXCEPTION_COUNT, "not an exception vector");
    DISPATCH.with_mut(|t| t.lock().exceptions[vector as usize] = handler);
}

/// Register a handler for an interrupt vector. Fails `Busy` if a
/// non-default handler is already installed.
pub fn register(vector: u8, handler: VectorHandler) -> KernelResult<()> {
    DISPATCH
        .with_mut(|t| {
            let mut table = t.lock();
            if table.vectors[vector as usize].is_some() {
                return Err(KernelError::Busy);
            }
            table.vectors[vector as usize] = Some(handler);
            Ok(())
        })
        .unwrap_or(Err(KernelError::NotInitialized))
}

/// Restore the default no-op handler for `vector`.
pub fn remove(vector: u8) {
    DISPATCH.with_mut(|t| t.lock().vectors[vector as usize] = None);
}

/// Entry point called by every hand-rolled IDT stub after it has saved the
/// register snapshot. Implements the four-step dispatch algorithm from
/// SPEC_FULL.md §4.2.
#[no_mangle]
pub extern "C" fn common_dispatch(frame: &mut TrapFrame) {
    let vector = frame.vector as u8;

    if frame.vector < EXCEPTION_COUNT as u32 {
        let handler = DISPATCH
            .with(|t| t.lock().exceptions[vector as usize])
            .unwrap_or(default_exception_handler);
        handler(frame);
        return;
    }

    if apic::handle_spurious(vector) {
        apic::send_eoi();
        return;
    }

    let handler = DISPATCH.with(|t| t.lock().vectors[vector as usize]).flatten();
    match handler {
        Some(h) => h(frame),
        None => default_vector_handler(frame),
    }
}

/// Enable or disable delivery of `irq` at the controller level.
///
/// Fails `NoSuchIrq` if no installed I/O controller covers this line.
pub fn set_mask(irq: u8, enabled: bool) -> KernelResult<()> {
    apic::set_irq_mask(irq, !enabled)
}

/// Raise a software interrupt on `vector` (`int imm8`).
///
/// Used by the scheduler to invoke itself after marking a context switch
/// pending. `int` takes an immediate operand, so this patches a tiny
/// two-instruction code stub (`int $vector; ret`) rather than branching over
/// 256 literal `asm!` arms.
pub fn raise_sw(vector: u8) {
    #[repr(align(16))]
    struct RaiseStub([u8; 3]);
    static mut RAISE_STUB: RaiseStub = RaiseStub([0xCD, 0x00, 0xC3]);

    // SAFETY: single-CPU kernel; the stub is only ever mutated and invoked
    // with interrupts disabled for the duration of this call.
    unsafe {
        let was = enter_critical();
        RAISE_STUB.0[1] = vector;
        let entry: extern "C" fn() = core::mem::transmute(RAISE_STUB.0.as_ptr());
        entry();
        exit_critical(was);
    }
}

// ---------------------------------------------------------------------
// Critical sections
// ---------------------------------------------------------------------

#[inline]
fn interrupts_enabled() -> bool {
    let flags: u32;
    unsafe {
        core::arch::asm!("pushfd; pop {0}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags & (1 << 9) != 0
}

/// # Safety
/// Only called by `enter_critical`/`exit_critical`.
#[inline]
unsafe fn cli() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
}

/// # Safety
/// Only called by `enter_critical`/`exit_critical`.
#[inline]
unsafe fn sti() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
}

/// Disable interrupts, returning whether they were enabled beforehand.
///
/// Pass the result to `exit_critical` to restore the prior state. Because
/// the saved flag (not a bare `sti`) is what gets restored, nested critical
/// sections compose correctly: an inner section never re-enables interrupts
/// an outer section had disabled.
pub fn enter_critical() -> bool {
    let was_enabled = interrupts_enabled();
    if was_enabled {
        unsafe { cli() };
    }
    was_enabled
}

/// Restore the interrupt-enable flag saved by `enter_critical`.
pub fn exit_critical(was_enabled: bool) {
    if was_enabled {
        unsafe { sti() };
    }
}

/// Run `f` with interrupts disabled, restoring the prior flag afterward.
pub fn with_critical_section<R>(f: impl FnOnce() -> R) -> R {
    let was = enter_critical();
    let result = f();
    exit_critical(was);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_table_starts_empty() {
        let table = DispatchTable::new();
        assert!(table.vectors.iter().all(|v| v.is_none()));
    }
}
