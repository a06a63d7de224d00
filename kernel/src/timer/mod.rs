//! Monotonic clock and periodic scheduler tick (C7).
//!
//! Grounded on the teacher's `timer/mod.rs` software timer wheel (kept as
//! an ambient one-shot/periodic facility layered on top of the tick); its
//! error reporting is rebased onto this crate's flat `KernelError` and it
//! gains the narrow surface SPEC_FULL.md §4.7 actually names: `now()` and
//! `register_scheduler`. The hardware source is pluggable between the
//! legacy 8253 PIT and the local APIC timer (`arch::apic::setup_timer`),
//! chosen at `init()` depending on whether platform discovery (C1) found
//! one; the scheduler depends only on `now()`/`register_scheduler` and
//! never branches on which driver is live.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::sync::once_lock::GlobalState;

/// Ticks per second the scheduler is driven at.
const TICK_HZ: u32 = 100;
const NS_PER_TICK: u64 = 1_000_000_000 / TICK_HZ as u64;

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_SET_MODE3: u8 = 0x36;

/// Fixed vector the local APIC timer is programmed to raise; the legacy
/// PIT instead rides IRQ0 through whatever the PIC remapped it to.
pub const APIC_TIMER_VECTOR: u8 = 0x50;

/// Satisfied by whichever hardware source `init()` picks; `now()` and the
/// tick ISR are written against this trait alone, per SPEC_FULL.md §4.7.
trait TimerDriver: Send {
    fn set_periodic(&self, hz: u32);
    fn ticks(&self) -> u64;
    fn name(&self) -> &'static str;
}

struct PitDriver;

impl TimerDriver for PitDriver {
    fn set_periodic(&self, hz: u32) {
        let divisor = (PIT_FREQUENCY_HZ / hz).clamp(1, 0xFFFF) as u16;
        unsafe {
            crate::arch::port::outb(PIT_COMMAND, PIT_SET_MODE3);
            crate::arch::port::outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
            crate::arch::port::outb(PIT_CHANNEL0, (divisor >> 8) as u8);
        }
    }

    fn ticks(&self) -> u64 {
        TICK_COUNT.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "legacy-pit"
    }
}

struct LocalApicDriver;

impl TimerDriver for LocalApicDriver {
    /// Known boundary: `ASSUMED_BUS_HZ` is a round-number placeholder, not a
    /// measured value. The local APIC timer runs off the bus clock, which
    /// varies by platform and isn't discoverable from ACPI (C1); a real
    /// bring-up calibrates the initial count by timing a fixed number of PIT
    /// ticks against the APIC timer once, at `init()`, before handing
    /// scheduling over to it. Until that calibration is wired in, `ticks()`
    /// stays correct (it only counts ISR firings) but wall-clock `now()` is
    /// only as accurate as this assumption.
    fn set_periodic(&self, hz: u32) {
        const ASSUMED_BUS_HZ: u32 = 100_000_000;
        const DIVIDE_BY_16: u32 = 0b0011;
        let initial_count = (ASSUMED_BUS_HZ / 16) / hz.max(1);
        crate::arch::apic::setup_timer(APIC_TIMER_VECTOR, DIVIDE_BY_16, initial_count);
    }

    fn ticks(&self) -> u64 {
        TICK_COUNT.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "local-apic"
    }
}

static TICK_COUNT: AtomicU64 = AtomicU64::new(0);
static UPTIME_NS: AtomicU64 = AtomicU64::new(0);
static DRIVER: GlobalState<Box<dyn TimerDriver>> = GlobalState::new();
static SCHEDULER_HANDLER: GlobalState<Mutex<Option<fn()>>> = GlobalState::new();

/// Bring up the tick source and the software timer wheel. `have_local_apic`
/// selects the local APIC timer when platform discovery (C1) reported one;
/// otherwise this falls back to the legacy PIT on IRQ0.
pub fn init(have_local_apic: bool) {
    let _ = SCHEDULER_HANDLER.init(Mutex::new(None));
    let _ = WHEEL.init(Mutex::new(TimerWheel::new()));

    let driver: Box<dyn TimerDriver> =
        if have_local_apic { Box::new(LocalApicDriver) } else { Box::new(PitDriver) };
    driver.set_periodic(TICK_HZ);
    crate::println!("[TIMER] driving scheduler tick from {} at {} Hz", driver.name(), TICK_HZ);
    let _ = DRIVER.init(driver);

    let vector = if have_local_apic { APIC_TIMER_VECTOR } else { crate::arch::pic::PIC_1_OFFSET };
    let _ = crate::irq::register(vector, on_tick_interrupt);
    if !have_local_apic {
        let _ = crate::irq::set_mask(0, true);
    }
}

fn on_tick_interrupt(frame: &mut crate::irq::TrapFrame) {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);
    UPTIME_NS.fetch_add(NS_PER_TICK, Ordering::Relaxed);
    timer_tick(NS_PER_TICK / 1_000_000);

    let handler = SCHEDULER_HANDLER.with(|h| *h.lock()).flatten();
    if let Some(handler) = handler {
        handler();
    }

    let vector = frame.vector as u8;
    if crate::arch::pic::covers(vector) {
        unsafe { crate::arch::pic::notify_end_of_interrupt(vector) };
    } else {
        crate::arch::apic::send_eoi();
    }
}

/// Nanoseconds since `init()` ran, monotonic and non-decreasing.
pub fn now() -> u64 {
    UPTIME_NS.load(Ordering::Relaxed)
}

/// Install the function invoked at every system tick. SPEC_FULL.md §4.7
/// names exactly one caller of this: `sched::run`.
pub fn register_scheduler(handler: fn()) {
    SCHEDULER_HANDLER.with(|h| *h.lock() = Some(handler));
}

pub fn driver_name() -> &'static str {
    DRIVER.with(|d| d.name()).unwrap_or("uninitialized")
}

// ---------------------------------------------------------------------
// Software timer wheel (ambient enrichment, layered on the tick above)
// ---------------------------------------------------------------------

const WHEEL_SLOTS: usize = 256;
const MAX_TIMERS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
}

struct TimerEntry {
    mode: TimerMode,
    period_ms: u64,
    slot: usize,
    callback: fn(TimerId),
}

struct TimerWheel {
    slots: Vec<Vec<u32>>,
    entries: BTreeMap<u32, TimerEntry>,
    next_id: u32,
    current_ms: u64,
}

impl TimerWheel {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(WHEEL_SLOTS);
        slots.resize_with(WHEEL_SLOTS, Vec::new);
        Self { slots, entries: BTreeMap::new(), next_id: 1, current_ms: 0 }
    }

    fn create(&mut self, mode: TimerMode, delay_ms: u64, callback: fn(TimerId)) -> KernelResult<TimerId> {
        if self.entries.len() >= MAX_TIMERS {
            return Err(KernelError::NoMemory);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let slot = ((self.current_ms + delay_ms) as usize) % WHEEL_SLOTS;
        self.slots[slot].push(id);
        self.entries.insert(id, TimerEntry { mode, period_ms: delay_ms, slot, callback });
        Ok(TimerId(id))
    }

    fn cancel(&mut self, id: TimerId) -> KernelResult<()> {
        let entry = self.entries.remove(&id.0).ok_or(KernelError::NoSuchId)?;
        self.slots[entry.slot].retain(|&x| x != id.0);
        Ok(())
    }

    fn tick(&mut self, elapsed_ms: u64) {
        for _ in 0..elapsed_ms {
            self.current_ms += 1;
            let slot = (self.current_ms as usize) % WHEEL_SLOTS;
            let due = core::mem::take(&mut self.slots[slot]);
            for id in due {
                let Some(entry) = self.entries.get(&id) else { continue };
                let callback = entry.callback;
                let mode = entry.mode;
                let period = entry.period_ms;
                if mode == TimerMode::Periodic {
                    let next_slot = ((self.current_ms + period) as usize) % WHEEL_SLOTS;
                    if let Some(entry) = self.entries.get_mut(&id) {
                        entry.slot = next_slot;
                    }
                    self.slots[next_slot].push(id);
                } else {
                    self.entries.remove(&id);
                }
                callback(TimerId(id));
            }
        }
    }
}

static WHEEL: GlobalState<Mutex<TimerWheel>> = GlobalState::new();

/// Schedule `callback` to run after `delay_ms`, once or repeatedly.
pub fn create_timer(mode: TimerMode, delay_ms: u64, callback: fn(TimerId)) -> KernelResult<TimerId> {
    WHEEL.with(|w| w.lock().create(mode, delay_ms, callback)).unwrap_or(Err(KernelError::NotInitialized))
}

pub fn cancel_timer(id: TimerId) -> KernelResult<()> {
    WHEEL.with(|w| w.lock().cancel(id)).unwrap_or(Err(KernelError::NotInitialized))
}

pub fn pending_timer_count() -> usize {
    WHEEL.with(|w| w.lock().entries.len()).unwrap_or(0)
}

fn timer_tick(elapsed_ms: u64) {
    if elapsed_ms == 0 {
        return;
    }
    WHEEL.with(|w| w.lock().tick(elapsed_ms));
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    static FIRE_COUNT: AtomicU32 = AtomicU32::new(0);

    fn bump(_id: TimerId) {
        FIRE_COUNT.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn one_shot_fires_once_and_is_removed() {
        let _ = WHEEL.init(Mutex::new(TimerWheel::new()));
        let id = create_timer(TimerMode::OneShot, 5, bump).unwrap();
        timer_tick(5);
        assert_eq!(pending_timer_count(), 0);
        assert!(cancel_timer(id).is_err());
    }

    #[test]
    fn cancel_before_expiry_prevents_the_callback() {
        let _ = WHEEL.init(Mutex::new(TimerWheel::new()));
        let id = create_timer(TimerMode::OneShot, 10, bump).unwrap();
        let before = FIRE_COUNT.load(Ordering::Relaxed);
        cancel_timer(id).unwrap();
        timer_tick(10);
        assert_eq!(FIRE_COUNT.load(Ordering::Relaxed), before);
    }
}
