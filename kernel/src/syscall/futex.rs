//! Futex primitives backing `FUTEX_WAIT`/`FUTEX_WAKE` (C6).
//!
//! Grounded on the teacher's `syscall/futex.rs` per-address waiter table and
//! atomic-recheck-before-sleep idiom; the `BITSET`/`REQUEUE`/`WAKE_OP`
//! variants and the per-process key namespacing are dropped — SPEC_FULL's
//! `FUTEX_WAIT`/`FUTEX_WAKE` are bare, and this kernel has no concept of a
//! user address space to alias within.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::process::table;
use crate::process::thread::{ThreadId, ThreadState, WaitReason};
use crate::sched::scheduler;

/// FIFO of threads blocked on each futex word, in wake order.
static WAITERS: Mutex<BTreeMap<u32, Vec<ThreadId>>> = Mutex::new(BTreeMap::new());

/// Block the caller if `*uaddr == expected`. The read and the transition to
/// WAITING happen in the same critical section as the waiter-list
/// registration, so a concurrent `futex_wake` can never observe the caller
/// between "about to sleep" and "actually asleep".
pub fn futex_wait(uaddr: u32, expected: u32) -> KernelResult<()> {
    if uaddr == 0 || !uaddr.is_multiple_of(4) {
        return Err(KernelError::BadAlign);
    }

    let blocked = crate::irq::with_critical_section(|| -> KernelResult<bool> {
        let current = unsafe { core::ptr::read_volatile(uaddr as *const u32) };
        if current != expected {
            return Ok(false);
        }
        let tid = scheduler::active_thread().ok_or(KernelError::NotInitialized)?;
        WAITERS.lock().entry(uaddr).or_default().push(tid);
        if let Some(thread) = table::threads().lock().get_mut(&tid) {
            thread.state = ThreadState::Waiting(WaitReason::Futex(uaddr));
        }
        Ok(true)
    })?;

    if blocked {
        scheduler::schedule();
    }
    Ok(())
}

/// Wake up to `max` threads blocked on `uaddr`, oldest first. Returns the
/// number actually woken.
pub fn futex_wake(uaddr: u32, max: u32) -> KernelResult<u32> {
    let woken = {
        let mut table = WAITERS.lock();
        match table.get_mut(&uaddr) {
            Some(queue) => {
                let n = (max as usize).min(queue.len());
                queue.drain(0..n).collect::<Vec<_>>()
            }
            None => Vec::new(),
        }
    };

    let mut count = 0;
    for tid in woken {
        if scheduler::unlock(tid, WaitReason::Futex(uaddr), true).is_ok() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_on_empty_key_wakes_nobody() {
        assert_eq!(futex_wake(0xdead_beef, 4).unwrap(), 0);
    }
}
