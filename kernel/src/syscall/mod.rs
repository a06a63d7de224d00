//! System-call dispatch (C6): one trap vector, one fixed table.
//!
//! Grounded on the teacher's `syscall/mod.rs` dispatch shape (vector-handler
//! registered with `irq`, a fixed table indexed by call number) and
//! `syscall/process.rs`'s `sys_fork`/`sys_exit`/`sys_wait` bodies, with the
//! IPC/capability/thread-affinity/exec entries dropped — SPEC_FULL.md §4.6
//! names exactly eight calls and no `EXEC`. The ABI reads the call number
//! from `eax` and a single parameter-block pointer from `ebx` (the pair
//! `common_dispatch`'s `TrapFrame` already carries for every vector), and
//! writes the `KernelError` status back into `eax`.

pub mod futex;

use crate::error::KernelError;
use crate::irq::TrapFrame;
use crate::process::pcb::ProcessId;
use crate::process::thread::{ReturnState, TerminationCause, ThreadId};
use crate::process::{fork, table, wait};
use crate::sched::scheduler;

/// The single vector this component installs with `irq::register`.
pub const SYSCALL_VECTOR: u8 = 0x60;

pub const FORK: u32 = 0;
pub const WAITPID: u32 = 1;
pub const EXIT: u32 = 2;
pub const FUTEX_WAIT: u32 = 3;
pub const FUTEX_WAKE: u32 = 4;
pub const SCHED_GET_PARAMS: u32 = 5;
pub const SCHED_SET_PARAMS: u32 = 6;
pub const PAGE_ALLOC: u32 = 7;

const TABLE_LEN: u32 = 8;

pub fn init() {
    let _ = crate::irq::register(SYSCALL_VECTOR, dispatch);
    crate::println!("[SYSCALL] vector {:#04x}, {} entries", SYSCALL_VECTOR, TABLE_LEN);
}

/// `common_dispatch`'s installed handler for `SYSCALL_VECTOR`. Validates
/// the call number against the fixed table and invokes the entry; unknown
/// numbers fail `SYSCALL_UNKNOWN` without touching `ebx`.
fn dispatch(frame: &mut TrapFrame) {
    let call = frame.eax;
    let ptr = frame.ebx;

    let status = match call {
        FORK => sys_fork(ptr),
        WAITPID => sys_waitpid(ptr),
        EXIT => sys_exit(ptr),
        FUTEX_WAIT => sys_futex_wait(ptr),
        FUTEX_WAKE => sys_futex_wake(ptr),
        SCHED_GET_PARAMS => sys_sched_get_params(ptr),
        SCHED_SET_PARAMS => sys_sched_set_params(ptr),
        PAGE_ALLOC => sys_page_alloc(ptr),
        _ => Err(KernelError::SyscallUnknown),
    };

    frame.eax = match status {
        Ok(()) => KernelError::NoError as u32,
        Err(e) => e as u32,
    };
}

/// Read a `T` out of the caller's parameter block.
///
/// # Safety
/// `ptr` must point to a valid, correctly aligned `T` for the duration of
/// the read — upheld by the syscall ABI's caller, not by this kernel (no
/// ring-3 crossing means there is no untrusted pointer to validate here).
unsafe fn read_param<T: Copy>(ptr: u32) -> T {
    unsafe { core::ptr::read(ptr as *const T) }
}

/// Write a `T` back into the caller's parameter block.
///
/// # Safety
/// Same contract as [`read_param`].
unsafe fn write_param<T: Copy>(ptr: u32, value: T) {
    unsafe { core::ptr::write(ptr as *mut T, value) }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct WaitpidParams {
    pid: u64,
    value: i32,
    cause: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ExitParams {
    cause: u32,
    return_state: u32,
    value: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FutexWaitParams {
    uaddr: u32,
    expected: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct FutexWakeParams {
    uaddr: u32,
    max: u32,
    woken: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SchedParams {
    tid: u64,
    priority: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PageAllocParams {
    size: u32,
    base: u32,
}

fn termination_cause_from(raw: u32) -> Result<TerminationCause, KernelError> {
    match raw {
        0 => Ok(TerminationCause::Correctly),
        1 => Ok(TerminationCause::Panic),
        2 => Ok(TerminationCause::InitCode),
        3 => Ok(TerminationCause::ForkFail),
        4 => Ok(TerminationCause::Signal),
        _ => Err(KernelError::IncorrectValue),
    }
}

fn sys_fork(ptr: u32) -> Result<(), KernelError> {
    let result = fork::fork()?;
    unsafe { write_param(ptr, result) };
    Ok(())
}

fn sys_waitpid(ptr: u32) -> Result<(), KernelError> {
    let mut params: WaitpidParams = unsafe { read_param(ptr) };
    let (value, cause) = wait::waitpid(ProcessId(params.pid))?;
    params.value = value;
    params.cause = cause as u32;
    unsafe { write_param(ptr, params) };
    Ok(())
}

/// Never returns to the caller on success — `scheduler::exit` terminates
/// the calling thread. Only reachable failure is a malformed `cause`.
fn sys_exit(ptr: u32) -> Result<(), KernelError> {
    let params: ExitParams = unsafe { read_param(ptr) };
    let cause = termination_cause_from(params.cause)?;
    let return_state = if params.return_state == 0 { ReturnState::Returned } else { ReturnState::Killed };
    scheduler::exit(cause, return_state, params.value);
}

fn sys_futex_wait(ptr: u32) -> Result<(), KernelError> {
    let params: FutexWaitParams = unsafe { read_param(ptr) };
    futex::futex_wait(params.uaddr, params.expected)
}

fn sys_futex_wake(ptr: u32) -> Result<(), KernelError> {
    let mut params: FutexWakeParams = unsafe { read_param(ptr) };
    let woken = futex::futex_wake(params.uaddr, params.max)?;
    params.woken = woken;
    unsafe { write_param(ptr, params) };
    Ok(())
}

fn sys_sched_get_params(ptr: u32) -> Result<(), KernelError> {
    let mut params: SchedParams = unsafe { read_param(ptr) };
    let tid = ThreadId(params.tid);
    let priority = table::threads().lock().get(&tid).ok_or(KernelError::NoSuchId)?.priority;
    params.priority = priority as u32;
    unsafe { write_param(ptr, params) };
    Ok(())
}

fn sys_sched_set_params(ptr: u32) -> Result<(), KernelError> {
    let params: SchedParams = unsafe { read_param(ptr) };
    if params.priority >= scheduler::PRIORITY_LEVELS as u32 {
        return Err(KernelError::BadPriority);
    }
    let tid = ThreadId(params.tid);
    let mut threads = table::threads().lock();
    let thread = threads.get_mut(&tid).ok_or(KernelError::NoSuchId)?;
    thread.priority = params.priority as u8;
    Ok(())
}

fn sys_page_alloc(ptr: u32) -> Result<(), KernelError> {
    let mut params: PageAllocParams = unsafe { read_param(ptr) };
    let pid = scheduler::active_process().ok_or(KernelError::NotInitialized)?;
    let mut processes = table::processes().lock();
    let process = processes.get_mut(&pid).ok_or(KernelError::NotInitialized)?;
    let base = crate::mm::alloc_pages(&mut process.address_space, params.size)?;
    params.base = base;
    unsafe { write_param(ptr, params) };
    Ok(())
}
