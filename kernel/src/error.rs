//! Kernel error type.
//!
//! Every fallible entry point into the core returns `KernelResult<T>`.
//! Invariant violations never construct one of these — they call the panic
//! path directly instead (see `bootstrap::kernel_panic`).

use core::fmt;

/// Flat error enum shared by every subsystem (C1-C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    NoError,
    NullPointer,
    NoMemory,
    NoMoreFreeMem,
    AlreadyMapped,
    NotMapped,
    Unauthorized,
    OutOfBound,
    IncorrectValue,
    BadPriority,
    BadAlign,
    NoSuchId,
    NoSuchIrq,
    Checksum,
    NotSupported,
    NotInitialized,
    Busy,
    SyscallUnknown,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoError => "no error",
            Self::NullPointer => "null pointer",
            Self::NoMemory => "out of memory",
            Self::NoMoreFreeMem => "no contiguous free memory of requested size",
            Self::AlreadyMapped => "virtual range already mapped",
            Self::NotMapped => "virtual address not mapped",
            Self::Unauthorized => "operation not authorized on this range",
            Self::OutOfBound => "value out of bound",
            Self::IncorrectValue => "operation precondition not satisfied",
            Self::BadPriority => "priority exceeds the lowest scheduler level",
            Self::BadAlign => "size not a multiple of the frame size",
            Self::NoSuchId => "no process or thread with that id",
            Self::NoSuchIrq => "irq not served by any installed controller",
            Self::Checksum => "firmware table checksum mismatch",
            Self::NotSupported => "operation not supported",
            Self::NotInitialized => "subsystem not initialized",
            Self::Busy => "resource already in use",
            Self::SyscallUnknown => "unknown system call number",
        };
        write!(f, "{}", msg)
    }
}
