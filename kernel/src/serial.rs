//! Serial port output (COM1, 16550-compatible).
//!
//! The only device driver this crate carries directly: everything else
//! (VGA, ATA, PS/2) is an external collaborator. Serial survives a headless
//! QEMU run and is where the panic path and `[TAG]` subsystem logging land.

use core::fmt;

use uart_16550::SerialPort;

use crate::irq;

/// Disable interrupts for the duration of `f`, restoring the prior flag.
///
/// Delegates to `irq::enter_critical`/`exit_critical` (C2) rather than
/// duplicating the raw flag save/restore here.
pub fn without_interrupts<F: FnOnce() -> R, R>(f: F) -> R {
    irq::with_critical_section(f)
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use core::fmt::Write;

    without_interrupts(|| {
        let mut port = unsafe { SerialPort::new(0x3F8) };
        let _ = port.write_fmt(args);
    });
}
