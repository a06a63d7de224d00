//! `print!`/`println!` for kernel diagnostics.
//!
//! VGA text output is an external driver (out of scope, §1); every build of
//! this core routes through the serial port so output survives a headless
//! QEMU run.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::serial::_serial_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
