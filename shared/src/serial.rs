//! Kernel console output.
//!
//! On bare metal this drives the first UART directly
//! (https://wiki.osdev.org/Serial_Ports); when the crate is built for a
//! hosted target (unit tests), output goes to standard out instead.

use core::fmt;

#[cfg(target_os = "none")]
mod uart {
    use core::arch::asm;

    const IO_BASE: u16 = 0x3f8;
    const THR: u16 = IO_BASE; // Transmitter Holding Reg (write-only)
    const FCR: u16 = IO_BASE + 2; // FIFO Control Reg (write-only)
    const LCR: u16 = IO_BASE + 3; // Line Control Register
    const MCR: u16 = IO_BASE + 4; // MODEM Control Register
    const IER: u16 = IO_BASE + 1; // Interrupt Enable Reg
    const LSR: u16 = IO_BASE + 5; // Line Status Register (read-only)

    unsafe fn outb(port: u16, byte: u8) {
        asm!("out dx, al", in("dx") port, in("al") byte)
    }

    unsafe fn inb(port: u16) -> u8 {
        let res: u8;
        asm!("in al, dx", in("dx") port, out("al") res);
        res
    }

    pub struct SerialWriter {
        initialized: bool,
    }

    pub static mut SERIAL_WRITER: SerialWriter = SerialWriter { initialized: false };

    impl SerialWriter {
        fn ensure_initialized(&mut self) {
            if self.initialized {
                return;
            }
            // SAFETY: Follows the standard UART initialization sequence.
            unsafe {
                outb(IER, 0x00);
                outb(LCR, 0x80);
                outb(THR, 0x03);
                outb(IER, 0x00);
                outb(LCR, 0x03);
                outb(FCR, 0xC7);
                outb(MCR, 0x0B);
            }
            self.initialized = true;
        }
    }

    impl core::fmt::Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            self.ensure_initialized();
            for b in s.bytes() {
                // SAFETY: Waits for the transmitter before writing the byte.
                unsafe {
                    while inb(LSR) & 0x20 == 0 {}
                    outb(THR, b);
                }
            }
            Ok(())
        }
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;
        // SAFETY: Single core, interrupts disabled during console output.
        unsafe {
            let _ = uart::SERIAL_WRITER.write_fmt(args);
        }
    }
    #[cfg(not(target_os = "none"))]
    {
        std::print!("{args}");
    }
}

#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        _print(args);
    }
    #[cfg(not(target_os = "none"))]
    {
        std::eprint!("{args}");
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! eprintln {
    () => { $crate::serial::_eprint(format_args!("\n")) };
    ($($arg:tt)*) => {
        $crate::serial::_eprint(format_args!("{}\n", format_args!($($arg)*)))
    };
}
