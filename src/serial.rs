use core::fmt;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod uart {
    use lazy_static::lazy_static;
    use spin::Mutex;
    use volatile::Volatile;

    /// ns16550a on the QEMU `virt` board.
    pub const UART0_BASE: usize = 0x1000_0000;

    const DATA: usize = 0;
    const INT_EN: usize = 1;
    const FIFO_CTRL: usize = 2;
    const LINE_CTRL: usize = 3;
    const MODEM_CTRL: usize = 4;
    const LINE_STS: usize = 5;

    /// LCR bit 7: DATA and INT_EN become the divisor latch (DLL, DLM).
    const LCR_DLAB: u8 = 0x80;
    /// LCR: 8 data bits, no parity, one stop bit.
    const LCR_8N1: u8 = 0x03;
    /// FCR: enable FIFOs, clear both, interrupt at 14 bytes.
    const FCR_ENABLE_CLEAR_14: u8 = 0xC7;
    /// MCR: DTR, RTS and OUT2.
    const MCR_DTR_RTS_OUT2: u8 = 0x0B;
    /// LSR bit 5: transmit holding register empty.
    const LSR_THR_EMPTY: u8 = 0x20;
    /// Divisor 3 gives 38400 baud from the 1.8432 MHz reference.
    const DIVISOR: u16 = 3;

    pub struct SerialPort {
        base: usize,
    }

    impl SerialPort {
        pub const unsafe fn new(base: usize) -> SerialPort {
            SerialPort { base }
        }

        fn reg(&mut self, offset: usize) -> &mut Volatile<u8> {
            unsafe { &mut *((self.base + offset) as *mut Volatile<u8>) }
        }

        /// Polled output: interrupts stay masked, the kernel never takes UART traps.
        pub fn init(&mut self) {
            self.reg(INT_EN).write(0x00);
            self.reg(LINE_CTRL).write(LCR_DLAB);
            let [low, high] = DIVISOR.to_le_bytes();
            self.reg(DATA).write(low);
            self.reg(INT_EN).write(high);
            self.reg(LINE_CTRL).write(LCR_8N1);
            self.reg(FIFO_CTRL).write(FCR_ENABLE_CLEAR_14);
            self.reg(MODEM_CTRL).write(MCR_DTR_RTS_OUT2);
        }

        fn wait_for_tx_empty(&mut self) {
            while (self.reg(LINE_STS).read() & LSR_THR_EMPTY) == 0 {}
        }

        pub fn send(&mut self, data: u8) {
            self.wait_for_tx_empty();
            self.reg(DATA).write(data);
        }
    }

    impl core::fmt::Write for SerialPort {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            for byte in s.bytes() {
                self.send(byte);
            }
            Ok(())
        }
    }

    lazy_static! {
        pub static ref SERIAL1: Mutex<SerialPort> = {
            let mut serial_port = unsafe { SerialPort::new(UART0_BASE) };
            serial_port.init();
            Mutex::new(serial_port)
        };
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        use core::fmt::Write;
        let _ = uart::SERIAL1.lock().write_fmt(args);
    }
    #[cfg(test)]
    {
        std::print!("{}", args);
    }
    #[cfg(not(any(test, all(target_arch = "riscv64", target_os = "none"))))]
    let _ = args;
}

/// Raw console output used by the `print` syscall.
pub fn write_bytes(bytes: &[u8]) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        let mut port = uart::SERIAL1.lock();
        for &byte in bytes {
            port.send(byte);
        }
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        _print(format_args!("{}", core::str::from_utf8(bytes).unwrap_or("<non-utf8 output>")));
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[INFO] {}\n", format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[WARN] {}\n", format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[ERROR] {}\n", format_args!($($arg)*)))
    };
}

pub fn init() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    let _ = uart::SERIAL1.lock();
}
