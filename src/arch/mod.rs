//! The one place the kernel core talks to the hart.
//!
//! Everything above this module sees the machine only through [`Hart`]; the
//! bare-metal implementation lives in [`riscv`], tests provide their own.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod riscv;

#[cfg(test)]
pub mod mock;

/// Control and status registers the kernel reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Csr {
    Mcause,
    Mepc,
    Mtval,
    Scause,
    Sepc,
    Stval,
    Sip,
    Sstatus,
    Sscratch,
    Stvec,
}

/// Supervisor software interrupt pending.
pub const SIP_SSIP: u64 = 1 << 1;
/// Interrupts were enabled before the trap into S-mode.
pub const SSTATUS_SPIE: u64 = 1 << 5;
/// Privilege before the trap into S-mode (set = supervisor).
pub const SSTATUS_SPP: u64 = 1 << 8;

pub trait Hart {
    fn read_csr(&self, csr: Csr) -> u64;

    fn write_csr(&mut self, csr: Csr, value: u64);

    fn set_csr_bits(&mut self, csr: Csr, bits: u64) {
        let value = self.read_csr(csr);
        self.write_csr(csr, value | bits);
    }

    fn clear_csr_bits(&mut self, csr: Csr, bits: u64) {
        let value = self.read_csr(csr);
        self.write_csr(csr, value & !bits);
    }

    /// Current value of the CLINT `mtime` counter.
    fn mtime(&self) -> u64;

    /// Program the CLINT comparator for this hart.
    fn set_mtimecmp(&mut self, deadline: u64);

    fn console_write(&mut self, bytes: &[u8]);
}
