#![allow(dead_code)]

use std::collections::HashMap;

use pke_kernel::arch::{Csr, Hart};
use pke_kernel::debug::SymbolTable;
use pke_kernel::interrupts::handle_strap;
use pke_kernel::memory::{copy_from_user, copy_to_user};
use pke_kernel::process::SegmentKind;
use pke_kernel::{BootInfo, Kernel, KernelConfig, ProcessId, ProgramImage, Resume};

pub const CODE_VA: u64 = 0x1_0000;
pub const DATA_VA: u64 = 0x2_0000;
pub const SCAUSE_USER_ECALL: u64 = 8;

/// Same model as the crate's `arch::mock::MockHart`, which is compiled only
/// into its own unit tests: CSRs in a map, the console in a byte buffer.
#[derive(Debug, Default)]
pub struct MockHart {
    csrs: HashMap<Csr, u64>,
    pub mtime: u64,
    pub mtimecmp: u64,
    pub console: Vec<u8>,
}

impl Hart for MockHart {
    fn read_csr(&self, csr: Csr) -> u64 {
        self.csrs.get(&csr).copied().unwrap_or(0)
    }

    fn write_csr(&mut self, csr: Csr, value: u64) {
        self.csrs.insert(csr, value);
    }

    fn mtime(&self) -> u64 {
        self.mtime
    }

    fn set_mtimecmp(&mut self, deadline: u64) {
        self.mtimecmp = deadline;
    }

    fn console_write(&mut self, bytes: &[u8]) {
        self.console.extend_from_slice(bytes);
    }
}

/// Exact-address symbol lookup.
pub struct Symbols(pub Vec<(u64, &'static str)>);

impl SymbolTable for Symbols {
    fn symbol_for(&self, addr: u64) -> Option<&str> {
        self.0.iter().find(|(a, _)| *a == addr).map(|(_, name)| *name)
    }
}

pub fn boot_info(frame_count: usize) -> BootInfo {
    BootInfo {
        kernel_satp: 0x8000_0000_0008_0000,
        trap_vector: 0x8000_1000,
        strap_handler: 0x8000_2000,
        frame_base: 0x8040_0000,
        frame_count,
    }
}

/// One code page and a data page starting with `data`.
pub fn program(data: &[u8]) -> ProgramImage {
    ProgramImage::new(CODE_VA)
        .with_segment(CODE_VA, &[0x73, 0, 0, 0], 4, SegmentKind::Code)
        .with_segment(DATA_VA, data, 128, SegmentKind::Data)
}

/// A kernel driven the way the trap vector drives it.
pub struct Machine {
    pub kernel: Kernel,
    pub hart: MockHart,
}

impl Machine {
    pub fn new(nproc: usize, frame_count: usize) -> Self {
        let config = KernelConfig { nproc, ..KernelConfig::default() };
        Machine {
            kernel: Kernel::new(config, boot_info(frame_count)),
            hart: MockHart::default(),
        }
    }

    pub fn load(&mut self, data: &[u8]) -> ProcessId {
        self.kernel.load_user_program(&program(data)).unwrap()
    }

    pub fn start(&mut self) -> Resume {
        self.kernel.schedule(&mut self.hart)
    }

    pub fn running(&self) -> ProcessId {
        self.kernel.current_pid().expect("no process running")
    }

    fn slot(&self, pid: ProcessId) -> usize {
        self.kernel.procs.find_slot(pid).expect("pid not in the pool")
    }

    /// Trap into the kernel with `ecall` from the running process.
    pub fn syscall(&mut self, number: u64, args: &[u64]) -> Resume {
        let slot = self.kernel.current_slot().unwrap();
        let tf = self.kernel.trapframe_mut(slot);
        tf.regs.a0 = number;
        let mut regs = [0u64; 7];
        regs[..args.len()].copy_from_slice(args);
        tf.regs.a1 = regs[0];
        tf.regs.a2 = regs[1];
        tf.regs.a3 = regs[2];
        let epc = tf.epc;
        self.hart.write_csr(Csr::Scause, SCAUSE_USER_ECALL);
        self.hart.write_csr(Csr::Sepc, epc);
        handle_strap(&mut self.kernel, &mut self.hart)
    }

    /// `a0` as the process will see it when it next runs.
    pub fn a0(&self, pid: ProcessId) -> i64 {
        self.kernel.trapframe(self.slot(pid)).regs.a0 as i64
    }

    pub fn set_reg_s0(&mut self, pid: ProcessId, value: u64) {
        let slot = self.slot(pid);
        self.kernel.trapframe_mut(slot).regs.s0 = value;
    }

    pub fn read_user(&self, pid: ProcessId, va: u64, len: usize) -> Vec<u8> {
        let proc = self.kernel.procs.get(self.slot(pid));
        let mut buf = vec![0u8; len];
        copy_from_user(&self.kernel.mem, proc.pagetable().unwrap(), va, &mut buf).unwrap();
        buf
    }

    pub fn write_user(&mut self, pid: ProcessId, va: u64, data: &[u8]) {
        let slot = self.slot(pid);
        let kernel = &mut self.kernel;
        let pagetable = kernel.procs.get(slot).pagetable().unwrap();
        copy_to_user(&mut kernel.mem, pagetable, va, data).unwrap();
    }

    pub fn console(&self) -> String {
        String::from_utf8(self.console_bytes().to_vec()).unwrap()
    }

    fn console_bytes(&self) -> &[u8] {
        &self.hart.console
    }
}
