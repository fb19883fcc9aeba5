//! Bare-metal hart for the QEMU `virt` board: CSR access, the CLINT timer,
//! and the trap vectors of both privilege levels.

use core::arch::{asm, global_asm};

use spin::Mutex;
use volatile::Volatile;

use super::{Csr, Hart};
use crate::config::{BootInfo, KernelConfig};
use crate::interrupts::{handle_strap, MachineTrapHandler};
use crate::kernel::{self, Kernel};
use crate::memory::FrameAllocator;
use crate::scheduler::Resume;

const CLINT_MTIMECMP: usize = 0x0200_4000;
const CLINT_MTIME: usize = 0x0200_bff8;
/// sifive,test0 device; writing FINISHER_PASS powers the machine off.
const TEST_DEVICE: usize = 0x10_0000;
const FINISHER_PASS: u32 = 0x5555;
const FINISHER_FAIL: u32 = 0x3333;

const MIE_MTIE: u64 = 1 << 7;
const MSTATUS_MIE: u64 = 1 << 3;

const MSTACK_SIZE: usize = 4096;

#[repr(C, align(16))]
struct MachineStack([u8; MSTACK_SIZE]);

static mut MSTACK: MachineStack = MachineStack([0; MSTACK_SIZE]);

static MTRAP_HANDLER: Mutex<Option<MachineTrapHandler>> = Mutex::new(None);

macro_rules! read_csr {
    ($name:literal) => {{
        let value: u64;
        unsafe { asm!(concat!("csrr {0}, ", $name), out(reg) value) };
        value
    }};
}

macro_rules! write_csr {
    ($name:literal, $value:expr) => {{
        let value: u64 = $value;
        unsafe { asm!(concat!("csrw ", $name, ", {0}"), in(reg) value) };
    }};
}

/// The hart the kernel is running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiscvHart;

impl Hart for RiscvHart {
    fn read_csr(&self, csr: Csr) -> u64 {
        match csr {
            Csr::Mcause => read_csr!("mcause"),
            Csr::Mepc => read_csr!("mepc"),
            Csr::Mtval => read_csr!("mtval"),
            Csr::Scause => read_csr!("scause"),
            Csr::Sepc => read_csr!("sepc"),
            Csr::Stval => read_csr!("stval"),
            Csr::Sip => read_csr!("sip"),
            Csr::Sstatus => read_csr!("sstatus"),
            Csr::Sscratch => read_csr!("sscratch"),
            Csr::Stvec => read_csr!("stvec"),
        }
    }

    fn write_csr(&mut self, csr: Csr, value: u64) {
        match csr {
            Csr::Mcause => write_csr!("mcause", value),
            Csr::Mepc => write_csr!("mepc", value),
            Csr::Mtval => write_csr!("mtval", value),
            Csr::Scause => write_csr!("scause", value),
            Csr::Sepc => write_csr!("sepc", value),
            Csr::Stval => write_csr!("stval", value),
            Csr::Sip => write_csr!("sip", value),
            Csr::Sstatus => write_csr!("sstatus", value),
            Csr::Sscratch => write_csr!("sscratch", value),
            Csr::Stvec => write_csr!("stvec", value),
        }
    }

    fn mtime(&self) -> u64 {
        unsafe { (*(CLINT_MTIME as *const Volatile<u64>)).read() }
    }

    fn set_mtimecmp(&mut self, deadline: u64) {
        unsafe { (*(CLINT_MTIMECMP as *mut Volatile<u64>)).write(deadline) }
    }

    fn console_write(&mut self, bytes: &[u8]) {
        crate::serial::write_bytes(bytes);
    }
}

// Supervisor trap vector and the return path. Both sit in one page that is
// identity mapped into every user address space, so they keep running
// across the satp switch. sscratch holds the trapframe while in user mode.
global_asm!(
    r#"
    .section .text.trap_vector
    .align 12
    .globl smode_trap_vector
smode_trap_vector:
    csrrw a0, sscratch, a0
    sd ra, 0(a0)
    sd sp, 8(a0)
    sd gp, 16(a0)
    sd tp, 24(a0)
    sd t0, 32(a0)
    sd t1, 40(a0)
    sd t2, 48(a0)
    sd s0, 56(a0)
    sd s1, 64(a0)
    sd a1, 80(a0)
    sd a2, 88(a0)
    sd a3, 96(a0)
    sd a4, 104(a0)
    sd a5, 112(a0)
    sd a6, 120(a0)
    sd a7, 128(a0)
    sd s2, 136(a0)
    sd s3, 144(a0)
    sd s4, 152(a0)
    sd s5, 160(a0)
    sd s6, 168(a0)
    sd s7, 176(a0)
    sd s8, 184(a0)
    sd s9, 192(a0)
    sd s10, 200(a0)
    sd s11, 208(a0)
    sd t3, 216(a0)
    sd t4, 224(a0)
    sd t5, 232(a0)
    sd t6, 240(a0)
    csrr t0, sscratch
    sd t0, 72(a0)
    ld sp, 248(a0)
    ld t0, 256(a0)
    ld t1, 272(a0)
    csrw satp, t1
    sfence.vma zero, zero
    jr t0

    .globl return_to_user
return_to_user:
    csrw satp, a1
    sfence.vma zero, zero
    ld ra, 0(a0)
    ld sp, 8(a0)
    ld gp, 16(a0)
    ld tp, 24(a0)
    ld t0, 32(a0)
    ld t1, 40(a0)
    ld t2, 48(a0)
    ld s0, 56(a0)
    ld s1, 64(a0)
    ld a1, 80(a0)
    ld a2, 88(a0)
    ld a3, 96(a0)
    ld a4, 104(a0)
    ld a5, 112(a0)
    ld a6, 120(a0)
    ld a7, 128(a0)
    ld s2, 136(a0)
    ld s3, 144(a0)
    ld s4, 152(a0)
    ld s5, 160(a0)
    ld s6, 168(a0)
    ld s7, 176(a0)
    ld s8, 184(a0)
    ld s9, 192(a0)
    ld s10, 200(a0)
    ld s11, 208(a0)
    ld t3, 216(a0)
    ld t4, 224(a0)
    ld t5, 232(a0)
    ld t6, 240(a0)
    ld a0, 72(a0)
    sret

    .section .text
    .align 4
    .globl mtrapvec
mtrapvec:
    csrrw sp, mscratch, sp
    addi sp, sp, -128
    sd ra, 0(sp)
    sd t0, 8(sp)
    sd t1, 16(sp)
    sd t2, 24(sp)
    sd t3, 32(sp)
    sd t4, 40(sp)
    sd t5, 48(sp)
    sd t6, 56(sp)
    sd a0, 64(sp)
    sd a1, 72(sp)
    sd a2, 80(sp)
    sd a3, 88(sp)
    sd a4, 96(sp)
    sd a5, 104(sp)
    sd a6, 112(sp)
    sd a7, 120(sp)
    call handle_mtrap
    ld ra, 0(sp)
    ld t0, 8(sp)
    ld t1, 16(sp)
    ld t2, 24(sp)
    ld t3, 32(sp)
    ld t4, 40(sp)
    ld t5, 48(sp)
    ld t6, 56(sp)
    ld a0, 64(sp)
    ld a1, 72(sp)
    ld a2, 80(sp)
    ld a3, 88(sp)
    ld a4, 96(sp)
    ld a5, 104(sp)
    ld a6, 112(sp)
    ld a7, 120(sp)
    addi sp, sp, 128
    csrrw sp, mscratch, sp
    mret
"#
);

extern "C" {
    fn smode_trap_vector();
    fn mtrapvec();
    fn return_to_user(trapframe: u64, satp: u64) -> !;
}

#[no_mangle]
extern "C" fn handle_mtrap() {
    let mut hart = RiscvHart;
    match MTRAP_HANDLER.lock().as_mut() {
        Some(handler) => handler.handle(&mut hart),
        None => panic!("machine trap before the handler was installed"),
    }
}

#[no_mangle]
extern "C" fn smode_trap_handler() -> ! {
    let mut hart = RiscvHart;
    let resume = kernel::with_kernel(|k| handle_strap(k, &mut hart));
    enter(resume)
}

fn enter(resume: Resume) -> ! {
    match resume {
        Resume::User { trapframe, satp, .. } => unsafe { return_to_user(trapframe, satp) },
        Resume::Shutdown => shutdown(true),
    }
}

/// Machine-mode setup: trap vector, trap stack and the first timer tick.
///
/// # Safety
/// Must run once, in M-mode, before the first `mret` to supervisor mode.
pub unsafe fn init_machine_mode(handler: MachineTrapHandler) {
    crate::serial::init();
    let mut hart = RiscvHart;
    handler.start_timer(&mut hart);
    *MTRAP_HANDLER.lock() = Some(handler);

    let stack_top = core::ptr::addr_of!(MSTACK) as u64 + MSTACK_SIZE as u64;
    write_csr!("mscratch", stack_top);
    write_csr!("mtvec", mtrapvec as u64);
    let mie = read_csr!("mie");
    write_csr!("mie", mie | MIE_MTIE);
    let mstatus = read_csr!("mstatus");
    write_csr!("mstatus", mstatus | MSTATUS_MIE);
}

/// Boot information for a kernel whose own page table is `kernel_satp`.
pub fn boot_info(kernel_satp: u64, frame_base: u64, frame_count: usize) -> BootInfo {
    BootInfo {
        kernel_satp,
        trap_vector: smode_trap_vector as u64,
        strap_handler: smode_trap_handler as u64,
        frame_base,
        frame_count,
    }
}

/// Kernel whose frame pool is the RAM `boot` describes.
///
/// Trapframes, kernel stacks and page tables are handed to the trap stubs
/// and the MMU by physical address, so the pool must be the memory itself.
///
/// # Safety
/// `boot.frame_base` must start `boot.frame_count` pages of identity-mapped
/// RAM that nothing else uses, the kernel image and heap included.
pub unsafe fn kernel(config: KernelConfig, boot: BootInfo) -> Kernel {
    let mem = FrameAllocator::from_physical(boot.frame_base, boot.frame_count);
    Kernel::with_memory(config, boot, mem)
}

/// Hand the hart to the user processes loaded into `kernel`. Never returns.
pub fn run(kernel: Kernel) -> ! {
    kernel::install(kernel);
    let mut hart = RiscvHart;
    let resume = kernel::with_kernel(|k| k.schedule(&mut hart));
    enter(resume)
}

/// Power the machine off.
pub fn shutdown(success: bool) -> ! {
    let code = if success { FINISHER_PASS } else { FINISHER_FAIL };
    unsafe { (*(TEST_DEVICE as *mut Volatile<u32>)).write(code) };
    loop {
        unsafe { asm!("wfi") };
    }
}
