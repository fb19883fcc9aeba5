use core::fmt;
use core::mem::offset_of;

use crate::memory::{Frame, PAGE_SIZE};

/// General purpose registers x1..x31, in encoding order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiscvRegs {
    pub ra: u64,
    pub sp: u64,
    pub gp: u64,
    pub tp: u64,
    pub t0: u64,
    pub t1: u64,
    pub t2: u64,
    pub s0: u64,
    pub s1: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
    pub a6: u64,
    pub a7: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
    pub t3: u64,
    pub t4: u64,
    pub t5: u64,
    pub t6: u64,
}

/// Per-process register save area.
///
/// The supervisor trap vector stores into and restores from this page by
/// fixed offsets, so the field order is part of the assembly contract.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub regs: RiscvRegs,
    /// Top of this process's kernel stack.
    pub kernel_sp: u64,
    /// Address of the supervisor trap handler.
    pub kernel_trap: u64,
    /// User pc to resume at.
    pub epc: u64,
    /// Kernel page table, loaded before any kernel-side work.
    pub kernel_satp: u64,
}

pub const TF_KERNEL_SP: usize = 248;
pub const TF_KERNEL_TRAP: usize = 256;
pub const TF_EPC: usize = 264;
pub const TF_KERNEL_SATP: usize = 272;

const _: () = {
    assert!(offset_of!(TrapFrame, kernel_sp) == TF_KERNEL_SP);
    assert!(offset_of!(TrapFrame, kernel_trap) == TF_KERNEL_TRAP);
    assert!(offset_of!(TrapFrame, epc) == TF_EPC);
    assert!(offset_of!(TrapFrame, kernel_satp) == TF_KERNEL_SATP);
    assert!(core::mem::size_of::<TrapFrame>() <= PAGE_SIZE);
};

impl TrapFrame {
    /// `a0..a7` as the syscall dispatcher sees them: number first, then arguments.
    pub fn syscall_args(&self) -> [u64; 8] {
        let r = &self.regs;
        [r.a0, r.a1, r.a2, r.a3, r.a4, r.a5, r.a6, r.a7]
    }

    pub fn set_return(&mut self, value: i64) {
        self.regs.a0 = value as u64;
    }
}

impl fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapFrame")
            .field("epc", &format_args!("{:#x}", self.epc))
            .field("sp", &format_args!("{:#x}", self.regs.sp))
            .field("a0", &format_args!("{:#x}", self.regs.a0))
            .finish()
    }
}

impl Frame {
    pub fn trapframe(&self) -> &TrapFrame {
        // The frame is page aligned and a TrapFrame is plain u64s.
        unsafe { &*(self.bytes().as_ptr() as *const TrapFrame) }
    }

    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        unsafe { &mut *(self.bytes_mut().as_mut_ptr() as *mut TrapFrame) }
    }
}
