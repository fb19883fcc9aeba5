//! The kernel context every trap handler works on.

use alloc::boxed::Box;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::config::{BootInfo, KernelConfig};
use crate::debug::{NoDebugInfo, SymbolTable};
use crate::error::{fatal, KResult, KernelError};
use crate::memory::{FrameAllocator, PhysAddr};
use crate::process::{ProcessId, ProcessTable};
use crate::scheduler::{Scheduler, TrapFrame};
use crate::sync::SemaphoreTable;

/// Process pool, ready queue, semaphores and physical memory of one hart.
pub struct Kernel {
    pub config: KernelConfig,
    pub boot: BootInfo,
    pub mem: FrameAllocator,
    pub procs: ProcessTable,
    pub sched: Scheduler,
    pub sems: SemaphoreTable,
    symbols: Box<dyn SymbolTable + Send>,
}

impl Kernel {
    /// Kernel over a host-side frame arena laid out as `boot` describes.
    #[cfg(not(target_os = "none"))]
    pub fn new(config: KernelConfig, boot: BootInfo) -> Self {
        let mem = FrameAllocator::new(boot.frame_base, boot.frame_count);
        Self::with_memory(config, boot, mem)
    }

    /// Kernel handing out frames from `mem`.
    pub fn with_memory(config: KernelConfig, boot: BootInfo, mem: FrameAllocator) -> Self {
        Kernel {
            mem,
            procs: ProcessTable::new(config.nproc, config.user_heap_start),
            sched: Scheduler::new(),
            sems: SemaphoreTable::new(config.nsem),
            symbols: Box::new(NoDebugInfo),
            config,
            boot,
        }
    }

    /// Use `symbols` to name frames in user backtraces.
    pub fn with_symbols(mut self, symbols: Box<dyn SymbolTable + Send>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn symbols(&self) -> &dyn SymbolTable {
        self.symbols.as_ref()
    }

    /// Slot of the running process.
    pub fn current_slot(&self) -> KResult<usize> {
        self.sched.current().ok_or(KernelError::NoCurrentProcess)
    }

    pub fn current_pid(&self) -> Option<ProcessId> {
        self.sched.current().map(|slot| self.procs.get(slot).pid)
    }

    /// Physical address of the trapframe page of `slot`.
    pub fn trapframe_addr(&self, slot: usize) -> PhysAddr {
        match self.procs.get(slot).trapframe_frame() {
            Some(frame) => self.mem.start_address(frame),
            None => fatal(KernelError::InvalidState),
        }
    }

    pub fn trapframe(&self, slot: usize) -> &TrapFrame {
        match self.procs.get(slot).trapframe_frame() {
            Some(frame) => self.mem.frame(frame).trapframe(),
            None => fatal(KernelError::InvalidState),
        }
    }

    pub fn trapframe_mut(&mut self, slot: usize) -> &mut TrapFrame {
        match self.procs.get(slot).trapframe_frame() {
            Some(frame) => self.mem.frame_mut(frame).trapframe_mut(),
            None => fatal(KernelError::InvalidState),
        }
    }
}

lazy_static! {
    /// The kernel instance the bare-metal trap entry points work on.
    pub static ref KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);
}

/// Hand a fully built kernel over to the trap entry points.
pub fn install(kernel: Kernel) {
    *KERNEL.lock() = Some(kernel);
}

/// Run `f` on the installed kernel. Trapping before [`install`] is fatal.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let mut guard = KERNEL.lock();
    match guard.as_mut() {
        Some(kernel) => f(kernel),
        None => fatal(KernelError::InvalidState),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::memory::Frame;
    use crate::process::{ProgramImage, SegmentKind};
    use alloc::vec::Vec;

    pub const CODE_VA: u64 = 0x1_0000;
    pub const DATA_VA: u64 = 0x2_0000;

    pub fn boot(frame_count: usize) -> BootInfo {
        BootInfo {
            kernel_satp: 0x8000_0000_0008_0000,
            trap_vector: 0x8000_1000,
            strap_handler: 0x8000_2000,
            frame_base: 0x8040_0000,
            frame_count,
        }
    }

    fn config() -> KernelConfig {
        KernelConfig { nproc: 8, nsem: 4, ..KernelConfig::default() }
    }

    pub fn kernel(frame_count: usize) -> Kernel {
        Kernel::new(config(), boot(frame_count))
    }

    /// Kernel whose frames are leaked host memory used at their real addresses.
    pub fn physical_kernel(frame_count: usize) -> Kernel {
        let ram: Vec<Frame> = (0..frame_count).map(|_| Frame::ZERO).collect();
        let base = Vec::leak(ram).as_mut_ptr() as u64;
        let boot = BootInfo { frame_base: base, ..boot(frame_count) };
        let mem = unsafe { FrameAllocator::from_physical(base, frame_count) };
        Kernel::with_memory(config(), boot, mem)
    }

    /// One code page and one data page holding `tag`.
    pub fn program(tag: &[u8]) -> ProgramImage {
        ProgramImage::new(CODE_VA)
            .with_segment(CODE_VA, &[0x13, 0, 0, 0, 0x73, 0, 0, 0], 8, SegmentKind::Code)
            .with_segment(DATA_VA, tag, 64, SegmentKind::Data)
    }
}
