pub mod context;
pub mod queue;

pub use context::{RiscvRegs, TrapFrame};
pub use queue::{ProcQueue, QueueId};

use crate::arch::{Csr, Hart, SSTATUS_SPIE, SSTATUS_SPP};
use crate::error::{fatal, KernelError};
use crate::kernel::Kernel;
use crate::memory::{PhysAddr, PAGE_SIZE};
use crate::process::{ProcessId, ProcessState, ProcessTable};

/// What the trap exit path should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Return to user mode on `satp` with registers from the page at `trapframe`.
    User { pid: ProcessId, trapframe: PhysAddr, satp: u64 },
    /// Every process has finished.
    Shutdown,
}

/// Round-robin scheduler state.
#[derive(Debug)]
pub struct Scheduler {
    /// READY processes, oldest first.
    ready_queue: ProcQueue,
    /// Slot of the RUNNING process.
    current: Option<usize>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            ready_queue: ProcQueue::new(QueueId::Ready),
            current: None,
        }
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Forget the running process; it is about to block, yield or exit.
    pub fn take_current(&mut self) -> Option<usize> {
        self.current.take()
    }

    /// Append `slot` to the tail of the ready queue.
    pub fn insert_to_ready_queue(&mut self, procs: &mut ProcessTable, slot: usize) {
        if self.current == Some(slot) {
            self.current = None;
        }
        procs.get_mut(slot).state = ProcessState::Ready;
        self.ready_queue.push_back(procs, slot);
    }

    pub fn ready_len(&self) -> usize {
        self.ready_queue.len()
    }

    /// Ready slots from head to tail.
    pub fn ready_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.ready_queue.iter()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Run the oldest ready process.
    pub fn schedule(&mut self, hart: &mut dyn Hart) -> Resume {
        let slot = match self.sched.ready_queue.pop_front(&mut self.procs) {
            Some(slot) => slot,
            None if self.procs.all_finished() => {
                crate::log_info!("no more ready processes, system shutdown now.");
                return Resume::Shutdown;
            }
            None => fatal(KernelError::ReadyQueueEmpty),
        };

        let proc = self.procs.get_mut(slot);
        proc.state = ProcessState::Running;
        self.sched.current = Some(slot);
        crate::log_info!("going to schedule process {} to run.", proc.pid.0);
        self.switch_to(slot, hart)
    }

    /// Prepare the hart to return into `slot`.
    ///
    /// The trapframe's kernel fields are refreshed every time, so the trap
    /// vector always finds this process's own kernel stack.
    pub fn switch_to(&mut self, slot: usize, hart: &mut dyn Hart) -> Resume {
        let proc = self.procs.get(slot);
        let pid = proc.pid;
        let (Some(pagetable), Some(kstack)) = (proc.pagetable(), proc.kstack()) else {
            fatal(KernelError::InvalidState);
        };
        let satp = pagetable.satp(&self.mem);
        let kernel_sp = self.mem.start_address(kstack) + PAGE_SIZE as u64;
        let trapframe = self.trapframe_addr(slot);
        let boot = self.boot;

        let tf = self.trapframe_mut(slot);
        tf.kernel_sp = kernel_sp;
        tf.kernel_trap = boot.strap_handler;
        tf.kernel_satp = boot.kernel_satp;
        let epc = tf.epc;

        hart.write_csr(Csr::Stvec, boot.trap_vector);
        hart.write_csr(Csr::Sscratch, trapframe);
        hart.write_csr(Csr::Sepc, epc);
        // sret drops to U-mode with interrupts enabled.
        hart.clear_csr_bits(Csr::Sstatus, SSTATUS_SPP);
        hart.set_csr_bits(Csr::Sstatus, SSTATUS_SPIE);

        Resume::User { pid, trapframe, satp }
    }

    /// Return to the running process, or pick a new one if it gave up the hart.
    pub fn resume(&mut self, hart: &mut dyn Hart) -> Resume {
        match self.sched.current() {
            Some(slot) => self.switch_to(slot, hart),
            None => self.schedule(hart),
        }
    }
}
