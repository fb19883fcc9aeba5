use alloc::boxed::Box;

use super::cause::MachineTrap;
use crate::arch::{Csr, Hart, SIP_SSIP};
use crate::debug::{error_line_report, LineTable, NoDebugInfo};
use crate::{log_error, log_info};

/// Machine-mode trap handling. Holds no process state.
pub struct MachineTrapHandler {
    timer_interval: u64,
    lines: Box<dyn LineTable + Send>,
}

impl MachineTrapHandler {
    pub fn new(timer_interval: u64) -> Self {
        MachineTrapHandler {
            timer_interval,
            lines: Box::new(NoDebugInfo),
        }
    }

    pub fn with_line_table(mut self, lines: Box<dyn LineTable + Send>) -> Self {
        self.lines = lines;
        self
    }

    /// Arm the first timer interrupt.
    pub fn start_timer(&self, hart: &mut dyn Hart) {
        let now = hart.mtime();
        hart.set_mtimecmp(now + self.timer_interval);
        log_info!("timer armed, interval {} cycles", self.timer_interval);
    }

    pub fn handle(&mut self, hart: &mut dyn Hart) {
        let mepc = hart.read_csr(Csr::Mepc);
        if let Some(report) = error_line_report(self.lines.as_ref(), mepc) {
            crate::serial::_print(format_args!("{}", report));
        }

        match MachineTrap::from_mcause(hart.read_csr(Csr::Mcause)) {
            MachineTrap::Timer => self.handle_timer(hart),
            MachineTrap::InstructionAccessFault => fault(hart, "Instruction access fault!"),
            MachineTrap::LoadAccessFault => fault(hart, "Load access fault!"),
            MachineTrap::StoreAccessFault => fault(hart, "Store/AMO access fault!"),
            MachineTrap::IllegalInstruction => fault(hart, "Illegal instruction!"),
            MachineTrap::MisalignedLoad => fault(hart, "Misaligned Load!"),
            MachineTrap::MisalignedStore => fault(hart, "Misaligned AMO!"),
            MachineTrap::Unknown(mcause) => {
                log_error!("machine trap(): unexpected mcause {:#x}", mcause);
                log_error!("            mepc={:#x} mtval={:#x}", mepc, hart.read_csr(Csr::Mtval));
                panic!("unexpected exception happened in M-mode.");
            }
        }
    }

    /// Re-arm the comparator and let supervisor mode do the rescheduling.
    fn handle_timer(&self, hart: &mut dyn Hart) {
        let now = hart.mtime();
        hart.set_mtimecmp(now + self.timer_interval);
        hart.set_csr_bits(Csr::Sip, SIP_SSIP);
    }
}

fn fault(hart: &dyn Hart, what: &str) -> ! {
    log_error!(
        "{} mepc={:#x} mtval={:#x}",
        what,
        hart.read_csr(Csr::Mepc),
        hart.read_csr(Csr::Mtval)
    );
    panic!("{}", what);
}
