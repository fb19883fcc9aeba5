use super::cause::SupervisorTrap;
use crate::arch::{Csr, Hart, SIP_SSIP};
use crate::error::OrFatal;
use crate::kernel::Kernel;
use crate::scheduler::Resume;
use crate::syscalls;

/// Supervisor trap taken from user mode.
///
/// The trap vector has already saved the user registers into the running
/// process's trapframe. The returned [`Resume`] says which process to
/// return into.
pub fn handle_strap(kernel: &mut Kernel, hart: &mut dyn Hart) -> Resume {
    let slot = kernel.current_slot().or_fatal();
    let sepc = hart.read_csr(Csr::Sepc);
    kernel.trapframe_mut(slot).epc = sepc;

    match SupervisorTrap::from_scause(hart.read_csr(Csr::Scause)) {
        SupervisorTrap::UserEcall => handle_syscall(kernel, hart, slot),
        SupervisorTrap::SoftwareInterrupt => handle_user_timer(kernel, hart, slot),
        SupervisorTrap::Unknown(scause) => {
            crate::log_error!("smode_trap_handler(): unexpected scause {:#x}", scause);
            crate::log_error!("            sepc={:#x} stval={:#x}", sepc, hart.read_csr(Csr::Stval));
            panic!("unexpected exception happened.");
        }
    }

    kernel.resume(hart)
}

fn handle_syscall(kernel: &mut Kernel, hart: &mut dyn Hart, slot: usize) {
    // Resume after the ecall.
    kernel.trapframe_mut(slot).epc += 4;
    let args = kernel.trapframe(slot).syscall_args();
    if let Some(ret) = syscalls::do_syscall(kernel, hart, slot, args) {
        kernel.trapframe_mut(slot).set_return(ret);
    }
}

fn handle_user_timer(kernel: &mut Kernel, hart: &mut dyn Hart, slot: usize) {
    hart.clear_csr_bits(Csr::Sip, SIP_SSIP);
    let time_slice = kernel.config.time_slice;
    let proc = kernel.procs.get_mut(slot);
    proc.tick_count += 1;
    if proc.tick_count >= time_slice {
        proc.tick_count = 0;
        kernel.do_yield(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::MockHart;
    use crate::interrupts::cause::interrupt_cause;
    use crate::kernel::testing::{self, CODE_VA, DATA_VA};
    use crate::syscalls::{SYS_USER_PRINT, SYS_USER_WAIT};

    fn trap(kernel: &mut Kernel, hart: &mut MockHart, scause: u64) -> Resume {
        let slot = kernel.current_slot().unwrap();
        hart.write_csr(Csr::Scause, scause);
        hart.write_csr(Csr::Sepc, kernel.trapframe(slot).epc);
        handle_strap(kernel, hart)
    }

    fn ecall(kernel: &mut Kernel, hart: &mut MockHart, args: &[u64]) -> Resume {
        let slot = kernel.current_slot().unwrap();
        let regs = &mut kernel.trapframe_mut(slot).regs;
        regs.a0 = args[0];
        regs.a1 = args.get(1).copied().unwrap_or(0);
        regs.a2 = args.get(2).copied().unwrap_or(0);
        trap(kernel, hart, 8)
    }

    #[test]
    fn ecall_runs_the_syscall_and_steps_past_it() {
        let mut kernel = testing::kernel(256);
        let mut hart = MockHart::new();
        let pid = kernel.load_user_program(&testing::program(b"hi there")).unwrap();
        kernel.schedule(&mut hart);

        let resume = ecall(&mut kernel, &mut hart, &[SYS_USER_PRINT, DATA_VA, 8]);
        assert!(matches!(resume, Resume::User { pid: p, .. } if p == pid));
        assert_eq!(hart.console_text(), "hi there");

        let slot = kernel.current_slot().unwrap();
        assert_eq!(kernel.trapframe(slot).epc, CODE_VA + 4);
        assert_eq!(kernel.trapframe(slot).regs.a0, 0);
        assert_eq!(hart.read_csr(Csr::Sepc), CODE_VA + 4);
    }

    #[test]
    fn local_failures_come_back_as_minus_one() {
        let mut kernel = testing::kernel(256);
        let mut hart = MockHart::new();
        kernel.load_user_program(&testing::program(b"x")).unwrap();
        kernel.schedule(&mut hart);

        ecall(&mut kernel, &mut hart, &[SYS_USER_WAIT, u64::MAX]);
        let slot = kernel.current_slot().unwrap();
        assert_eq!(kernel.trapframe(slot).regs.a0 as i64, -1);
    }

    #[test]
    fn ticks_rotate_the_running_process_after_a_time_slice() {
        let mut kernel = testing::kernel(256);
        let mut hart = MockHart::new();
        let a = kernel.load_user_program(&testing::program(b"a")).unwrap();
        let b = kernel.load_user_program(&testing::program(b"b")).unwrap();
        kernel.schedule(&mut hart);

        hart.write_csr(Csr::Sip, SIP_SSIP);
        let first = trap(&mut kernel, &mut hart, interrupt_cause(1));
        assert!(matches!(first, Resume::User { pid, .. } if pid == a));
        assert_eq!(hart.read_csr(Csr::Sip) & SIP_SSIP, 0);

        let second = trap(&mut kernel, &mut hart, interrupt_cause(1));
        assert!(matches!(second, Resume::User { pid, .. } if pid == b));
        let slot_a = kernel.procs.find_slot(a).unwrap();
        assert_eq!(kernel.procs.get(slot_a).tick_count, 0);
        assert_eq!(kernel.sched.ready_slots().collect::<alloc::vec::Vec<_>>(), [slot_a]);
    }

    #[test]
    #[should_panic(expected = "unexpected exception happened.")]
    fn other_supervisor_causes_are_fatal() {
        let mut kernel = testing::kernel(256);
        let mut hart = MockHart::new();
        kernel.load_user_program(&testing::program(b"x")).unwrap();
        kernel.schedule(&mut hart);
        trap(&mut kernel, &mut hart, 13);
    }

    #[test]
    #[should_panic(expected = "Unknown syscall 7")]
    fn unknown_syscalls_are_fatal() {
        let mut kernel = testing::kernel(256);
        let mut hart = MockHart::new();
        kernel.load_user_program(&testing::program(b"x")).unwrap();
        kernel.schedule(&mut hart);
        ecall(&mut kernel, &mut hart, &[7]);
    }

    #[test]
    #[should_panic(expected = "No process is running")]
    fn trap_without_a_running_process_is_fatal() {
        let mut kernel = testing::kernel(256);
        let mut hart = MockHart::new();
        handle_strap(&mut kernel, &mut hart);
    }
}
