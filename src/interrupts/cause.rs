//! Decoding of `mcause` / `scause`.

use bit_field::BitField;

const INTERRUPT_BIT: usize = 63;

const IRQ_S_SOFT: u64 = 1;
const IRQ_M_TIMER: u64 = 7;

const EXC_FETCH_ACCESS: u64 = 1;
const EXC_ILLEGAL_INSTRUCTION: u64 = 2;
const EXC_MISALIGNED_LOAD: u64 = 4;
const EXC_LOAD_ACCESS: u64 = 5;
const EXC_MISALIGNED_STORE: u64 = 6;
const EXC_STORE_ACCESS: u64 = 7;
const EXC_USER_ECALL: u64 = 8;

fn split(cause: u64) -> (bool, u64) {
    (cause.get_bit(INTERRUPT_BIT), cause.get_bits(0..INTERRUPT_BIT))
}

/// Build a raw cause value, as the hardware would report it.
pub const fn interrupt_cause(code: u64) -> u64 {
    (1 << INTERRUPT_BIT) | code
}

/// Traps taken in machine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineTrap {
    Timer,
    InstructionAccessFault,
    IllegalInstruction,
    MisalignedLoad,
    LoadAccessFault,
    MisalignedStore,
    StoreAccessFault,
    /// Anything else; always fatal.
    Unknown(u64),
}

impl MachineTrap {
    pub fn from_mcause(mcause: u64) -> Self {
        match split(mcause) {
            (true, IRQ_M_TIMER) => MachineTrap::Timer,
            (false, EXC_FETCH_ACCESS) => MachineTrap::InstructionAccessFault,
            (false, EXC_ILLEGAL_INSTRUCTION) => MachineTrap::IllegalInstruction,
            (false, EXC_MISALIGNED_LOAD) => MachineTrap::MisalignedLoad,
            (false, EXC_LOAD_ACCESS) => MachineTrap::LoadAccessFault,
            (false, EXC_MISALIGNED_STORE) => MachineTrap::MisalignedStore,
            (false, EXC_STORE_ACCESS) => MachineTrap::StoreAccessFault,
            _ => MachineTrap::Unknown(mcause),
        }
    }
}

/// Traps taken in supervisor mode while a user process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorTrap {
    UserEcall,
    /// Timer tick forwarded from machine mode.
    SoftwareInterrupt,
    Unknown(u64),
}

impl SupervisorTrap {
    pub fn from_scause(scause: u64) -> Self {
        match split(scause) {
            (false, EXC_USER_ECALL) => SupervisorTrap::UserEcall,
            (true, IRQ_S_SOFT) => SupervisorTrap::SoftwareInterrupt,
            _ => SupervisorTrap::Unknown(scause),
        }
    }
}
