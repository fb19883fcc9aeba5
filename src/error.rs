use core::fmt;

use crate::process::ProcessId;

/// Everything that can go wrong inside the kernel.
///
/// Only [`KernelError::NoChild`] and [`KernelError::UnwoundPastEntry`] ever reach
/// user space (as `-1`); the rest are turned into a halt by [`fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    ProcessPoolExhausted,
    SemaphorePoolExhausted,
    OutOfMemory,
    RegionTableFull,
    AlreadyMapped(u64),
    NotMapped(u64),
    BadAddress(u64),
    InvalidSemaphore(usize),
    NoChild,
    UnwoundPastEntry,
    ReadyQueueEmpty,
    NoCurrentProcess,
    InvalidState,
    AlreadyQueued(ProcessId),
}

impl KernelError {
    /// Errors a user process is expected to check for itself.
    pub fn is_local(&self) -> bool {
        matches!(self, KernelError::NoChild | KernelError::UnwoundPastEntry)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::ProcessPoolExhausted => write!(f, "Cannot find any free process structure"),
            KernelError::SemaphorePoolExhausted => write!(f, "No free semaphore slot"),
            KernelError::OutOfMemory => write!(f, "Out of physical memory"),
            KernelError::RegionTableFull => write!(f, "Mapped region table is full"),
            KernelError::AlreadyMapped(va) => write!(f, "Virtual address {:#x} is already mapped", va),
            KernelError::NotMapped(va) => write!(f, "Virtual address {:#x} is not mapped", va),
            KernelError::BadAddress(addr) => write!(f, "Cannot translate address {:#x}", addr),
            KernelError::InvalidSemaphore(id) => write!(f, "Invalid semaphore id {}", id),
            KernelError::NoChild => write!(f, "No child to wait for"),
            KernelError::UnwoundPastEntry => write!(f, "Backtrace unwound past the entry point"),
            KernelError::ReadyQueueEmpty => write!(f, "Ready queue is empty while processes are still alive"),
            KernelError::NoCurrentProcess => write!(f, "No process is running"),
            KernelError::InvalidState => write!(f, "Process is in the wrong state for this operation"),
            KernelError::AlreadyQueued(pid) => write!(f, "Process {} is already on a queue", pid.0),
        }
    }
}

pub type KResult<T> = Result<T, KernelError>;

/// Log the error and halt the machine.
#[track_caller]
pub fn fatal(err: KernelError) -> ! {
    crate::log_error!("fatal: {}", err);
    panic!("{}", err);
}

/// Unwrap a kernel result, treating any error as fatal.
pub trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for KResult<T> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(err),
        }
    }
}
