//! System call decoding and dispatch.
//!
//! `a0` carries the number, `a1..a7` the arguments; the result goes back in `a0`.

pub mod backtrace;

use crate::arch::Hart;
use crate::error::{fatal, KResult, KernelError};
use crate::kernel::Kernel;
use crate::log_error;
use crate::memory::{copy_from_user, page_offset, PAGE_SIZE};
use crate::process::{SegmentKind, WaitTarget};

pub const SYS_USER_BASE: u64 = 64;
pub const SYS_USER_PRINT: u64 = SYS_USER_BASE;
pub const SYS_USER_EXIT: u64 = SYS_USER_BASE + 1;
pub const SYS_USER_ALLOCATE_PAGE: u64 = SYS_USER_BASE + 2;
pub const SYS_USER_FREE_PAGE: u64 = SYS_USER_BASE + 3;
pub const SYS_USER_FORK: u64 = SYS_USER_BASE + 4;
pub const SYS_USER_YIELD: u64 = SYS_USER_BASE + 5;
pub const SYS_USER_WAIT: u64 = SYS_USER_BASE + 6;
pub const SYS_USER_BACKTRACE: u64 = SYS_USER_BASE + 7;
pub const SYS_USER_SEM_NEW: u64 = SYS_USER_BASE + 8;
pub const SYS_USER_SEM_P: u64 = SYS_USER_BASE + 9;
pub const SYS_USER_SEM_V: u64 = SYS_USER_BASE + 10;

/// A decoded system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Print { buf: u64, len: u64 },
    Exit { code: i64 },
    AllocatePage,
    FreePage { va: u64 },
    Fork,
    Yield,
    Wait { target: WaitTarget },
    Backtrace { depth: u64 },
    SemNew { init: i64 },
    SemP { id: usize },
    SemV { id: usize },
}

impl Syscall {
    /// `args` is `a0..a7`. Unknown numbers give `None`.
    pub fn decode(args: [u64; 8]) -> Option<Self> {
        let call = match args[0] {
            SYS_USER_PRINT => Syscall::Print { buf: args[1], len: args[2] },
            SYS_USER_EXIT => Syscall::Exit { code: args[1] as i64 },
            SYS_USER_ALLOCATE_PAGE => Syscall::AllocatePage,
            SYS_USER_FREE_PAGE => Syscall::FreePage { va: args[1] },
            SYS_USER_FORK => Syscall::Fork,
            SYS_USER_YIELD => Syscall::Yield,
            SYS_USER_WAIT => Syscall::Wait { target: WaitTarget::from_arg(args[1]) },
            SYS_USER_BACKTRACE => Syscall::Backtrace { depth: args[1] },
            SYS_USER_SEM_NEW => Syscall::SemNew { init: args[1] as i64 },
            SYS_USER_SEM_P => Syscall::SemP { id: args[1] as usize },
            SYS_USER_SEM_V => Syscall::SemV { id: args[1] as usize },
            _ => return None,
        };
        Some(call)
    }
}

/// Run the system call process `slot` trapped with.
///
/// Returns the value for the caller's `a0`, or `None` when nothing may be
/// written back: the caller exited, or blocked in `wait` and gets its
/// result when a child exits.
pub fn do_syscall(kernel: &mut Kernel, hart: &mut dyn Hart, slot: usize, args: [u64; 8]) -> Option<i64> {
    let Some(call) = Syscall::decode(args) else {
        log_error!("pid {} made unknown syscall {}", kernel.procs.get(slot).pid.0, args[0]);
        panic!("Unknown syscall {}", args[0]);
    };

    match dispatch(kernel, hart, slot, call) {
        Ok(ret) => ret,
        Err(err) if err.is_local() => {
            crate::log_warn!("syscall {:?} failed: {}", call, err);
            Some(-1)
        }
        Err(err) => fatal(err),
    }
}

fn dispatch(kernel: &mut Kernel, hart: &mut dyn Hart, slot: usize, call: Syscall) -> KResult<Option<i64>> {
    match call {
        Syscall::Print { buf, len } => sys_user_print(kernel, hart, slot, buf, len).map(Some),
        Syscall::Exit { code } => {
            kernel.do_exit(slot, code)?;
            Ok(None)
        }
        Syscall::AllocatePage => sys_user_allocate_page(kernel, slot).map(|va| Some(va as i64)),
        Syscall::FreePage { va } => sys_user_free_page(kernel, slot, va).map(Some),
        Syscall::Fork => kernel.do_fork(slot).map(|pid| Some(pid.0 as i64)),
        Syscall::Yield => {
            kernel.do_yield(slot);
            Ok(Some(0))
        }
        Syscall::Wait { target } => kernel
            .do_wait(slot, target)
            .map(|reaped| reaped.map(|pid| pid.0 as i64)),
        Syscall::Backtrace { depth } => backtrace::sys_user_backtrace(kernel, hart, slot, depth).map(Some),
        Syscall::SemNew { init } => kernel.do_sem_new(init).map(|id| Some(id as i64)),
        Syscall::SemP { id } => kernel.do_sem_p(slot, id).map(|_| Some(0)),
        Syscall::SemV { id } => kernel.do_sem_v(id).map(|_| Some(0)),
    }
}

/// Copy `len` bytes from the caller's buffer to the console.
fn sys_user_print(kernel: &Kernel, hart: &mut dyn Hart, slot: usize, buf: u64, len: u64) -> KResult<i64> {
    let pagetable = kernel.procs.get(slot).pagetable().ok_or(KernelError::InvalidState)?;
    let mut chunk = [0u8; 256];
    let mut done = 0;
    while done < len {
        let n = (len - done).min(chunk.len() as u64) as usize;
        copy_from_user(&kernel.mem, pagetable, buf + done, &mut chunk[..n])?;
        hart.console_write(&chunk[..n]);
        done += n as u64;
    }
    Ok(0)
}

/// Map one fresh page at the caller's heap top and return its address.
fn sys_user_allocate_page(kernel: &mut Kernel, slot: usize) -> KResult<u64> {
    let proc = kernel.procs.get_mut(slot);
    let va = proc.heap_top;
    proc.map_region(&mut kernel.mem, va, 1, SegmentKind::Data)?;
    proc.heap_top += PAGE_SIZE as u64;
    Ok(va)
}

fn sys_user_free_page(kernel: &mut Kernel, slot: usize, va: u64) -> KResult<i64> {
    if page_offset(va) != 0 {
        return Err(KernelError::BadAddress(va));
    }
    let heap_start = kernel.config.user_heap_start;
    kernel.procs.get_mut(slot).unmap_heap_page(&mut kernel.mem, heap_start, va)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_numbers() {
        let mut args = [0u64; 8];
        args[0] = SYS_USER_PRINT;
        args[1] = 0x1000;
        args[2] = 5;
        assert_eq!(Syscall::decode(args), Some(Syscall::Print { buf: 0x1000, len: 5 }));

        args[0] = SYS_USER_WAIT;
        args[1] = -1i64 as u64;
        assert_eq!(Syscall::decode(args), Some(Syscall::Wait { target: WaitTarget::Any }));

        args[0] = SYS_USER_SEM_NEW;
        args[1] = 3;
        assert_eq!(Syscall::decode(args), Some(Syscall::SemNew { init: 3 }));
    }

    #[test]
    fn decode_rejects_unknown_numbers() {
        let mut args = [0u64; 8];
        args[0] = SYS_USER_BASE - 1;
        assert_eq!(Syscall::decode(args), None);
        args[0] = SYS_USER_SEM_V + 1;
        assert_eq!(Syscall::decode(args), None);
    }
}
