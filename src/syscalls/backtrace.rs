use crate::arch::Hart;
use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::memory::read_user_u64;

/// Print the names of up to `depth` callers of the process's syscall wrapper.
///
/// Walks the frame-pointer chain: each frame keeps `ra` at `fp - 8` and the
/// caller's `fp` at `fp - 16`. Reaching the entry symbol, or the end of the
/// chain, before `depth` frames have been printed is an error for the caller.
pub fn sys_user_backtrace(kernel: &Kernel, hart: &mut dyn Hart, slot: usize, depth: u64) -> KResult<i64> {
    let pagetable = kernel.procs.get(slot).pagetable().ok_or(KernelError::InvalidState)?;
    let entry = kernel.config.entry_symbol;
    let mut fp = kernel.trapframe(slot).regs.s0 + 16;

    for cur in 0..depth {
        if fp < 16 {
            return Err(KernelError::UnwoundPastEntry);
        }
        let ra = read_user_u64(&kernel.mem, pagetable, fp - 8)?;
        fp = read_user_u64(&kernel.mem, pagetable, fp - 16)?;

        let name = kernel.symbols().symbol_for(ra).unwrap_or("<unknown>");
        hart.console_write(name.as_bytes());
        hart.console_write(b"\n");
        if name == entry && cur + 1 < depth {
            return Err(KernelError::UnwoundPastEntry);
        }
    }
    Ok(0)
}
