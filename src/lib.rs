#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod debug;
pub mod error;
pub mod interrupts;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod serial;
pub mod sync;
pub mod syscalls;

pub use config::{BootInfo, KernelConfig};
pub use error::{KResult, KernelError};
pub use kernel::Kernel;
pub use process::{ProcessId, ProcessState, ProgramImage};
pub use scheduler::Resume;

#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Give the kernel heap its memory.
///
/// # Safety
/// `start..start + size` must be unused, writable memory that outlives the kernel.
#[cfg(target_os = "none")]
pub unsafe fn init_heap(start: usize, size: usize) {
    ALLOCATOR.lock().init(start as *mut u8, size);
}

#[cfg(all(target_arch = "riscv64", target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    if let Some(loc) = info.location() {
        log_error!("PANIC at {}:{}:{}", loc.file(), loc.line(), loc.column());
    }
    log_error!("{}", info);
    arch::riscv::shutdown(false)
}
