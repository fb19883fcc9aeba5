//! Kernel-wide constants and the runtime configuration handed to [`crate::Kernel`].

use crate::memory::PAGE_SIZE;

/// Maximum number of processes in the pool.
pub const NPROC: usize = 32;

/// Maximum number of live semaphores.
pub const NSEM: usize = 32;

/// Cycles between two machine timer interrupts.
pub const TIMER_INTERVAL: u64 = 1_000_000;

/// Supervisor timer ticks a process may run before it is rotated to the back of the ready queue.
pub const TIME_SLICE_LEN: u64 = 2;

/// Top of every user stack; the stack page sits just below it.
pub const USER_STACK_TOP: u64 = 0x7fff_f000;

/// First virtual address handed out by the `allocate_page` syscall.
pub const USER_FREE_ADDRESS_START: u64 = 0x0040_0000;

/// A process keeps one page worth of region records.
pub const MAX_MAPPED_REGIONS: usize = PAGE_SIZE / core::mem::size_of::<crate::process::MappedRegion>();

/// Symbol at which user stack unwinding stops.
pub const ENTRY_SYMBOL: &str = "main";

/// Tunables for one kernel instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub nproc: usize,
    pub nsem: usize,
    pub timer_interval: u64,
    pub time_slice: u64,
    pub user_stack_top: u64,
    pub user_heap_start: u64,
    pub entry_symbol: &'static str,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            nproc: NPROC,
            nsem: NSEM,
            timer_interval: TIMER_INTERVAL,
            time_slice: TIME_SLICE_LEN,
            user_stack_top: USER_STACK_TOP,
            user_heap_start: USER_FREE_ADDRESS_START,
            entry_symbol: ENTRY_SYMBOL,
        }
    }
}

/// What the boot code knows about the machine when it hands control to the kernel.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo {
    /// `satp` value of the kernel's own address space.
    pub kernel_satp: u64,
    /// Physical address of the page holding the supervisor trap vector.
    pub trap_vector: u64,
    /// Address of the Rust supervisor trap handler the vector jumps to.
    pub strap_handler: u64,
    /// Physical address of the first frame the kernel may hand out.
    pub frame_base: u64,
    /// Number of 4 KiB frames available from `frame_base` on.
    pub frame_count: usize,
}
