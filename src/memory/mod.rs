pub mod frame_allocator;
pub mod paging;

pub use frame_allocator::{Frame, FrameAllocator, PhysFrame};
pub use paging::{copy_from_user, copy_to_user, read_user_u64, PageTable, PageTableEntry, PteFlags};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

pub type PhysAddr = u64;
pub type VirtAddr = u64;

pub const fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

pub const fn page_align_up(addr: u64) -> u64 {
    page_align_down(addr + PAGE_SIZE as u64 - 1)
}

pub const fn page_offset(addr: u64) -> usize {
    (addr & (PAGE_SIZE as u64 - 1)) as usize
}

/// Number of pages touched by `[addr, addr + len)`.
pub const fn pages_spanning(addr: u64, len: u64) -> usize {
    if len == 0 {
        return 0;
    }
    ((page_align_up(addr + len) - page_align_down(addr)) / PAGE_SIZE as u64) as usize
}
