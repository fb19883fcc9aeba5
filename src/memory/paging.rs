//! Sv39 page tables built out of frames from the [`FrameAllocator`].

use core::fmt;

use bit_field::BitField;
use bitflags::bitflags;

use super::{page_offset, Frame, FrameAllocator, PhysAddr, PhysFrame, VirtAddr, PAGE_SHIFT, PAGE_SIZE};
use crate::error::{KResult, KernelError};

const ENTRIES_PER_TABLE: usize = 512;
const LEVELS: usize = 3;
const SATP_MODE_SV39: u64 = 8 << 60;

bitflags! {
    /// Sv39 page-table entry permission and status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const VALID    = 1 << 0;
        const READ     = 1 << 1;
        const WRITE    = 1 << 2;
        const EXECUTE  = 1 << 3;
        const USER     = 1 << 4;
        const GLOBAL   = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY    = 1 << 7;
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub fn new(pa: PhysAddr, flags: PteFlags) -> Self {
        let mut raw = 0u64;
        raw.set_bits(10..54, pa >> PAGE_SHIFT);
        raw.set_bits(0..8, flags.bits());
        PageTableEntry(raw)
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0.get_bits(0..8))
    }

    pub fn addr(self) -> PhysAddr {
        self.0.get_bits(10..54) << PAGE_SHIFT
    }

    pub fn is_valid(self) -> bool {
        self.flags().contains(PteFlags::VALID)
    }

    /// A valid entry with any of R/W/X set maps a page; otherwise it points to the next level.
    pub fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().intersects(PteFlags::READ | PteFlags::WRITE | PteFlags::EXECUTE)
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("flags", &self.flags())
            .finish()
    }
}

impl Frame {
    fn entries(&self) -> &[PageTableEntry; ENTRIES_PER_TABLE] {
        // Frame is 4096-aligned and exactly 512 entries long.
        unsafe { &*(self.bytes().as_ptr() as *const [PageTableEntry; ENTRIES_PER_TABLE]) }
    }

    fn entries_mut(&mut self) -> &mut [PageTableEntry; ENTRIES_PER_TABLE] {
        unsafe { &mut *(self.bytes_mut().as_mut_ptr() as *mut [PageTableEntry; ENTRIES_PER_TABLE]) }
    }
}

fn vpn(va: VirtAddr, level: usize) -> usize {
    let shift = PAGE_SHIFT + 9 * level;
    va.get_bits(shift..shift + 9) as usize
}

/// Root of one address space. Owns its table frames, not the pages it maps.
#[derive(Debug)]
pub struct PageTable {
    root: PhysFrame,
}

impl PageTable {
    pub fn new(mem: &mut FrameAllocator) -> KResult<Self> {
        let root = mem.allocate_frame().ok_or(KernelError::OutOfMemory)?;
        Ok(PageTable { root })
    }

    /// Value to load into `satp` to activate this table.
    pub fn satp(&self, mem: &FrameAllocator) -> u64 {
        SATP_MODE_SV39 | (mem.start_address(self.root) >> PAGE_SHIFT)
    }

    /// Leaf table and index for `va`, allocating missing intermediate tables.
    fn walk_create(&mut self, mem: &mut FrameAllocator, va: VirtAddr) -> KResult<(PhysFrame, usize)> {
        let mut table = self.root;
        for level in (1..LEVELS).rev() {
            let index = vpn(va, level);
            let entry = mem.frame(table).entries()[index];
            table = if entry.is_valid() {
                if entry.is_leaf() {
                    return Err(KernelError::AlreadyMapped(va));
                }
                mem.containing_address(entry.addr()).ok_or(KernelError::BadAddress(entry.addr()))?
            } else {
                let next = mem.allocate_frame().ok_or(KernelError::OutOfMemory)?;
                let pa = mem.start_address(next);
                mem.frame_mut(table).entries_mut()[index] = PageTableEntry::new(pa, PteFlags::VALID);
                next
            };
        }
        Ok((table, vpn(va, 0)))
    }

    /// Leaf table and index for `va` if every intermediate level exists.
    fn walk(&self, mem: &FrameAllocator, va: VirtAddr) -> Option<(PhysFrame, usize)> {
        let mut table = self.root;
        for level in (1..LEVELS).rev() {
            let entry = mem.frame(table).entries()[vpn(va, level)];
            if !entry.is_valid() || entry.is_leaf() {
                return None;
            }
            table = mem.containing_address(entry.addr())?;
        }
        Some((table, vpn(va, 0)))
    }

    fn leaf(&self, mem: &FrameAllocator, va: VirtAddr) -> Option<PageTableEntry> {
        let (table, index) = self.walk(mem, va)?;
        let entry = mem.frame(table).entries()[index];
        entry.is_leaf().then_some(entry)
    }

    /// Map the page containing `va` to the frame at `pa`.
    pub fn map_page(&mut self, mem: &mut FrameAllocator, va: VirtAddr, pa: PhysAddr, flags: PteFlags) -> KResult<()> {
        let (table, index) = self.walk_create(mem, va)?;
        let slot = &mut mem.frame_mut(table).entries_mut()[index];
        if slot.is_valid() {
            return Err(KernelError::AlreadyMapped(va));
        }
        *slot = PageTableEntry::new(pa, flags | PteFlags::VALID | PteFlags::ACCESSED | PteFlags::DIRTY);
        Ok(())
    }

    /// Back `npages` pages starting at `va` with fresh zeroed frames.
    ///
    /// Either every page is mapped or none is: on failure the pages mapped by
    /// this call are released again before the error is returned.
    pub fn map_fresh(&mut self, mem: &mut FrameAllocator, va: VirtAddr, npages: usize, flags: PteFlags) -> KResult<()> {
        for i in 0..npages {
            let page_va = va + (i * PAGE_SIZE) as u64;
            let result = match mem.allocate_frame() {
                Some(frame) => {
                    let pa = mem.start_address(frame);
                    self.map_page(mem, page_va, pa, flags).map_err(|err| {
                        mem.deallocate_frame(frame);
                        err
                    })
                }
                None => Err(KernelError::OutOfMemory),
            };
            if let Err(err) = result {
                self.unmap(mem, va, i, true)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove `npages` mappings starting at `va`, optionally releasing the frames behind them.
    ///
    /// Nothing is touched unless every page in the range is mapped.
    pub fn unmap(&mut self, mem: &mut FrameAllocator, va: VirtAddr, npages: usize, release: bool) -> KResult<()> {
        for i in 0..npages {
            let page_va = va + (i * PAGE_SIZE) as u64;
            if self.leaf(mem, page_va).is_none() {
                return Err(KernelError::NotMapped(page_va));
            }
        }
        for i in 0..npages {
            let page_va = va + (i * PAGE_SIZE) as u64;
            let (table, index) = self.walk(mem, page_va).ok_or(KernelError::NotMapped(page_va))?;
            let entry = core::mem::take(&mut mem.frame_mut(table).entries_mut()[index]);
            if release {
                let frame = mem.containing_address(entry.addr()).ok_or(KernelError::BadAddress(entry.addr()))?;
                mem.deallocate_frame(frame);
            }
        }
        Ok(())
    }

    pub fn translate(&self, mem: &FrameAllocator, va: VirtAddr) -> Option<PhysAddr> {
        self.leaf(mem, va).map(|entry| entry.addr() + page_offset(va) as u64)
    }

    /// Translate only if the page is user accessible.
    pub fn translate_user(&self, mem: &FrameAllocator, va: VirtAddr) -> Option<PhysAddr> {
        let entry = self.leaf(mem, va)?;
        entry
            .flags()
            .contains(PteFlags::USER)
            .then(|| entry.addr() + page_offset(va) as u64)
    }

    pub fn flags(&self, mem: &FrameAllocator, va: VirtAddr) -> Option<PteFlags> {
        self.leaf(mem, va).map(PageTableEntry::flags)
    }

    /// Frame mapped at `va`, when it comes from the pool.
    pub fn frame_at(&self, mem: &FrameAllocator, va: VirtAddr) -> Option<PhysFrame> {
        self.leaf(mem, va).and_then(|entry| mem.containing_address(entry.addr()))
    }

    /// Free the table frames. Leaf pages must already have been unmapped by their owner.
    pub fn release(self, mem: &mut FrameAllocator) {
        release_table(mem, self.root, LEVELS - 1);
    }
}

fn release_table(mem: &mut FrameAllocator, table: PhysFrame, level: usize) {
    if level > 0 {
        let entries = *mem.frame(table).entries();
        for entry in entries.iter().filter(|e| e.is_valid() && !e.is_leaf()) {
            if let Some(child) = mem.containing_address(entry.addr()) {
                release_table(mem, child, level - 1);
            }
        }
    }
    mem.deallocate_frame(table);
}

/// Copy user memory at `va` into `buf`, translating page by page.
pub fn copy_from_user(mem: &FrameAllocator, pt: &PageTable, va: VirtAddr, buf: &mut [u8]) -> KResult<()> {
    let mut done = 0;
    while done < buf.len() {
        let cur = va + done as u64;
        let pa = pt.translate_user(mem, cur).ok_or(KernelError::BadAddress(cur))?;
        let chunk = (buf.len() - done).min(PAGE_SIZE - page_offset(cur));
        mem.read(pa, &mut buf[done..done + chunk])?;
        done += chunk;
    }
    Ok(())
}

/// Copy `data` into user memory at `va`, translating page by page.
pub fn copy_to_user(mem: &mut FrameAllocator, pt: &PageTable, va: VirtAddr, data: &[u8]) -> KResult<()> {
    let mut done = 0;
    while done < data.len() {
        let cur = va + done as u64;
        let pa = pt.translate_user(mem, cur).ok_or(KernelError::BadAddress(cur))?;
        let chunk = (data.len() - done).min(PAGE_SIZE - page_offset(cur));
        mem.write(pa, &data[done..done + chunk])?;
        done += chunk;
    }
    Ok(())
}

pub fn read_user_u64(mem: &FrameAllocator, pt: &PageTable, va: VirtAddr) -> KResult<u64> {
    let mut word = [0u8; 8];
    copy_from_user(mem, pt, va, &mut word)?;
    Ok(u64::from_le_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: PhysAddr = 0x8040_0000;
    const RW_USER: PteFlags = PteFlags::READ.union(PteFlags::WRITE).union(PteFlags::USER);

    fn setup(frames: usize) -> (FrameAllocator, PageTable) {
        let mut mem = FrameAllocator::new(BASE, frames);
        let pt = PageTable::new(&mut mem).unwrap();
        (mem, pt)
    }

    #[test]
    fn entry_round_trips_address_and_flags() {
        let entry = PageTableEntry::new(0x8765_4000, PteFlags::VALID | PteFlags::READ);
        assert_eq!(entry.addr(), 0x8765_4000);
        assert!(entry.is_leaf());
        assert!(!PageTableEntry::new(0x8000_0000, PteFlags::VALID).is_leaf());
    }

    #[test]
    fn map_translate_unmap() {
        let (mut mem, mut pt) = setup(16);
        pt.map_fresh(&mut mem, 0x40_0000, 2, RW_USER).unwrap();
        // root + two intermediate tables + two leaves
        assert_eq!(mem.used_frames(), 5);

        let pa = pt.translate(&mem, 0x40_1234).unwrap();
        assert_eq!(page_offset(pa), 0x234);
        assert!(pt.flags(&mem, 0x40_0000).unwrap().contains(PteFlags::USER));

        pt.unmap(&mut mem, 0x40_1000, 1, true).unwrap();
        assert_eq!(pt.translate(&mem, 0x40_1234), None);
        assert!(pt.translate(&mem, 0x40_0000).is_some());
        assert_eq!(mem.used_frames(), 4);
    }

    #[test]
    fn double_map_is_rejected() {
        let (mut mem, mut pt) = setup(16);
        pt.map_fresh(&mut mem, 0x1000, 1, RW_USER).unwrap();
        assert_eq!(pt.map_page(&mut mem, 0x1000, BASE, RW_USER), Err(KernelError::AlreadyMapped(0x1000)));
    }

    #[test]
    fn unmap_of_hole_touches_nothing() {
        let (mut mem, mut pt) = setup(16);
        pt.map_fresh(&mut mem, 0x1000, 1, RW_USER).unwrap();
        assert_eq!(pt.unmap(&mut mem, 0x1000, 2, true), Err(KernelError::NotMapped(0x2000)));
        assert!(pt.translate(&mem, 0x1000).is_some());
    }

    #[test]
    fn failed_fresh_mapping_is_rolled_back() {
        // root + 2 intermediate tables + 1 leaf fit, the second leaf does not
        let (mut mem, mut pt) = setup(4);
        assert_eq!(pt.map_fresh(&mut mem, 0x1000, 2, RW_USER), Err(KernelError::OutOfMemory));
        assert_eq!(pt.translate(&mem, 0x1000), None);
        assert_eq!(mem.used_frames(), 3);
    }

    #[test]
    fn user_copies_cross_page_boundaries() {
        let (mut mem, mut pt) = setup(16);
        pt.map_fresh(&mut mem, 0x1000, 2, RW_USER).unwrap();
        copy_to_user(&mut mem, &pt, 0x1ffc, b"abcdefgh").unwrap();
        let mut buf = [0u8; 8];
        copy_from_user(&mem, &pt, 0x1ffc, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefgh");
        assert_eq!(read_user_u64(&mem, &pt, 0x1ffc).unwrap(), u64::from_le_bytes(*b"abcdefgh"));
    }

    #[test]
    fn kernel_only_pages_are_not_user_visible() {
        let (mut mem, mut pt) = setup(16);
        pt.map_fresh(&mut mem, 0x1000, 1, PteFlags::READ | PteFlags::WRITE).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(copy_from_user(&mem, &pt, 0x1000, &mut buf), Err(KernelError::BadAddress(0x1000)));
        assert!(pt.translate(&mem, 0x1000).is_some());
    }

    #[test]
    fn release_frees_every_table_frame() {
        let (mut mem, mut pt) = setup(16);
        pt.map_fresh(&mut mem, 0x1000, 1, RW_USER).unwrap();
        pt.map_fresh(&mut mem, 0x4000_0000, 1, RW_USER).unwrap();
        pt.unmap(&mut mem, 0x1000, 1, true).unwrap();
        pt.unmap(&mut mem, 0x4000_0000, 1, true).unwrap();
        pt.release(&mut mem);
        assert_eq!(mem.used_frames(), 0);
    }

    #[test]
    fn satp_encodes_sv39_root() {
        let (mem, pt) = setup(1);
        assert_eq!(pt.satp(&mem), (8 << 60) | (BASE >> 12));
    }
}
