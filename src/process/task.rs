use alloc::vec::Vec;

use crate::config::MAX_MAPPED_REGIONS;
use crate::error::{KResult, KernelError};
use crate::memory::{FrameAllocator, PageTable, PhysFrame, PteFlags, VirtAddr, PAGE_SIZE};
use crate::scheduler::QueueId;

/// Unique process identifier. Never reused within one boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// Process state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Free,
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// What a mapped region holds.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    Data,
    Stack,
    /// The trapframe page.
    Context,
    /// Kernel pages shared by every process (the trap vector).
    System,
}

impl SegmentKind {
    /// Regions whose frames belong to the process and are copied by fork.
    pub fn is_owned(self) -> bool {
        matches!(self, SegmentKind::Code | SegmentKind::Data | SegmentKind::Stack)
    }

    pub fn page_flags(self) -> PteFlags {
        match self {
            SegmentKind::Code => PteFlags::READ | PteFlags::EXECUTE | PteFlags::USER,
            SegmentKind::Data | SegmentKind::Stack => PteFlags::READ | PteFlags::WRITE | PteFlags::USER,
            SegmentKind::Context => PteFlags::READ | PteFlags::WRITE,
            SegmentKind::System => PteFlags::READ | PteFlags::EXECUTE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRegion {
    pub va: VirtAddr,
    /// Zero marks an unused record.
    pub npages: u32,
    pub kind: SegmentKind,
}

impl MappedRegion {
    pub fn new(va: VirtAddr, npages: u32, kind: SegmentKind) -> Self {
        MappedRegion { va, npages, kind }
    }

    pub fn end(&self) -> VirtAddr {
        self.va + self.npages as u64 * PAGE_SIZE as u64
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        self.npages > 0 && va >= self.va && va < self.end()
    }
}

/// The region records of one address space, at most [`MAX_MAPPED_REGIONS`] of them.
#[derive(Debug, Default, Clone)]
pub struct MappedInfo {
    regions: Vec<MappedRegion>,
}

impl MappedInfo {
    /// Record a region, reusing an unused record when there is one.
    pub fn insert(&mut self, region: MappedRegion) -> KResult<()> {
        if let Some(free) = self.regions.iter_mut().find(|r| r.npages == 0) {
            *free = region;
            return Ok(());
        }
        if self.regions.len() >= MAX_MAPPED_REGIONS {
            return Err(KernelError::RegionTableFull);
        }
        self.regions.push(region);
        Ok(())
    }

    /// Live regions in record order.
    pub fn iter(&self) -> impl Iterator<Item = &MappedRegion> + '_ {
        self.regions.iter().filter(|r| r.npages > 0)
    }

    pub fn find(&self, va: VirtAddr) -> Option<&MappedRegion> {
        self.regions.iter().find(|r| r.contains(va))
    }

    /// Drop one page from whichever region holds it, splitting the region if needed.
    pub fn remove_page(&mut self, va: VirtAddr) -> KResult<SegmentKind> {
        let index = self
            .regions
            .iter()
            .position(|r| r.contains(va))
            .ok_or(KernelError::NotMapped(va))?;
        let region = self.regions[index];
        let page = (va - region.va) / PAGE_SIZE as u64;
        let page_size = PAGE_SIZE as u64;

        if page == 0 {
            self.regions[index].va += page_size;
            self.regions[index].npages -= 1;
        } else if page == region.npages as u64 - 1 {
            self.regions[index].npages -= 1;
        } else {
            let tail = MappedRegion::new(va + page_size, region.npages - page as u32 - 1, region.kind);
            self.regions[index].npages = page as u32;
            self.insert(tail)?;
        }
        Ok(region.kind)
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which children a blocked `wait` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Any,
    Pid(ProcessId),
}

impl WaitTarget {
    /// Decode the `wait` syscall argument: `-1` means any child.
    pub fn from_arg(arg: u64) -> Self {
        if arg as i64 == -1 {
            WaitTarget::Any
        } else {
            WaitTarget::Pid(ProcessId(arg))
        }
    }

    pub fn accepts(self, pid: ProcessId) -> bool {
        match self {
            WaitTarget::Any => true,
            WaitTarget::Pid(wanted) => wanted == pid,
        }
    }
}

/// Non-owning reference to the creating process. Valid only while `slot` still holds `pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub slot: usize,
    pub pid: ProcessId,
}

/// Process control block.
#[derive(Debug)]
pub struct Process {
    pub pid: ProcessId,
    pub state: ProcessState,
    pub(crate) pagetable: Option<PageTable>,
    pub(crate) trapframe: Option<PhysFrame>,
    pub(crate) kstack: Option<PhysFrame>,
    pub mapped_info: MappedInfo,
    pub parent: Option<ParentLink>,
    pub(crate) queue: Option<QueueId>,
    pub tick_count: u64,
    pub wait_target: Option<WaitTarget>,
    pub exit_code: Option<i64>,
    /// Next address handed out by `allocate_page`.
    pub heap_top: VirtAddr,
}

impl Process {
    pub fn empty() -> Self {
        Process {
            pid: ProcessId(0),
            state: ProcessState::Free,
            pagetable: None,
            trapframe: None,
            kstack: None,
            mapped_info: MappedInfo::default(),
            parent: None,
            queue: None,
            tick_count: 0,
            wait_target: None,
            exit_code: None,
            heap_top: 0,
        }
    }

    pub fn pagetable(&self) -> Option<&PageTable> {
        self.pagetable.as_ref()
    }

    pub fn trapframe_frame(&self) -> Option<PhysFrame> {
        self.trapframe
    }

    pub fn kstack(&self) -> Option<PhysFrame> {
        self.kstack
    }

    pub fn queue(&self) -> Option<QueueId> {
        self.queue
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.state, ProcessState::Free | ProcessState::Zombie)
    }

    /// Back `npages` fresh pages at `va` and record them as one region.
    pub fn map_region(&mut self, mem: &mut FrameAllocator, va: VirtAddr, npages: usize, kind: SegmentKind) -> KResult<()> {
        let pagetable = self.pagetable.as_mut().ok_or(KernelError::InvalidState)?;
        pagetable.map_fresh(mem, va, npages, kind.page_flags())?;
        if let Err(err) = self.mapped_info.insert(MappedRegion::new(va, npages as u32, kind)) {
            pagetable.unmap(mem, va, npages, true)?;
            return Err(err);
        }
        Ok(())
    }

    /// Unmap and release one page handed out by `allocate_page`.
    ///
    /// Only data pages in `heap_start..heap_top` qualify. Code, stack and
    /// kernel pages are reported as not mapped.
    pub fn unmap_heap_page(&mut self, mem: &mut FrameAllocator, heap_start: VirtAddr, va: VirtAddr) -> KResult<()> {
        if !(heap_start..self.heap_top).contains(&va) {
            return Err(KernelError::NotMapped(va));
        }
        match self.mapped_info.find(va) {
            Some(region) if region.kind == SegmentKind::Data => {}
            _ => return Err(KernelError::NotMapped(va)),
        }
        let pagetable = self.pagetable.as_mut().ok_or(KernelError::InvalidState)?;
        pagetable.unmap(mem, va, 1, true)?;
        self.mapped_info.remove_page(va)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: u64 = PAGE_SIZE as u64;

    #[test]
    fn insert_reuses_empty_records() {
        let mut info = MappedInfo::default();
        info.insert(MappedRegion::new(0x1000, 1, SegmentKind::Data)).unwrap();
        info.insert(MappedRegion::new(0x2000, 1, SegmentKind::Data)).unwrap();
        info.remove_page(0x1000).unwrap();
        assert_eq!(info.len(), 1);

        info.insert(MappedRegion::new(0x9000, 1, SegmentKind::Stack)).unwrap();
        assert_eq!(info.regions.len(), 2);
        assert_eq!(info.find(0x9000).unwrap().kind, SegmentKind::Stack);
    }

    #[test]
    fn region_table_is_bounded() {
        let mut info = MappedInfo::default();
        for i in 0..MAX_MAPPED_REGIONS as u64 {
            info.insert(MappedRegion::new(i * PG, 1, SegmentKind::Data)).unwrap();
        }
        assert_eq!(
            info.insert(MappedRegion::new(0x7000_0000, 1, SegmentKind::Data)),
            Err(KernelError::RegionTableFull)
        );
    }

    #[test]
    fn removing_a_middle_page_splits_the_region() {
        let mut info = MappedInfo::default();
        info.insert(MappedRegion::new(0x10_000, 4, SegmentKind::Data)).unwrap();
        info.remove_page(0x10_000 + PG).unwrap();

        let head = info.find(0x10_000).unwrap();
        assert_eq!(head.npages, 1);
        let tail = info.find(0x10_000 + 2 * PG).unwrap();
        assert_eq!((tail.va, tail.npages), (0x10_000 + 2 * PG, 2));
        assert!(info.find(0x10_000 + PG).is_none());
    }

    #[test]
    fn removing_edges_shrinks_in_place() {
        let mut info = MappedInfo::default();
        info.insert(MappedRegion::new(0x10_000, 3, SegmentKind::Data)).unwrap();
        info.remove_page(0x10_000).unwrap();
        info.remove_page(0x10_000 + 2 * PG).unwrap();
        let only = info.iter().next().unwrap();
        assert_eq!((only.va, only.npages), (0x10_000 + PG, 1));
        assert_eq!(info.remove_page(0x50_000), Err(KernelError::NotMapped(0x50_000)));
    }

    #[test]
    fn wait_target_decodes_minus_one_as_any() {
        assert_eq!(WaitTarget::from_arg(u64::MAX), WaitTarget::Any);
        assert_eq!(WaitTarget::from_arg(3), WaitTarget::Pid(ProcessId(3)));
        assert!(WaitTarget::Any.accepts(ProcessId(9)));
        assert!(!WaitTarget::Pid(ProcessId(3)).accepts(ProcessId(4)));
    }
}
