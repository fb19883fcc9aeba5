//! The fixed process pool and the address-space bookkeeping of each slot.

pub mod image;
pub mod lifecycle;
pub mod task;

use alloc::vec::Vec;

pub use image::{ProgramImage, ProgramSegment};
pub use task::{MappedInfo, MappedRegion, ParentLink, Process, ProcessId, ProcessState, SegmentKind, WaitTarget};

use crate::config::BootInfo;
use crate::error::{KResult, KernelError};
use crate::memory::{page_align_down, FrameAllocator, PageTable, PhysFrame, VirtAddr};

/// All process control blocks, indexed by slot.
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<Process>,
    next_pid: u64,
    heap_start: VirtAddr,
}

impl ProcessTable {
    pub fn new(capacity: usize, heap_start: VirtAddr) -> Self {
        ProcessTable {
            slots: (0..capacity).map(|_| Process::empty()).collect(),
            next_pid: 0,
            heap_start,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> &Process {
        &self.slots[slot]
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut Process {
        &mut self.slots[slot]
    }

    /// Slot currently holding `pid`.
    pub fn find_slot(&self, pid: ProcessId) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.state != ProcessState::Free && p.pid == pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Process)> + '_ {
        self.slots.iter().enumerate()
    }

    /// Resolve a parent link, if the parent is still around.
    pub fn parent_of(&self, slot: usize) -> Option<usize> {
        let link = self.slots[slot].parent?;
        let parent = &self.slots[link.slot];
        (parent.state != ProcessState::Free && parent.pid == link.pid).then_some(link.slot)
    }

    /// Slots of the children of `slot` that have not been deleted yet.
    pub fn children_of(&self, slot: usize) -> impl Iterator<Item = usize> + '_ {
        let link = ParentLink { slot, pid: self.slots[slot].pid };
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.state != ProcessState::Free && p.parent == Some(link))
            .map(|(i, _)| i)
    }

    /// No process can ever run again.
    pub fn all_finished(&self) -> bool {
        self.slots.iter().all(|p| !p.is_live())
    }

    /// Take a free slot and give it a kernel stack, a trapframe and an address space.
    ///
    /// The trapframe page and the trap vector page are identity mapped,
    /// kernel-only, so the trap entry code can run on the user page table.
    pub fn alloc_process(&mut self, mem: &mut FrameAllocator, boot: &BootInfo) -> KResult<usize> {
        let slot = self
            .slots
            .iter()
            .position(|p| p.state == ProcessState::Free)
            .ok_or(KernelError::ProcessPoolExhausted)?;

        let kstack = mem.allocate_frame().ok_or(KernelError::OutOfMemory)?;
        let trapframe = match mem.allocate_frame() {
            Some(frame) => frame,
            None => {
                mem.deallocate_frame(kstack);
                return Err(KernelError::OutOfMemory);
            }
        };
        let (pagetable, mapped_info) = match build_kernel_view(mem, trapframe, boot) {
            Ok(space) => space,
            Err(err) => {
                mem.deallocate_frame(trapframe);
                mem.deallocate_frame(kstack);
                return Err(err);
            }
        };

        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;

        let proc = &mut self.slots[slot];
        *proc = Process::empty();
        proc.pid = pid;
        proc.state = ProcessState::Ready;
        proc.pagetable = Some(pagetable);
        proc.trapframe = Some(trapframe);
        proc.kstack = Some(kstack);
        proc.mapped_info = mapped_info;
        proc.heap_top = self.heap_start;

        crate::log_info!("alloc_process: slot {} pid {}", slot, pid.0);
        Ok(slot)
    }

    /// Release the address space of an exiting process and leave it a zombie.
    ///
    /// Frames behind code, data and stack regions go back to the pool; the
    /// trapframe and kernel stack stay until [`ProcessTable::delete_process`].
    pub fn free_process(&mut self, mem: &mut FrameAllocator, slot: usize) -> KResult<()> {
        let proc = &mut self.slots[slot];
        if !proc.is_live() || proc.queue.is_some() {
            return Err(KernelError::InvalidState);
        }
        let mut pagetable = proc.pagetable.take().ok_or(KernelError::InvalidState)?;
        for region in proc.mapped_info.iter() {
            pagetable.unmap(mem, region.va, region.npages as usize, region.kind.is_owned())?;
        }
        pagetable.release(mem);
        proc.mapped_info.clear();
        proc.wait_target = None;
        proc.state = ProcessState::Zombie;
        Ok(())
    }

    /// Recycle a zombie slot.
    pub fn delete_process(&mut self, mem: &mut FrameAllocator, slot: usize) -> KResult<()> {
        let proc = &mut self.slots[slot];
        if proc.state != ProcessState::Zombie {
            return Err(KernelError::InvalidState);
        }
        if let Some(frame) = proc.trapframe.take() {
            mem.deallocate_frame(frame);
        }
        if let Some(frame) = proc.kstack.take() {
            mem.deallocate_frame(frame);
        }
        *proc = Process::empty();
        Ok(())
    }
}

fn build_kernel_view(
    mem: &mut FrameAllocator,
    trapframe: PhysFrame,
    boot: &BootInfo,
) -> KResult<(PageTable, MappedInfo)> {
    let mut pagetable = PageTable::new(mem)?;
    let mut info = MappedInfo::default();
    let tf_pa = mem.start_address(trapframe);
    let vector_pa = page_align_down(boot.trap_vector);

    let mapped = pagetable
        .map_page(mem, tf_pa, tf_pa, SegmentKind::Context.page_flags())
        .and_then(|_| info.insert(MappedRegion::new(tf_pa, 1, SegmentKind::Context)))
        .and_then(|_| pagetable.map_page(mem, vector_pa, vector_pa, SegmentKind::System.page_flags()))
        .and_then(|_| info.insert(MappedRegion::new(vector_pa, 1, SegmentKind::System)));

    match mapped {
        Ok(()) => Ok((pagetable, info)),
        Err(err) => {
            // Neither leaf is owned, dropping the table frames is enough.
            pagetable.release(mem);
            Err(err)
        }
    }
}
