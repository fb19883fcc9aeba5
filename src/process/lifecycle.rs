//! Process creation and termination: load, fork, exit, wait and yield.

use alloc::vec::Vec;

use super::{ParentLink, ProcessId, ProcessState, ProgramImage, SegmentKind, WaitTarget};
use crate::error::{KResult, KernelError, OrFatal};
use crate::kernel::Kernel;
use crate::memory::{copy_to_user, page_align_down, pages_spanning, PAGE_SIZE};

impl Kernel {
    /// Create a process for an already parsed program and make it ready.
    pub fn load_user_program(&mut self, image: &ProgramImage) -> KResult<ProcessId> {
        let slot = self.procs.alloc_process(&mut self.mem, &self.boot)?;
        if let Err(err) = self.build_user_space(slot, image) {
            self.discard(slot);
            return Err(err);
        }
        self.sched.insert_to_ready_queue(&mut self.procs, slot);

        let pid = self.procs.get(slot).pid;
        crate::log_info!("User application is loading (pid {}, entry {:#x}).", pid.0, image.entry);
        Ok(pid)
    }

    fn build_user_space(&mut self, slot: usize, image: &ProgramImage) -> KResult<()> {
        let stack_top = self.config.user_stack_top;
        let proc = self.procs.get_mut(slot);
        proc.map_region(&mut self.mem, stack_top - PAGE_SIZE as u64, 1, SegmentKind::Stack)?;

        for seg in &image.segments {
            let size = seg.mem_size.max(seg.data.len() as u64);
            let base = page_align_down(seg.va);
            let npages = pages_spanning(seg.va, size);
            proc.map_region(&mut self.mem, base, npages, seg.kind)?;
            let pagetable = proc.pagetable().ok_or(KernelError::InvalidState)?;
            copy_to_user(&mut self.mem, pagetable, seg.va, &seg.data)?;
        }

        let tf = self.trapframe_mut(slot);
        tf.regs.sp = stack_top;
        tf.epc = image.entry;
        Ok(())
    }

    /// Tear down a half-built process.
    fn discard(&mut self, slot: usize) {
        self.procs.free_process(&mut self.mem, slot).or_fatal();
        self.procs.delete_process(&mut self.mem, slot).or_fatal();
    }

    /// Duplicate `parent` into a fresh ready process.
    ///
    /// Every owned page is copied. The parent sees the child's pid as the
    /// syscall result, the child sees 0.
    pub fn do_fork(&mut self, parent: usize) -> KResult<ProcessId> {
        let child = self.procs.alloc_process(&mut self.mem, &self.boot)?;
        if let Err(err) = self.copy_address_space(parent, child) {
            self.discard(child);
            return Err(err);
        }

        let parent_pid = self.procs.get(parent).pid;
        let heap_top = self.procs.get(parent).heap_top;
        let child_proc = self.procs.get_mut(child);
        child_proc.parent = Some(ParentLink { slot: parent, pid: parent_pid });
        child_proc.heap_top = heap_top;
        let child_pid = child_proc.pid;

        let saved = *self.trapframe(parent);
        let tf = self.trapframe_mut(child);
        *tf = saved;
        tf.set_return(0);
        self.trapframe_mut(parent).set_return(child_pid.0 as i64);

        self.sched.insert_to_ready_queue(&mut self.procs, child);
        crate::log_info!("do_fork: pid {} forked child pid {}", parent_pid.0, child_pid.0);
        Ok(child_pid)
    }

    fn copy_address_space(&mut self, parent: usize, child: usize) -> KResult<()> {
        let regions: Vec<_> = self
            .procs
            .get(parent)
            .mapped_info
            .iter()
            .filter(|r| r.kind.is_owned())
            .copied()
            .collect();

        for region in regions {
            let npages = region.npages as usize;
            self.procs
                .get_mut(child)
                .map_region(&mut self.mem, region.va, npages, region.kind)?;
            for page in 0..npages {
                let va = region.va + (page * PAGE_SIZE) as u64;
                let src = self
                    .procs
                    .get(parent)
                    .pagetable()
                    .and_then(|pt| pt.frame_at(&self.mem, va))
                    .ok_or(KernelError::NotMapped(va))?;
                let dst = self
                    .procs
                    .get(child)
                    .pagetable()
                    .and_then(|pt| pt.frame_at(&self.mem, va))
                    .ok_or(KernelError::NotMapped(va))?;
                self.mem.copy_frame(src, dst);
            }
        }
        Ok(())
    }

    /// Terminate `slot`. A parent blocked in `wait` for it is woken with its pid
    /// and the child is reaped on the spot.
    pub fn do_exit(&mut self, slot: usize, code: i64) -> KResult<()> {
        crate::log_info!("User exit with code:{}.", code);
        if self.sched.current() == Some(slot) {
            self.sched.take_current();
        }

        let pid = self.procs.get(slot).pid;
        self.procs.get_mut(slot).exit_code = Some(code);
        self.procs.free_process(&mut self.mem, slot)?;

        let Some(parent) = self.procs.parent_of(slot) else {
            return Ok(());
        };
        let waiter = self.procs.get(parent);
        let parent_pid = waiter.pid;
        let waiting = waiter.state == ProcessState::Blocked
            && waiter.wait_target.map_or(false, |target| target.accepts(pid));
        if !waiting {
            return Ok(());
        }

        self.procs.get_mut(parent).wait_target = None;
        self.trapframe_mut(parent).set_return(pid.0 as i64);
        self.procs.delete_process(&mut self.mem, slot)?;
        self.sched.insert_to_ready_queue(&mut self.procs, parent);
        crate::log_info!("do_exit: woke parent pid {} waiting for pid {}", parent_pid.0, pid.0);
        Ok(())
    }

    /// Reap a matching zombie child, or block until one exits.
    ///
    /// `Ok(None)` means the caller is now BLOCKED and gets its result from
    /// [`Kernel::do_exit`] of the child.
    pub fn do_wait(&mut self, slot: usize, target: WaitTarget) -> KResult<Option<ProcessId>> {
        let children: Vec<usize> = self
            .procs
            .children_of(slot)
            .filter(|&c| target.accepts(self.procs.get(c).pid))
            .collect();
        if children.is_empty() {
            return Err(KernelError::NoChild);
        }

        if let Some(&zombie) = children
            .iter()
            .find(|&&c| self.procs.get(c).state == ProcessState::Zombie)
        {
            let pid = self.procs.get(zombie).pid;
            self.procs.delete_process(&mut self.mem, zombie)?;
            crate::log_info!("do_wait: reaped pid {}", pid.0);
            return Ok(Some(pid));
        }

        self.block(slot)?;
        self.procs.get_mut(slot).wait_target = Some(target);
        Ok(None)
    }

    /// Give up the hart and go to the back of the ready queue.
    pub fn do_yield(&mut self, slot: usize) {
        self.sched.insert_to_ready_queue(&mut self.procs, slot);
    }

    /// Take the running process off the hart without queueing it anywhere.
    pub(crate) fn block(&mut self, slot: usize) -> KResult<()> {
        let proc = self.procs.get_mut(slot);
        if proc.state != ProcessState::Running {
            return Err(KernelError::InvalidState);
        }
        proc.state = ProcessState::Blocked;
        if self.sched.current() == Some(slot) {
            self.sched.take_current();
        }
        crate::log_info!("process {} blocked", proc.pid.0);
        Ok(())
    }
}
