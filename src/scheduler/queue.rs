use alloc::collections::VecDeque;

use crate::error::{fatal, KernelError};
use crate::process::ProcessTable;

/// Which queue a process is parked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueId {
    Ready,
    Semaphore(usize),
}

/// FIFO of process slots.
///
/// Each process records the queue it sits on, and pushing a process that is
/// already parked somewhere is fatal, so no slot is ever on two queues.
#[derive(Debug)]
pub struct ProcQueue {
    id: QueueId,
    slots: VecDeque<usize>,
}

impl ProcQueue {
    pub fn new(id: QueueId) -> Self {
        ProcQueue { id, slots: VecDeque::new() }
    }

    pub fn push_back(&mut self, procs: &mut ProcessTable, slot: usize) {
        let proc = procs.get_mut(slot);
        if proc.queue.is_some() {
            fatal(KernelError::AlreadyQueued(proc.pid));
        }
        proc.queue = Some(self.id);
        self.slots.push_back(slot);
    }

    pub fn pop_front(&mut self, procs: &mut ProcessTable) -> Option<usize> {
        let slot = self.slots.pop_front()?;
        procs.get_mut(slot).queue = None;
        Some(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().copied()
    }
}
