//! Counting semaphores whose waiters block on a FIFO queue.

use alloc::vec::Vec;

use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::scheduler::{ProcQueue, QueueId};

/// `value >= 0` counts free resources, `value < 0` counts waiters.
#[derive(Debug)]
pub struct Semaphore {
    valid: bool,
    value: i64,
    waiters: ProcQueue,
}

impl Semaphore {
    fn new(id: usize) -> Self {
        Semaphore {
            valid: false,
            value: 0,
            waiters: ProcQueue::new(QueueId::Semaphore(id)),
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn waiters(&self) -> impl Iterator<Item = usize> + '_ {
        self.waiters.iter()
    }

    /// The waiter count always mirrors a negative value.
    pub fn is_consistent(&self) -> bool {
        if self.value < 0 {
            self.waiters.len() as i64 == -self.value
        } else {
            self.waiters.is_empty()
        }
    }
}

/// Fixed pool of semaphores. A slot, once handed out, stays valid.
#[derive(Debug)]
pub struct SemaphoreTable {
    sems: Vec<Semaphore>,
}

impl SemaphoreTable {
    pub fn new(capacity: usize) -> Self {
        SemaphoreTable { sems: (0..capacity).map(Semaphore::new).collect() }
    }

    pub fn get(&self, id: usize) -> KResult<&Semaphore> {
        match self.sems.get(id) {
            Some(sem) if sem.valid => Ok(sem),
            _ => Err(KernelError::InvalidSemaphore(id)),
        }
    }

    fn get_mut(&mut self, id: usize) -> KResult<&mut Semaphore> {
        match self.sems.get_mut(id) {
            Some(sem) if sem.valid => Ok(sem),
            _ => Err(KernelError::InvalidSemaphore(id)),
        }
    }

    pub fn live(&self) -> usize {
        self.sems.iter().filter(|s| s.valid).count()
    }
}

impl Kernel {
    /// Create a semaphore holding `init` resources.
    pub fn do_sem_new(&mut self, init: i64) -> KResult<usize> {
        let (id, sem) = self
            .sems
            .sems
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.valid)
            .ok_or(KernelError::SemaphorePoolExhausted)?;
        sem.valid = true;
        sem.value = init;
        crate::log_info!("sem_new: semaphore {} with value {}", id, init);
        Ok(id)
    }

    /// Acquire. Blocks `slot` when no resource is left.
    pub fn do_sem_p(&mut self, slot: usize, id: usize) -> KResult<()> {
        // Block first so a failure leaves the count untouched.
        let must_wait = self.sems.get(id)?.value <= 0;
        if must_wait {
            self.block(slot)?;
        }
        let sem = self.sems.get_mut(id)?;
        sem.value -= 1;
        if must_wait {
            sem.waiters.push_back(&mut self.procs, slot);
        }
        debug_assert!(self.sems.get(id)?.is_consistent());
        Ok(())
    }

    /// Release. Wakes the longest waiting process, if any.
    pub fn do_sem_v(&mut self, id: usize) -> KResult<()> {
        let sem = self.sems.get_mut(id)?;
        let had_waiters = sem.value < 0;
        sem.value += 1;
        if had_waiters {
            let slot = sem
                .waiters
                .pop_front(&mut self.procs)
                .ok_or(KernelError::InvalidState)?;
            self.sched.insert_to_ready_queue(&mut self.procs, slot);
            crate::log_info!("sem_v: semaphore {} woke pid {}", id, self.procs.get(slot).pid.0);
        }
        debug_assert!(self.sems.get(id)?.is_consistent());
        Ok(())
    }
}
