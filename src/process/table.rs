/*!
 * Process Table
 * Fixed-capacity table of process control records with free-list
 * allocation. A record's identity is its table index.
 */

use crate::core::limits::{MAX_HANDLES, MAX_PROC};
use crate::core::types::{HandleId, Pid, Tid};
use crate::dispatch::Condition;
use crate::kernel::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Free,
    Alive,
    /// Exited but not yet reaped by the parent.
    Zombie,
}

/// Process control record.
pub(crate) struct Pcb {
    pub state: ProcState,
    /// None for the two bootstrap processes and for orphans.
    pub parent: Option<Pid>,
    /// Live and unreaped-zombie children.
    pub children: Vec<Pid>,
    /// Exited-but-unreaped children, oldest first. Always a subset of
    /// `children`.
    pub exited: Vec<Pid>,
    /// Descriptor slots. Handles are shared by refcount, not owned; they
    /// are inherited across process creation.
    pub fids: Vec<Option<HandleId>>,
    /// Thread records belonging to this process.
    pub threads: Vec<Tid>,
    pub thread_count: usize,
    pub task: Option<Task>,
    /// Deep copy of the argument block supplied at creation.
    pub args: Vec<u8>,
    pub exitval: i32,
    /// Signaled when a child of this process exits.
    pub child_exit: Condition,
}

impl Pcb {
    fn new() -> Self {
        Self {
            state: ProcState::Free,
            parent: None,
            children: Vec::new(),
            exited: Vec::new(),
            fids: vec![None; MAX_HANDLES],
            threads: Vec::new(),
            thread_count: 0,
            task: None,
            args: Vec::new(),
            exitval: 0,
            child_exit: Condition::new(),
        }
    }
}

pub(crate) struct ProcessTable {
    slots: Vec<Pcb>,
    /// Free identities; the lowest indices sit on top of the stack so the
    /// bootstrap processes land at 0 and 1.
    free: Vec<Pid>,
    count: usize,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_PROC).map(|_| Pcb::new()).collect(),
            free: (0..MAX_PROC as Pid).rev().collect(),
            count: 0,
        }
    }

    /// Allocate a record from the free list, already marked ALIVE.
    pub fn acquire(&mut self) -> Option<Pid> {
        let pid = self.free.pop()?;
        self.slots[pid as usize].state = ProcState::Alive;
        self.count += 1;
        Some(pid)
    }

    /// Return a record to the free list, resetting it to a fresh state.
    pub fn release(&mut self, pid: Pid) {
        self.slots[pid as usize] = Pcb::new();
        self.free.push(pid);
        self.count -= 1;
    }

    /// Look up a live (ALIVE or ZOMBIE) record.
    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slots
            .get(pid as usize)
            .filter(|p| p.state != ProcState::Free)
    }

    /// Direct access to a record known to be live.
    pub fn pcb(&self, pid: Pid) -> &Pcb {
        &self.slots[pid as usize]
    }

    pub fn pcb_mut(&mut self, pid: Pid) -> &mut Pcb {
        &mut self.slots[pid as usize]
    }

    /// Raw slot access for the info cursor; includes FREE slots.
    pub fn slot(&self, index: usize) -> Option<&Pcb> {
        self.slots.get(index)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_hands_out_lowest_indices_first() {
        let mut table = ProcessTable::new();
        assert_eq!(table.acquire(), Some(0));
        assert_eq!(table.acquire(), Some(1));
        assert_eq!(table.acquire(), Some(2));
        assert_eq!(table.count(), 3);
    }

    #[test]
    fn release_recycles_the_slot() {
        let mut table = ProcessTable::new();
        for _ in 0..4 {
            table.acquire();
        }
        table.release(1);
        assert!(table.get(1).is_none());
        assert_eq!(table.acquire(), Some(1));
        assert_eq!(table.pcb(1).state, ProcState::Alive);
    }

    #[test]
    fn table_exhaustion_returns_none() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_PROC {
            assert!(table.acquire().is_some());
        }
        assert_eq!(table.acquire(), None);
    }
}
