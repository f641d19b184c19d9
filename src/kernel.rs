/*!
 * Kernel State & Boot
 * The process-wide kernel value: one global lock over every shared table,
 * plus the bootstrap entry that runs a task as the init process.
 */

use crate::core::errors::{KernelError, KernelResult};
use crate::core::limits::{IDLE_PID, INIT_PID, MAX_PORT, MAX_PROC};
use crate::core::types::SockId;
use crate::dispatch::{self, Current};
use crate::ipc::pipe::PipeRecord;
use crate::ipc::socket::{ConnRequest, SocketRecord};
use crate::process::table::ProcessTable;
use crate::process::thread::ThreadRecord;
use crate::streams::HandleRecord;
use parking_lot::{Mutex, MutexGuard};
use slab::Slab;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A schedulable task body. The byte slice is the process's (or thread's)
/// own copy of the argument block supplied at creation.
pub type Task = Arc<dyn Fn(&Kernel, &[u8]) -> i32 + Send + Sync>;

/// All shared mutable state, guarded by the single kernel lock. Records
/// cross-reference each other through arena indices, never pointers.
pub(crate) struct KernelState {
    pub procs: ProcessTable,
    pub threads: Slab<ThreadRecord>,
    pub handles: Slab<HandleRecord>,
    pub pipes: Slab<PipeRecord>,
    pub sockets: Slab<SocketRecord>,
    pub requests: Slab<ConnRequest>,
    /// Port table: at most one listener per port, indexed 0..=MAX_PORT.
    pub ports: Vec<Option<SockId>>,
}

impl KernelState {
    pub(crate) fn new() -> Self {
        Self {
            procs: ProcessTable::new(),
            threads: Slab::new(),
            handles: Slab::new(),
            pipes: Slab::new(),
            sockets: Slab::new(),
            requests: Slab::new(),
            ports: vec![None; MAX_PORT as usize + 1],
        }
    }
}

struct KernelInner {
    state: Mutex<KernelState>,
    /// Join handle of the init unit, consumed by `boot`.
    init_unit: Mutex<Option<JoinHandle<i32>>>,
}

/// Handle to the kernel core. Cheap to clone; every clone shares the same
/// state behind the global lock.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn new() -> Self {
        log::info!(
            "kernel state initialized ({MAX_PROC} process slots, {MAX_PORT} ports)"
        );
        Self {
            inner: Arc::new(KernelInner {
                state: Mutex::new(KernelState::new()),
                init_unit: Mutex::new(None),
            }),
        }
    }

    /// Boot the kernel: create the idle process (index 0, no unit) and run
    /// `init` as the init process (index 1). Returns init's exit status once
    /// it has exited; init is expected to have drained its children by then.
    pub fn boot<F>(init: F, args: &[u8]) -> KernelResult<i32>
    where
        F: Fn(&Kernel, &[u8]) -> i32 + Send + Sync + 'static,
    {
        let kernel = Kernel::new();
        let idle = kernel.exec_arc(None, &[])?;
        debug_assert_eq!(idle, IDLE_PID);
        let pid = kernel.exec_arc(Some(Arc::new(init)), args)?;
        debug_assert_eq!(pid, INIT_PID);
        let unit = kernel
            .inner
            .init_unit
            .lock()
            .take()
            .ok_or_else(|| KernelError::IllegalState("init unit was not spawned".into()))?;
        unit.join()
            .map_err(|_| KernelError::IllegalState("init unit panicked".into()))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.inner.state.lock()
    }

    /// The calling unit's identity; fails outside of a kernel task.
    pub(crate) fn current(&self) -> KernelResult<Current> {
        dispatch::current()
            .ok_or_else(|| KernelError::IllegalState("called outside of a kernel task".into()))
    }

    pub(crate) fn set_init_unit(&self, unit: JoinHandle<i32>) {
        *self.inner.init_unit.lock() = Some(unit);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("Kernel")
            .field("processes", &st.procs.count())
            .field("handles", &st.handles.len())
            .field("pipes", &st.pipes.len())
            .field("sockets", &st.sockets.len())
            .finish()
    }
}
