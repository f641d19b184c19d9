/*!
 * Thread Layer
 * Secondary threads within a process: creation, join/detach, and the
 * per-thread exit bookkeeping shared with the main thread.
 *
 * A thread record outlives its unit while joiners still reference it; the
 * waiter count decides when the record can be reclaimed.
 */

use crate::core::errors::{KernelError, KernelResult};
use crate::core::types::{Pid, Tid};
use crate::dispatch::{self, Condition};
use crate::kernel::{Kernel, KernelState, Task};
use crate::process::lifecycle;
use std::sync::Arc;

/// Control record for one thread of a process.
pub(crate) struct ThreadRecord {
    pub owner: Pid,
    pub exited: bool,
    pub detached: bool,
    /// Joiners currently blocked on `exit_cv`. The record is only removed
    /// when this reaches zero, so no waiter resumes against a freed slot.
    pub waiters: usize,
    pub exitval: i32,
    pub exit_cv: Condition,
}

impl ThreadRecord {
    pub fn new(owner: Pid) -> Self {
        Self {
            owner,
            exited: false,
            detached: false,
            waiters: 0,
            exitval: 0,
            exit_cv: Condition::new(),
        }
    }
}

impl Kernel {
    /// Start a new thread in the calling process, running `task` with its
    /// own copy of `args`. Returns the thread's identity.
    pub fn create_thread<F>(&self, task: F, args: &[u8]) -> KernelResult<Tid>
    where
        F: Fn(&Kernel, &[u8]) -> i32 + Send + Sync + 'static,
    {
        let cur = self.current()?;
        let task: Task = Arc::new(task);
        let mut st = self.lock();
        let tid = st.threads.insert(ThreadRecord::new(cur.pid));
        let pcb = st.procs.pcb_mut(cur.pid);
        pcb.threads.push(tid);
        pcb.thread_count += 1;
        drop(st);

        match dispatch::spawn_unit(self.clone(), cur.pid, tid, false, task, args.to_vec()) {
            Ok(_) => {
                log::debug!("thread {}.{tid} created", cur.pid);
                Ok(tid)
            }
            Err(e) => {
                log::error!("unit spawn for thread {}.{tid} failed: {e}", cur.pid);
                let mut st = self.lock();
                st.threads.try_remove(tid);
                let pcb = st.procs.pcb_mut(cur.pid);
                pcb.threads.retain(|&t| t != tid);
                pcb.thread_count -= 1;
                Err(KernelError::Exhausted("schedulable units"))
            }
        }
    }

    /// The calling thread's identity within its process.
    pub fn self_identity(&self) -> KernelResult<Tid> {
        Ok(self.current()?.tid)
    }

    /// Block until thread `tid` of the calling process exits, then return
    /// its exit value. Joining an already-exited thread succeeds; joining
    /// self, a detached thread, or a foreign thread fails.
    pub fn join_thread(&self, tid: Tid) -> KernelResult<i32> {
        let cur = self.current()?;
        if tid == cur.tid {
            return Err(KernelError::IllegalState(
                "a thread cannot join itself".into(),
            ));
        }
        let mut st = self.lock();
        loop {
            let rec = st
                .threads
                .get(tid)
                .filter(|r| r.owner == cur.pid)
                .ok_or_else(|| KernelError::InvalidHandle(format!("thread {tid}")))?;
            if rec.detached {
                return Err(KernelError::IllegalState("thread is detached".into()));
            }
            if rec.exited {
                let value = rec.exitval;
                if rec.waiters == 0 {
                    remove_thread(&mut st, cur.pid, tid);
                }
                return Ok(value);
            }
            let cv = rec.exit_cv.clone();
            st.threads[tid].waiters += 1;
            cv.wait(&mut st);
            // re-check under the lock; detach may have raced the wakeup
            let rec = &mut st.threads[tid];
            rec.waiters -= 1;
            let done = rec.exited;
            let detached = rec.detached;
            let value = rec.exitval;
            if done && rec.waiters == 0 {
                remove_thread(&mut st, cur.pid, tid);
            }
            if detached {
                return Err(KernelError::IllegalState("thread is detached".into()));
            }
            if done {
                return Ok(value);
            }
        }
    }

    /// Mark thread `tid` of the calling process detached and wake any
    /// joiners, whose joins then fail. A detached record is reclaimed as
    /// soon as it has exited and has no waiters left.
    pub fn detach_thread(&self, tid: Tid) -> KernelResult<()> {
        let cur = self.current()?;
        let mut st = self.lock();
        let rec = st
            .threads
            .get_mut(tid)
            .filter(|r| r.owner == cur.pid)
            .ok_or_else(|| KernelError::InvalidHandle(format!("thread {tid}")))?;
        rec.detached = true;
        let reclaim = rec.exited && rec.waiters == 0;
        rec.exit_cv.notify_all();
        if reclaim {
            remove_thread(&mut st, cur.pid, tid);
        }
        Ok(())
    }

    /// Terminate the calling thread with `value`. Never returns; when this
    /// is the process's last thread the process itself exits.
    pub fn thread_exit(&self, value: i32) -> ! {
        dispatch::unwind_exit(value)
    }

    /// Exit bookkeeping run by every unit on the way out, whatever path it
    /// took. Publishes the exit value, wakes joiners, and when this was the
    /// last thread of the process, tears the process down.
    pub(crate) fn finalize_thread(&self, value: i32) {
        let Ok(cur) = self.current() else { return };
        let mut st = self.lock();
        if let Some(rec) = st.threads.get_mut(cur.tid) {
            rec.exited = true;
            rec.exitval = value;
            rec.exit_cv.notify_all();
            if rec.detached && rec.waiters == 0 {
                remove_thread(&mut st, cur.pid, cur.tid);
            }
        }
        let pcb = st.procs.pcb_mut(cur.pid);
        pcb.thread_count -= 1;
        if pcb.thread_count == 0 {
            lifecycle::teardown_process(&mut st, cur.pid);
        }
    }
}

fn remove_thread(st: &mut KernelState, pid: Pid, tid: Tid) {
    st.threads.try_remove(tid);
    st.procs.pcb_mut(pid).threads.retain(|&t| t != tid);
}
