/*!
 * Process Lifecycle
 * Creation, exit, and reaping. Children inherit the parent's descriptor
 * table by reference; exit status flows to the parent through the zombie
 * state and is released on reap.
 */

use crate::core::errors::{KernelError, KernelResult};
use crate::core::limits::INIT_PID;
use crate::core::types::Pid;
use crate::dispatch;
use crate::kernel::{Kernel, KernelState, Task};
use crate::process::table::ProcState;
use crate::process::thread::ThreadRecord;
use crate::streams;
use std::sync::Arc;

impl Kernel {
    /// Create a new process running `task` with its own copy of `args`.
    /// The child inherits every open descriptor of the caller and starts
    /// with a single thread. Returns the child's identity.
    pub fn exec<F>(&self, task: F, args: &[u8]) -> KernelResult<Pid>
    where
        F: Fn(&Kernel, &[u8]) -> i32 + Send + Sync + 'static,
    {
        self.exec_arc(Some(Arc::new(task)), args)
    }

    pub(crate) fn exec_arc(&self, task: Option<Task>, args: &[u8]) -> KernelResult<Pid> {
        let mut st = self.lock();
        let pid = st
            .procs
            .acquire()
            .ok_or(KernelError::Exhausted("process table"))?;

        if pid > INIT_PID {
            let cur = match self.current() {
                Ok(cur) => cur,
                Err(e) => {
                    st.procs.release(pid);
                    return Err(e);
                }
            };
            let fids = st.procs.pcb(cur.pid).fids.clone();
            for hid in fids.iter().copied().flatten() {
                st.handles[hid].refcount += 1;
            }
            let pcb = st.procs.pcb_mut(pid);
            pcb.fids = fids;
            pcb.parent = Some(cur.pid);
            st.procs.pcb_mut(cur.pid).children.push(pid);
        }

        let pcb = st.procs.pcb_mut(pid);
        pcb.task = task.clone();
        pcb.args = args.to_vec();

        let Some(task) = task else {
            // idle-style process: a record with no unit attached
            log::debug!("process {pid} created without a main task");
            return Ok(pid);
        };

        let tid = st.threads.insert(ThreadRecord::new(pid));
        let pcb = st.procs.pcb_mut(pid);
        pcb.threads.push(tid);
        pcb.thread_count = 1;
        drop(st);

        match dispatch::spawn_unit(self.clone(), pid, tid, true, task, args.to_vec()) {
            Ok(unit) => {
                if pid == INIT_PID {
                    self.set_init_unit(unit);
                }
                log::debug!("process {pid} created (main unit {pid}.{tid})");
                Ok(pid)
            }
            Err(e) => {
                log::error!("unit spawn for process {pid} failed: {e}");
                let mut st = self.lock();
                st.threads.try_remove(tid);
                let fids = std::mem::take(&mut st.procs.pcb_mut(pid).fids);
                for hid in fids.into_iter().flatten() {
                    let _ = streams::handle_decref(&mut st, hid);
                }
                if let Some(parent) = st.procs.pcb(pid).parent {
                    st.procs.pcb_mut(parent).children.retain(|&c| c != pid);
                }
                st.procs.release(pid);
                Err(KernelError::Exhausted("schedulable units"))
            }
        }
    }

    /// Terminate the calling process with `code`. Never returns; the last
    /// thread to finish runs the process teardown. The init process first
    /// drains every remaining child so no zombie outlives the system.
    pub fn exit(&self, code: i32) -> ! {
        if let Ok(cur) = self.current() {
            self.lock().procs.pcb_mut(cur.pid).exitval = code;
            if cur.pid == INIT_PID {
                while self.wait_child(None).is_ok() {}
            }
        }
        dispatch::unwind_exit(code)
    }

    /// Wait for a child to exit and reap it, returning `(pid, status)`.
    /// With a target, blocks until that specific child exits; with `None`,
    /// blocks until any child does. Fails when the target is not a child of
    /// the caller, or when the caller has no children left.
    pub fn wait_child(&self, target: Option<Pid>) -> KernelResult<(Pid, i32)> {
        let cur = self.current()?;
        let mut st = self.lock();
        match target {
            Some(cpid) => loop {
                let child = st
                    .procs
                    .get(cpid)
                    .filter(|c| c.parent == Some(cur.pid))
                    .ok_or_else(|| {
                        KernelError::InvalidHandle(format!("process {cpid} is not a child"))
                    })?;
                if child.state == ProcState::Zombie {
                    return Ok(reap(&mut st, cur.pid, cpid));
                }
                let cv = st.procs.pcb(cur.pid).child_exit.clone();
                cv.wait(&mut st);
            },
            None => loop {
                let pcb = st.procs.pcb(cur.pid);
                if pcb.children.is_empty() {
                    return Err(KernelError::InvalidHandle("no children to wait for".into()));
                }
                if let Some(&cpid) = pcb.exited.first() {
                    return Ok(reap(&mut st, cur.pid, cpid));
                }
                let cv = pcb.child_exit.clone();
                cv.wait(&mut st);
            },
        }
    }

    /// The calling process's identity.
    pub fn get_identity(&self) -> KernelResult<Pid> {
        Ok(self.current()?.pid)
    }

    /// The calling process's parent identity; `None` for orphans and the
    /// bootstrap processes.
    pub fn get_parent_identity(&self) -> KernelResult<Option<Pid>> {
        let cur = self.current()?;
        Ok(self.lock().procs.pcb(cur.pid).parent)
    }
}

/// Collect a zombie child: unlink it from the parent and free its record.
fn reap(st: &mut KernelState, parent: Pid, cpid: Pid) -> (Pid, i32) {
    let status = st.procs.pcb(cpid).exitval;
    let pcb = st.procs.pcb_mut(parent);
    pcb.children.retain(|&c| c != cpid);
    pcb.exited.retain(|&c| c != cpid);
    st.procs.release(cpid);
    log::debug!("process {cpid} reaped by {parent} (status {status})");
    (cpid, status)
}

/// Run once, by the last thread of `pid` to finish: release descriptors,
/// disown children, and either hand the record to the parent as a zombie
/// or free it outright when no parent remains to reap it.
pub(crate) fn teardown_process(st: &mut KernelState, pid: Pid) {
    let threads = std::mem::take(&mut st.procs.pcb_mut(pid).threads);
    for tid in threads {
        st.threads.try_remove(tid);
    }

    let fids = std::mem::take(&mut st.procs.pcb_mut(pid).fids);
    for hid in fids.into_iter().flatten() {
        if let Err(e) = streams::handle_decref(st, hid) {
            log::warn!("descriptor release during teardown of {pid} failed: {e}");
        }
    }

    let children = std::mem::take(&mut st.procs.pcb_mut(pid).children);
    st.procs.pcb_mut(pid).exited.clear();
    for cpid in children {
        if st.procs.pcb(cpid).state == ProcState::Zombie {
            st.procs.release(cpid);
            log::debug!("unreaped zombie {cpid} released with parent {pid}");
        } else {
            st.procs.pcb_mut(cpid).parent = None;
        }
    }

    match st.procs.pcb(pid).parent {
        Some(parent) => {
            st.procs.pcb_mut(pid).state = ProcState::Zombie;
            let pcb = st.procs.pcb_mut(parent);
            pcb.exited.push(pid);
            pcb.child_exit.notify_all();
            log::debug!("process {pid} exited, awaiting reap by {parent}");
        }
        None => {
            st.procs.release(pid);
            log::debug!("orphan process {pid} exited and was released");
        }
    }
}
