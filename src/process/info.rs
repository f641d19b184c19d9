/*!
 * Process Introspection Stream
 * A read-only descriptor whose reads yield one serialized snapshot per
 * occupied process-table slot, in ascending identity order.
 */

use crate::core::errors::{KernelError, KernelResult};
use crate::core::limits::{MAX_PROC, PROCINFO_ARGS_MAX};
use crate::core::types::{Fd, HandleId, Pid};
use crate::kernel::{Kernel, KernelState};
use crate::process::table::ProcState;
use crate::streams::{self, StreamKind};
use serde::{Deserialize, Serialize};

/// Point-in-time view of one process-table slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    /// True for ALIVE, false for ZOMBIE.
    pub alive: bool,
    pub thread_count: usize,
    /// Opaque identity of the process's main task, stable for the task's
    /// lifetime; zero when the process has none.
    pub task_id: usize,
    /// Full length of the argument block, even when `args` is truncated.
    pub arg_len: usize,
    /// Argument block prefix, capped at `PROCINFO_ARGS_MAX` bytes.
    pub args: Vec<u8>,
}

impl ProcessSnapshot {
    pub fn to_bytes(&self) -> KernelResult<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| KernelError::InvalidArgument(format!("snapshot encoding failed: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> KernelResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| KernelError::InvalidArgument(format!("snapshot decoding failed: {e}")))
    }
}

impl Kernel {
    /// Open an introspection stream over the process table. Each successful
    /// read returns one snapshot; a zero-length read marks the end, after
    /// which further reads fail.
    pub fn open_info(&self) -> KernelResult<Fd> {
        let cur = self.current()?;
        let mut st = self.lock();
        let (fd, _) = streams::reserve_one(&mut st, cur.pid, StreamKind::ProcInfo { cursor: 0 })?;
        Ok(fd)
    }
}

fn snapshot_slot(st: &KernelState, pid: Pid) -> Option<ProcessSnapshot> {
    let pcb = st.procs.slot(pid as usize)?;
    if pcb.state == ProcState::Free {
        return None;
    }
    let args: Vec<u8> = pcb.args.iter().copied().take(PROCINFO_ARGS_MAX).collect();
    Some(ProcessSnapshot {
        pid,
        ppid: pcb.parent,
        alive: pcb.state == ProcState::Alive,
        thread_count: pcb.thread_count,
        task_id: pcb
            .task
            .as_ref()
            .map(|t| std::sync::Arc::as_ptr(t) as *const () as usize)
            .unwrap_or(0),
        arg_len: pcb.args.len(),
        args,
    })
}

/// One read against an introspection handle. Finds the next occupied slot
/// at or after the cursor, encodes it, and only advances the cursor once
/// the caller's buffer is known to fit the snapshot.
pub(crate) fn info_read(st: &mut KernelState, hid: HandleId, buf: &mut [u8]) -> KernelResult<usize> {
    let cursor = match st.handles[hid].kind {
        StreamKind::ProcInfo { cursor } => cursor,
        _ => unreachable!("info_read dispatched on a non-info handle"),
    };
    if cursor > MAX_PROC {
        return Err(KernelError::InvalidHandle(
            "introspection stream is exhausted".into(),
        ));
    }
    for index in cursor..MAX_PROC {
        let Some(snapshot) = snapshot_slot(st, index as Pid) else {
            continue;
        };
        let bytes = snapshot.to_bytes()?;
        if bytes.len() > buf.len() {
            return Err(KernelError::InvalidArgument(format!(
                "buffer too small for snapshot ({} < {})",
                buf.len(),
                bytes.len()
            )));
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        st.handles[hid].kind = StreamKind::ProcInfo { cursor: index + 1 };
        return Ok(bytes.len());
    }
    // end of table: report it once, then invalidate the cursor
    st.handles[hid].kind = StreamKind::ProcInfo { cursor: MAX_PROC + 1 };
    Ok(0)
}
