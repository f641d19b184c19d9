/*!
 * File-Handle Table
 * Reference-counted handle records carrying a closed {read, write, close}
 * operation set, plus the per-process descriptor slots that name them.
 */

use crate::core::errors::{KernelError, KernelResult};
use crate::core::types::{Fd, HandleId, Pid, PipeId, SockId};
use crate::ipc::socket::SocketKind;
use crate::ipc::{pipe, socket};
use crate::kernel::{Kernel, KernelState};
use crate::process::info;

/// The backing kind of a handle. Dispatch of read/write/close is over this
/// closed set, not open-ended virtual dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamKind {
    PipeReader(PipeId),
    PipeWriter(PipeId),
    Socket(SockId),
    ProcInfo { cursor: usize },
}

/// Reference-counted handle record. A refcount greater than one means the
/// handle is shared across descriptor tables (inheritance); the backing
/// object's close runs on the last release only.
pub(crate) struct HandleRecord {
    pub refcount: usize,
    pub kind: StreamKind,
}

/// Resolve a descriptor to its handle identity.
pub(crate) fn resolve(st: &KernelState, pid: Pid, fd: Fd) -> KernelResult<HandleId> {
    st.procs
        .pcb(pid)
        .fids
        .get(fd)
        .copied()
        .flatten()
        .ok_or_else(|| KernelError::InvalidHandle(format!("descriptor {fd}")))
}

fn lowest_free_slot(st: &KernelState, pid: Pid, skip: Option<Fd>) -> Option<Fd> {
    st.procs
        .pcb(pid)
        .fids
        .iter()
        .enumerate()
        .position(|(fd, slot)| slot.is_none() && Some(fd) != skip)
}

/// Reserve one descriptor slot and a fresh handle for `kind`.
pub(crate) fn reserve_one(
    st: &mut KernelState,
    pid: Pid,
    kind: StreamKind,
) -> KernelResult<(Fd, HandleId)> {
    let fd = lowest_free_slot(st, pid, None).ok_or(KernelError::Exhausted("descriptor slots"))?;
    let hid = st.handles.insert(HandleRecord { refcount: 1, kind });
    st.procs.pcb_mut(pid).fids[fd] = Some(hid);
    Ok((fd, hid))
}

/// Reserve two descriptor slots and two fresh handles, all or nothing.
pub(crate) fn reserve_pair(
    st: &mut KernelState,
    pid: Pid,
    first: StreamKind,
    second: StreamKind,
) -> KernelResult<((Fd, HandleId), (Fd, HandleId))> {
    let fd1 = lowest_free_slot(st, pid, None).ok_or(KernelError::Exhausted("descriptor slots"))?;
    let fd2 =
        lowest_free_slot(st, pid, Some(fd1)).ok_or(KernelError::Exhausted("descriptor slots"))?;
    let h1 = st.handles.insert(HandleRecord { refcount: 1, kind: first });
    let h2 = st.handles.insert(HandleRecord { refcount: 1, kind: second });
    let fids = &mut st.procs.pcb_mut(pid).fids;
    fids[fd1] = Some(h1);
    fids[fd2] = Some(h2);
    Ok(((fd1, h1), (fd2, h2)))
}

/// Drop one reference to a handle; on the last release, run the backing
/// object's close and free the record. Releasing an already-freed handle
/// is a no-op, keeping release idempotent across descriptor tables.
pub(crate) fn handle_decref(st: &mut KernelState, hid: HandleId) -> KernelResult<()> {
    let Some(handle) = st.handles.get_mut(hid) else {
        return Ok(());
    };
    handle.refcount -= 1;
    if handle.refcount > 0 {
        return Ok(());
    }
    let kind = st.handles.remove(hid).kind;
    log::trace!("handle {hid} released ({kind:?})");
    match kind {
        StreamKind::PipeReader(id) => pipe::reader_close(st, Some(id)),
        StreamKind::PipeWriter(id) => pipe::writer_close(st, Some(id)),
        StreamKind::Socket(sid) => {
            socket::socket_close(st, sid);
            Ok(())
        }
        StreamKind::ProcInfo { .. } => Ok(()),
    }
}

impl Kernel {
    /// Read from a descriptor. May block per the backing kind's semantics;
    /// `Ok(0)` is end-of-stream, never an error.
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> KernelResult<usize> {
        let cur = self.current()?;
        let mut st = self.lock();
        let hid = resolve(&st, cur.pid, fd)?;
        let kind = st.handles[hid].kind.clone();
        match kind {
            StreamKind::PipeReader(id) => pipe::read(&mut st, id, buf),
            StreamKind::Socket(sid) => {
                let id = peer_read_pipe(&st, sid)?;
                pipe::read(&mut st, id, buf)
            }
            StreamKind::ProcInfo { .. } => info::info_read(&mut st, hid, buf),
            StreamKind::PipeWriter(_) => {
                Err(KernelError::IllegalState("descriptor is not readable".into()))
            }
        }
    }

    /// Write to a descriptor. May block for buffer space; a short count is
    /// success, not an error.
    pub fn write(&self, fd: Fd, buf: &[u8]) -> KernelResult<usize> {
        let cur = self.current()?;
        let mut st = self.lock();
        let hid = resolve(&st, cur.pid, fd)?;
        let kind = st.handles[hid].kind.clone();
        match kind {
            StreamKind::PipeWriter(id) => pipe::write(&mut st, id, buf),
            StreamKind::Socket(sid) => {
                let id = peer_write_pipe(&st, sid)?;
                pipe::write(&mut st, id, buf)
            }
            StreamKind::PipeReader(_) | StreamKind::ProcInfo { .. } => {
                Err(KernelError::IllegalState("descriptor is not writable".into()))
            }
        }
    }

    /// Close a descriptor: empty the slot and drop one handle reference.
    pub fn close(&self, fd: Fd) -> KernelResult<()> {
        let cur = self.current()?;
        let mut st = self.lock();
        let slot = st
            .procs
            .pcb_mut(cur.pid)
            .fids
            .get_mut(fd)
            .ok_or_else(|| KernelError::InvalidHandle(format!("descriptor {fd}")))?;
        let hid = slot
            .take()
            .ok_or_else(|| KernelError::InvalidHandle(format!("descriptor {fd}")))?;
        handle_decref(&mut st, hid)
    }
}

fn peer_read_pipe(st: &KernelState, sid: SockId) -> KernelResult<PipeId> {
    match st.sockets.get(sid).map(|s| &s.kind) {
        Some(SocketKind::Peer { read_pipe, .. }) => read_pipe
            .ok_or_else(|| KernelError::InvalidArgument("null pipe reference".into())),
        _ => Err(KernelError::IllegalState("socket is not connected".into())),
    }
}

fn peer_write_pipe(st: &KernelState, sid: SockId) -> KernelResult<PipeId> {
    match st.sockets.get(sid).map(|s| &s.kind) {
        Some(SocketKind::Peer { write_pipe, .. }) => write_pipe
            .ok_or_else(|| KernelError::InvalidArgument("null pipe reference".into())),
        _ => Err(KernelError::IllegalState("socket is not connected".into())),
    }
}
