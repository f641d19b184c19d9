/*!
 * Byte Pipes
 * Bounded unidirectional byte channels with blocking reads and writes.
 * A pipe record lives in the pipe arena; its two ends are independent
 * handles, and the record itself persists until both ends are closed and
 * no unit is still blocked inside it.
 */

use crate::core::errors::{KernelError, KernelResult};
use crate::core::limits::PIPE_CAPACITY;
use crate::core::types::{Fd, HandleId, PipeId};
use crate::dispatch::Condition;
use crate::kernel::{Kernel, KernelState};
use crate::streams::{self, StreamKind};
use parking_lot::MutexGuard;
use ringbuf::{traits::*, HeapRb};

/// Shared state of one pipe. The end fields hold the handle identity of
/// the corresponding open end; `None` means that end has been closed.
pub(crate) struct PipeRecord {
    pub buf: HeapRb<u8>,
    pub reader: Option<HandleId>,
    pub writer: Option<HandleId>,
    /// Signaled when space becomes available or the reader goes away.
    pub has_space: Condition,
    /// Signaled when data becomes available or the writer goes away.
    pub has_data: Condition,
    /// Units currently blocked inside read or write. Removal of the record
    /// is deferred until this drops to zero.
    pub waiters: usize,
}

impl PipeRecord {
    pub(crate) fn new() -> Self {
        Self {
            buf: HeapRb::new(PIPE_CAPACITY),
            reader: None,
            writer: None,
            has_space: Condition::new(),
            has_data: Condition::new(),
            waiters: 0,
        }
    }
}

impl Kernel {
    /// Create a pipe and return `(read_fd, write_fd)` in the calling
    /// process. Both descriptors are reserved atomically.
    pub fn create_pipe(&self) -> KernelResult<(Fd, Fd)> {
        let cur = self.current()?;
        let mut st = self.lock();
        let id = st.pipes.insert(PipeRecord::new());
        let reserved = streams::reserve_pair(
            &mut st,
            cur.pid,
            StreamKind::PipeReader(id),
            StreamKind::PipeWriter(id),
        );
        let ((rfd, rhid), (wfd, whid)) = match reserved {
            Ok(pair) => pair,
            Err(e) => {
                st.pipes.remove(id);
                return Err(e);
            }
        };
        let rec = &mut st.pipes[id];
        rec.reader = Some(rhid);
        rec.writer = Some(whid);
        log::debug!("pipe {id} created for process {} (fds {rfd}/{wfd})", cur.pid);
        Ok((rfd, wfd))
    }
}

/// Blocking write of the full request, unless a pipe end disappears first.
/// Writing through an already-closed write end fails outright; the read
/// end going away yields a short (possibly zero) count instead.
pub(crate) fn write(
    st: &mut MutexGuard<'_, KernelState>,
    id: PipeId,
    buf: &[u8],
) -> KernelResult<usize> {
    if st.pipes.get(id).map_or(true, |r| r.writer.is_none()) {
        return Err(KernelError::BrokenChannel);
    }
    let mut written = 0;
    while written < buf.len() {
        loop {
            let rec = &st.pipes[id];
            if rec.reader.is_none() || rec.writer.is_none() {
                maybe_release(st, id);
                return Ok(written);
            }
            if !rec.buf.is_full() {
                break;
            }
            let space = rec.has_space.clone();
            rec.has_data.notify_all();
            st.pipes[id].waiters += 1;
            space.wait(st);
            st.pipes[id].waiters -= 1;
        }
        written += st.pipes[id].buf.push_slice(&buf[written..]);
    }
    st.pipes[id].has_data.notify_all();
    Ok(written)
}

/// Blocking read of the full request, unless the writer disappears first.
/// With the write end closed, remaining buffered bytes are drained and the
/// stream then reports end-of-stream as `Ok(0)`.
pub(crate) fn read(
    st: &mut MutexGuard<'_, KernelState>,
    id: PipeId,
    buf: &mut [u8],
) -> KernelResult<usize> {
    if st.pipes.get(id).map_or(true, |r| r.reader.is_none()) {
        return Err(KernelError::BrokenChannel);
    }
    let mut nread = 0;
    while nread < buf.len() {
        loop {
            let rec = &st.pipes[id];
            if rec.reader.is_none() {
                maybe_release(st, id);
                return Ok(nread);
            }
            if !rec.buf.is_empty() {
                break;
            }
            if rec.writer.is_none() {
                maybe_release(st, id);
                return Ok(nread);
            }
            let data = rec.has_data.clone();
            rec.has_space.notify_all();
            st.pipes[id].waiters += 1;
            data.wait(st);
            st.pipes[id].waiters -= 1;
        }
        nread += st.pipes[id].buf.pop_slice(&mut buf[nread..]);
    }
    st.pipes[id].has_space.notify_all();
    Ok(nread)
}

/// Close the read end: mark it gone and wake blocked writers so their
/// writes resolve to short counts or broken-channel errors.
pub(crate) fn reader_close(st: &mut KernelState, id: Option<PipeId>) -> KernelResult<()> {
    let id = id.ok_or_else(|| KernelError::InvalidArgument("null pipe reference".into()))?;
    let Some(rec) = st.pipes.get_mut(id) else {
        return Ok(());
    };
    rec.reader = None;
    rec.has_space.notify_all();
    maybe_release(st, id);
    Ok(())
}

/// Close the write end: mark it gone and wake blocked readers so they see
/// end-of-stream once the buffer drains.
pub(crate) fn writer_close(st: &mut KernelState, id: Option<PipeId>) -> KernelResult<()> {
    let id = id.ok_or_else(|| KernelError::InvalidArgument("null pipe reference".into()))?;
    let Some(rec) = st.pipes.get_mut(id) else {
        return Ok(());
    };
    rec.writer = None;
    rec.has_data.notify_all();
    maybe_release(st, id);
    Ok(())
}

/// Free the record once both ends are closed and no unit is blocked in it.
fn maybe_release(st: &mut KernelState, id: PipeId) {
    if let Some(rec) = st.pipes.get(id) {
        if rec.reader.is_none() && rec.writer.is_none() && rec.waiters == 0 {
            st.pipes.remove(id);
            log::trace!("pipe {id} released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_survives_until_both_ends_close() {
        let mut st = KernelState::new();
        let id = st.pipes.insert(PipeRecord::new());
        st.pipes[id].reader = Some(7);
        st.pipes[id].writer = Some(8);
        writer_close(&mut st, Some(id)).unwrap();
        assert!(st.pipes.contains(id));
        reader_close(&mut st, Some(id)).unwrap();
        assert!(!st.pipes.contains(id));
    }

    #[test]
    fn closing_a_freed_pipe_is_a_no_op() {
        let mut st = KernelState::new();
        let id = st.pipes.insert(PipeRecord::new());
        st.pipes[id].reader = Some(1);
        st.pipes[id].writer = Some(2);
        reader_close(&mut st, Some(id)).unwrap();
        writer_close(&mut st, Some(id)).unwrap();
        assert!(!st.pipes.contains(id));
        assert!(reader_close(&mut st, Some(id)).is_ok());
        assert!(writer_close(&mut st, Some(id)).is_ok());
    }

    #[test]
    fn release_is_deferred_while_a_unit_is_blocked() {
        let mut st = KernelState::new();
        let id = st.pipes.insert(PipeRecord::new());
        st.pipes[id].reader = Some(1);
        st.pipes[id].writer = Some(2);
        st.pipes[id].waiters = 1;
        reader_close(&mut st, Some(id)).unwrap();
        writer_close(&mut st, Some(id)).unwrap();
        assert!(st.pipes.contains(id));
        st.pipes[id].waiters = 0;
        maybe_release(&mut st, id);
        assert!(!st.pipes.contains(id));
    }
}
