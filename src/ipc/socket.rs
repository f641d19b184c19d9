/*!
 * Stream Sockets
 * Port-addressed, connection-oriented endpoints built on pipe pairs.
 * A socket record moves monotonically from UNBOUND to LISTENER (listen)
 * or PEER (a completed handshake); the handshake wires two fresh pipes
 * into a duplex channel under the kernel lock before the connector is
 * admitted.
 */

use crate::core::errors::{KernelError, KernelResult};
use crate::core::limits::{MAX_PORT, NOPORT};
use crate::core::types::{Fd, HandleId, Pid, PipeId, Port, ReqId, SockId};
use crate::dispatch::Condition;
use crate::ipc::pipe::{self, PipeRecord};
use crate::kernel::{Kernel, KernelState};
use crate::streams::{self, StreamKind};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Which half of a peer socket `shutdown` closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Read,
    Write,
    Both,
}

/// State-dependent payload of a socket record. Transitions are monotone:
/// UNBOUND becomes LISTENER or PEER, and nothing else.
pub(crate) enum SocketKind {
    Unbound,
    Listener {
        /// Pending connection requests, oldest first.
        queue: VecDeque<ReqId>,
        req_available: Condition,
    },
    Peer {
        /// Back-reference to the other endpoint; severed when that side
        /// closes so this record never chases a freed slot.
        peer: Option<SockId>,
        read_pipe: Option<PipeId>,
        write_pipe: Option<PipeId>,
    },
}

pub(crate) struct SocketRecord {
    /// Holders of this record: its handle, plus any unit blocked inside
    /// accept or connect on it. Freed when this reaches zero.
    pub refcount: usize,
    /// Owning handle, if still open.
    pub handle: Option<HandleId>,
    /// Port the socket was bound to at creation; NOPORT for unaddressed.
    pub port: Port,
    pub kind: SocketKind,
}

/// A pending connect-to-accept handshake, queued on a listener. Destroyed
/// by the connect call once it observes admission or gives up.
pub(crate) struct ConnRequest {
    pub socket: SockId,
    pub admitted: bool,
    pub connected: Condition,
}

impl Kernel {
    /// Create an unbound socket on `port` and return its descriptor.
    pub fn create_socket(&self, port: Port) -> KernelResult<Fd> {
        if port > MAX_PORT {
            return Err(KernelError::InvalidArgument(format!(
                "port {port} is out of range (max {MAX_PORT})"
            )));
        }
        let cur = self.current()?;
        let mut st = self.lock();
        let sid = st.sockets.insert(SocketRecord {
            refcount: 1,
            handle: None,
            port,
            kind: SocketKind::Unbound,
        });
        match streams::reserve_one(&mut st, cur.pid, StreamKind::Socket(sid)) {
            Ok((fd, hid)) => {
                st.sockets[sid].handle = Some(hid);
                log::debug!("socket {sid} created on port {port} (fd {fd})");
                Ok(fd)
            }
            Err(e) => {
                st.sockets.remove(sid);
                Err(e)
            }
        }
    }

    /// Turn an unbound socket into the listener for its port. At most one
    /// listener may occupy a port at a time.
    pub fn listen(&self, fd: Fd) -> KernelResult<()> {
        let cur = self.current()?;
        let mut st = self.lock();
        let sid = resolve_socket(&st, cur.pid, fd)?;
        let rec = &st.sockets[sid];
        if !matches!(rec.kind, SocketKind::Unbound) {
            return Err(KernelError::IllegalState("socket is not unbound".into()));
        }
        let port = rec.port;
        if port == NOPORT {
            return Err(KernelError::IllegalState(
                "socket is not bound to a port".into(),
            ));
        }
        if st.ports[port as usize].is_some() {
            return Err(KernelError::IllegalState(format!(
                "port {port} already has a listener"
            )));
        }
        st.sockets[sid].kind = SocketKind::Listener {
            queue: VecDeque::new(),
            req_available: Condition::new(),
        };
        st.ports[port as usize] = Some(sid);
        log::debug!("socket {sid} now listening on port {port}");
        Ok(())
    }

    /// Connect an unbound socket to the listener on `port`. Blocks until an
    /// acceptor admits the request, or until `timeout` elapses when one is
    /// given. On success the socket is a fully wired peer.
    pub fn connect(&self, fd: Fd, port: Port, timeout: Option<Duration>) -> KernelResult<()> {
        let cur = self.current()?;
        let mut st = self.lock();
        let sid = resolve_socket(&st, cur.pid, fd)?;
        if !matches!(st.sockets[sid].kind, SocketKind::Unbound) {
            return Err(KernelError::IllegalState("socket is not unbound".into()));
        }
        if port > MAX_PORT {
            return Err(KernelError::InvalidArgument(format!(
                "port {port} is out of range (max {MAX_PORT})"
            )));
        }
        let lid = st.ports[port as usize].ok_or_else(|| {
            KernelError::IllegalState(format!("no listener on port {port}"))
        })?;

        let rid = st.requests.insert(ConnRequest {
            socket: sid,
            admitted: false,
            connected: Condition::new(),
        });
        match &mut st.sockets[lid].kind {
            SocketKind::Listener { queue, req_available } => {
                queue.push_back(rid);
                req_available.notify_all();
            }
            // the port table only ever holds listeners
            _ => {
                st.requests.remove(rid);
                return Err(KernelError::IllegalState(format!(
                    "no listener on port {port}"
                )));
            }
        }
        st.sockets[sid].refcount += 1;

        let cv = st.requests[rid].connected.clone();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if st.requests[rid].admitted {
                break;
            }
            match deadline {
                Some(d) => {
                    if cv.wait_until(&mut st, d) {
                        break;
                    }
                }
                None => cv.wait(&mut st),
            }
        }

        let admitted = st.requests.remove(rid).admitted;
        if !admitted {
            // withdraw the request from whichever listener still queues it
            if let Some(lid) = st.ports[port as usize] {
                if let SocketKind::Listener { queue, .. } = &mut st.sockets[lid].kind {
                    queue.retain(|&r| r != rid);
                }
            }
        }
        sock_decref(&mut st, sid);
        if admitted {
            log::debug!("socket {sid} connected to port {port}");
            Ok(())
        } else {
            Err(KernelError::Timeout(timeout.unwrap_or_default()))
        }
    }

    /// Accept the oldest pending request on a listener: allocate the
    /// server-side peer socket and two pipes, cross-wire both endpoints,
    /// admit the connector, and return the new peer's descriptor.
    pub fn accept(&self, fd: Fd) -> KernelResult<Fd> {
        let cur = self.current()?;
        let mut st = self.lock();
        let sid = resolve_socket(&st, cur.pid, fd)?;
        if !matches!(st.sockets[sid].kind, SocketKind::Listener { .. }) {
            return Err(KernelError::IllegalState("socket is not a listener".into()));
        }
        let port = st.sockets[sid].port;
        st.sockets[sid].refcount += 1;

        loop {
            if st.ports[port as usize] != Some(sid) {
                sock_decref(&mut st, sid);
                return Err(KernelError::IllegalState("listener was closed".into()));
            }
            match &st.sockets[sid].kind {
                SocketKind::Listener { queue, req_available } => {
                    if !queue.is_empty() {
                        break;
                    }
                    let cv = req_available.clone();
                    cv.wait(&mut st);
                }
                _ => {
                    sock_decref(&mut st, sid);
                    return Err(KernelError::IllegalState("listener was closed".into()));
                }
            }
        }

        // reserve the server-side socket and descriptor before touching the
        // queue, so a failure leaves the request pending for the next accept
        let peer_sid = st.sockets.insert(SocketRecord {
            refcount: 1,
            handle: None,
            port,
            kind: SocketKind::Unbound,
        });
        let (new_fd, server_hid) =
            match streams::reserve_one(&mut st, cur.pid, StreamKind::Socket(peer_sid)) {
                Ok(v) => v,
                Err(e) => {
                    st.sockets.remove(peer_sid);
                    sock_decref(&mut st, sid);
                    return Err(e);
                }
            };
        st.sockets[peer_sid].handle = Some(server_hid);

        let popped = match &mut st.sockets[sid].kind {
            SocketKind::Listener { queue, .. } => queue.pop_front(),
            _ => None,
        };
        let Some(rid) = popped else {
            st.procs.pcb_mut(cur.pid).fids[new_fd] = None;
            st.handles.remove(server_hid);
            st.sockets.remove(peer_sid);
            sock_decref(&mut st, sid);
            return Err(KernelError::IllegalState("listener was closed".into()));
        };

        let client_sid = st.requests[rid].socket;
        let client_hid = st.sockets[client_sid].handle;

        // pipe A carries client-to-server bytes, pipe B the reverse
        let a = st.pipes.insert(PipeRecord::new());
        let b = st.pipes.insert(PipeRecord::new());
        st.pipes[a].reader = Some(server_hid);
        st.pipes[a].writer = client_hid;
        st.pipes[b].reader = client_hid;
        st.pipes[b].writer = Some(server_hid);

        st.sockets[peer_sid].kind = SocketKind::Peer {
            peer: Some(client_sid),
            read_pipe: Some(a),
            write_pipe: Some(b),
        };
        st.sockets[client_sid].kind = SocketKind::Peer {
            peer: Some(peer_sid),
            read_pipe: Some(b),
            write_pipe: Some(a),
        };

        let req = &mut st.requests[rid];
        req.admitted = true;
        req.connected.notify_all();
        sock_decref(&mut st, sid);
        log::debug!("listener {sid} admitted socket {client_sid} as peer of {peer_sid}");
        Ok(new_fd)
    }

    /// Close one or both halves of a connected socket. Re-closing an
    /// already-shut half is a no-op success.
    pub fn shutdown(&self, fd: Fd, mode: ShutdownMode) -> KernelResult<()> {
        let cur = self.current()?;
        let mut st = self.lock();
        let sid = resolve_socket(&st, cur.pid, fd)?;
        let (read_pipe, write_pipe) = match &st.sockets[sid].kind {
            SocketKind::Peer {
                read_pipe,
                write_pipe,
                ..
            } => (*read_pipe, *write_pipe),
            _ => return Err(KernelError::IllegalState("socket is not connected".into())),
        };
        match mode {
            ShutdownMode::Read => pipe::reader_close(&mut st, read_pipe),
            ShutdownMode::Write => pipe::writer_close(&mut st, write_pipe),
            ShutdownMode::Both => {
                let r = pipe::reader_close(&mut st, read_pipe);
                let w = pipe::writer_close(&mut st, write_pipe);
                r.and(w)
            }
        }
    }
}

/// Teardown for the last handle reference to a socket. The record itself
/// survives until every blocked accept/connect holding a refcount lets go.
pub(crate) fn socket_close(st: &mut KernelState, sid: SockId) {
    enum Tear {
        Nothing,
        Listener(Condition),
        Peer {
            read_pipe: Option<PipeId>,
            write_pipe: Option<PipeId>,
            peer: Option<SockId>,
        },
    }

    let Some(rec) = st.sockets.get_mut(sid) else {
        return;
    };
    rec.handle = None;
    let port = rec.port;
    let tear = match &rec.kind {
        SocketKind::Unbound => Tear::Nothing,
        SocketKind::Listener { req_available, .. } => Tear::Listener(req_available.clone()),
        SocketKind::Peer {
            peer,
            read_pipe,
            write_pipe,
        } => Tear::Peer {
            read_pipe: *read_pipe,
            write_pipe: *write_pipe,
            peer: *peer,
        },
    };

    match tear {
        Tear::Nothing => {}
        Tear::Listener(cv) => {
            if st.ports[port as usize] == Some(sid) {
                st.ports[port as usize] = None;
            }
            cv.notify_all();
            log::debug!("listener {sid} closed, port {port} vacated");
        }
        Tear::Peer {
            read_pipe,
            write_pipe,
            peer,
        } => {
            if let Some(id) = read_pipe {
                let _ = pipe::reader_close(st, Some(id));
            }
            if let Some(id) = write_pipe {
                let _ = pipe::writer_close(st, Some(id));
            }
            if let Some(peer_sid) = peer {
                // the slot may have been freed and reused; only sever a
                // back-reference that still points at this record
                if let Some(SocketRecord {
                    kind: SocketKind::Peer { peer, .. },
                    ..
                }) = st.sockets.get_mut(peer_sid)
                {
                    if *peer == Some(sid) {
                        *peer = None;
                    }
                }
            }
        }
    }
    sock_decref(st, sid);
}

pub(crate) fn sock_decref(st: &mut KernelState, sid: SockId) {
    let rec = &mut st.sockets[sid];
    rec.refcount -= 1;
    if rec.refcount == 0 {
        st.sockets.remove(sid);
        log::trace!("socket {sid} released");
    }
}

fn resolve_socket(st: &KernelState, pid: Pid, fd: Fd) -> KernelResult<SockId> {
    let hid = streams::resolve(st, pid, fd)?;
    match st.handles[hid].kind {
        StreamKind::Socket(sid) => Ok(sid),
        _ => Err(KernelError::InvalidHandle(format!(
            "descriptor {fd} is not a socket"
        ))),
    }
}
