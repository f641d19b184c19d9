/*!
 * Core Types
 * Identifier types used across the kernel core
 */

/// Process identity: an index into the fixed process table.
pub type Pid = u32;

/// Thread identity: an index into the thread-record arena.
pub type Tid = usize;

/// Per-process descriptor index.
pub type Fd = usize;

/// Socket port number. 0 is the "no port" value for connect-only sockets.
pub type Port = u32;

// Internal arena identities. Cross-references between records are these
// plain integers looked up on demand, never owning pointers.
pub(crate) type HandleId = usize;
pub(crate) type PipeId = usize;
pub(crate) type SockId = usize;
pub(crate) type ReqId = usize;
