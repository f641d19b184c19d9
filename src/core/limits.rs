/*!
 * System Limits
 * Fixed capacities for the teaching kernel core. Everything here is a
 * compile-time constant; there is no dynamic resizing of kernel tables.
 */

use super::types::{Pid, Port};

/// Process-table slots. Exhaustion surfaces as a failed `exec`.
pub const MAX_PROC: usize = 512;

/// Descriptor slots per process.
pub const MAX_HANDLES: usize = 16;

/// Pipe ring-buffer capacity in bytes.
pub const PIPE_CAPACITY: usize = 16384;

/// Highest valid socket port; listeners bind ports 1..=MAX_PORT.
pub const MAX_PORT: Port = 1024;

/// The "no port" value, usable by sockets that only ever connect.
pub const NOPORT: Port = 0;

/// Cap on the argument bytes copied into one process-info snapshot.
pub const PROCINFO_ARGS_MAX: usize = 128;

/// Bootstrap process indices. Both are parentless.
pub const IDLE_PID: Pid = 0;
pub const INIT_PID: Pid = 1;
