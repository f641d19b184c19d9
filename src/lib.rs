/*!
 * nanokern
 * Control core of a single-machine teaching kernel: process and thread
 * lifecycle plus the two byte-stream IPC primitives built on top of it
 * (unidirectional pipes and pipe-backed, port-addressed sockets).
 */

pub mod core;
pub mod dispatch;
pub mod ipc;
pub mod kernel;
pub mod process;
pub mod streams;

// Re-exports
pub use crate::core::errors::{KernelError, KernelResult};
pub use crate::core::types::{Fd, Pid, Port, Tid};
pub use crate::ipc::socket::ShutdownMode;
pub use crate::kernel::{Kernel, Task};
pub use crate::process::info::ProcessSnapshot;
