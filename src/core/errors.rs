/*!
 * Error Types
 * Kernel error taxonomy with thiserror and miette support
 */

use miette::Diagnostic;
use thiserror::Error;

/// Common result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// The failure taxonomy of the kernel core. Short reads/writes and
/// end-of-stream are *not* errors; they surface as `Ok(n)` / `Ok(0)` so
/// callers can treat partial I/O as success-with-less-data.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum KernelError {
    #[error("invalid handle: {0}")]
    #[diagnostic(
        code(kernel::invalid_handle),
        help("The identity is out of range or names a freed record.")
    )]
    InvalidHandle(String),

    #[error("illegal state: {0}")]
    #[diagnostic(
        code(kernel::illegal_state),
        help("The operation is not legal in the object's current state.")
    )]
    IllegalState(String),

    #[error("out of resources: {0}")]
    #[diagnostic(
        code(kernel::exhausted),
        help("A fixed kernel table is full. Release records and retry.")
    )]
    Exhausted(&'static str),

    #[error("broken channel")]
    #[diagnostic(
        code(kernel::broken_channel),
        help("The local side of the channel is already closed.")
    )]
    BrokenChannel,

    #[error("timed out after {0:?}")]
    #[diagnostic(
        code(kernel::timeout),
        help("The deadline elapsed before the operation completed.")
    )]
    Timeout(std::time::Duration),

    #[error("invalid argument: {0}")]
    #[diagnostic(code(kernel::invalid_argument))]
    InvalidArgument(String),
}
