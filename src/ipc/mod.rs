/*!
 * Inter-Process Communication
 * Byte pipes and the pipe-backed stream socket layer built on top of them
 */

pub mod pipe;
pub mod socket;
