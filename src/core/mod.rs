/*!
 * Core Module
 * Shared types, fixed capacities, and the kernel error taxonomy
 */

pub mod errors;
pub mod limits;
pub mod types;
