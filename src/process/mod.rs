/*!
 * Process Module
 * Process table and lifecycle, the thread/join layer, and the
 * process-table introspection stream
 */

pub mod info;
pub mod lifecycle;
pub mod table;
pub mod thread;
