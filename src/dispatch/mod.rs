/*!
 * Dispatcher Contract
 * The cooperative dispatcher consumed by the kernel core: schedulable units
 * bound to entry functions, the current-unit context, and condition
 * wait/signal against the single global kernel lock.
 *
 * Units are realized as named OS threads. Wakeups are broadcast-style and
 * non-selective, so every blocking loop in the core re-validates its
 * predicate after resuming from a wait.
 */

use crate::core::types::{Pid, Tid};
use crate::kernel::{Kernel, Task};
use parking_lot::{Condvar, MutexGuard};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Identity of the unit currently executing on this thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Current {
    pub pid: Pid,
    pub tid: Tid,
}

thread_local! {
    static CURRENT: std::cell::Cell<Option<Current>> = const { std::cell::Cell::new(None) };
}

/// The `(pid, tid)` of the running unit, or `None` outside of one.
pub fn current() -> Option<Current> {
    CURRENT.with(|c| c.get())
}

/// Unwind payload carried by `exit`/`thread_exit`. The unit wrapper catches
/// it and runs the thread-exit bookkeeping; the panic hook keeps it out of
/// stderr.
pub(crate) struct ThreadExit(pub i32);

/// Diverge out of the current unit with the given exit code.
pub(crate) fn unwind_exit(code: i32) -> ! {
    panic::panic_any(ThreadExit(code))
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ThreadExit>().is_none() {
                prev(info);
            }
        }));
    });
}

/// Release a schedulable unit bound to `task`. The control records named by
/// `(pid, tid)` must be fully initialized before this is called, since the
/// unit may run immediately. `main` selects process-exit semantics for the
/// task's return value; a secondary thread's return only exits that thread.
pub(crate) fn spawn_unit(
    kernel: Kernel,
    pid: Pid,
    tid: Tid,
    main: bool,
    task: Task,
    args: Vec<u8>,
) -> std::io::Result<JoinHandle<i32>> {
    install_hook();
    thread::Builder::new()
        .name(format!("unit-{pid}.{tid}"))
        .spawn(move || {
            CURRENT.with(|c| c.set(Some(Current { pid, tid })));
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> i32 {
                let value = task(&kernel, &args);
                if main {
                    kernel.exit(value)
                } else {
                    kernel.thread_exit(value)
                }
            }));
            let code = match outcome {
                Ok(code) => code,
                Err(payload) => match payload.downcast::<ThreadExit>() {
                    Ok(exit) => exit.0,
                    Err(other) => {
                        log::error!("unit {pid}.{tid} panicked: {}", panic_message(&other));
                        -1
                    }
                },
            };
            kernel.finalize_thread(code);
            code
        })
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Clonable condition handle. Waiting atomically releases the kernel lock
/// and reacquires it before returning, per the dispatcher's block/wake
/// contract.
#[derive(Clone, Default)]
pub struct Condition(Arc<Condvar>);

impl Condition {
    pub fn new() -> Self {
        Self(Arc::new(Condvar::new()))
    }

    /// Block until signaled. Spurious and collective wakeups are allowed;
    /// callers re-check their predicate in a loop.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        self.0.wait(guard);
    }

    /// Timed wait; returns true when the deadline elapsed first.
    pub fn wait_until<T>(&self, guard: &mut MutexGuard<'_, T>, deadline: Instant) -> bool {
        self.0.wait_until(guard, deadline).timed_out()
    }

    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    pub fn notify_all(&self) {
        self.0.notify_all();
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Condition")
    }
}
