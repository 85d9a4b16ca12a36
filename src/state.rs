use std::cell::UnsafeCell;

use crate::table::JobTable;

/// Process-wide job control state: one job table, one shell pid. This is
/// inherent to the shell semantics the core serves (spec.md Design
/// Notes: "there is one shell, one set of jobs") and is exposed only
/// through `init`/`fini` plus the operations in `reaper`, never as a
/// free-floating mutable global.
pub(crate) struct GlobalState {
    pub table: JobTable,
    pub shell_pid: libc::pid_t,
}

/// A `Sync`-asserted cell rather than a `Mutex`: the main context and
/// both signal handlers are guaranteed by the block-all-signals
/// discipline ([`crate::signal::BlockAllGuard`]) to never run
/// concurrently with each other (single OS thread, reentrancy ruled out
/// by the mask), so there is no lock to take or deadlock to avoid — the
/// mask discipline *is* the synchronization.
struct StateCell(UnsafeCell<Option<GlobalState>>);

unsafe impl Sync for StateCell {}

static STATE: StateCell = StateCell(UnsafeCell::new(None));

/// # Safety
/// Callers must hold a [`crate::signal::BlockAllGuard`], or be running
/// inside a signal handler that itself blocks all signals at entry
/// (`child_handler`, `io_handler`), for the entire duration any
/// reference returned from here is alive.
pub(crate) unsafe fn state_mut() -> &'static mut Option<GlobalState> {
    unsafe { &mut *STATE.0.get() }
}
