use std::io;
use std::mem::MaybeUninit;

/// Blocks every signal for the lifetime of the guard, restoring the
/// prior mask on drop. This is the crate's sole synchronization
/// primitive: every main-context mutator (`run`, `cancel`, `expunge`,
/// `fini`, `show`, `get_output`) and both signal handlers bracket their
/// body with this (or the handler's own equivalent), so a handler can
/// never observe or mutate the job table mid-update from another
/// context (spec.md §5).
pub struct BlockAllGuard {
    prev: libc::sigset_t,
}

impl BlockAllGuard {
    pub fn new() -> Self {
        unsafe {
            let mut full: libc::sigset_t = MaybeUninit::zeroed().assume_init();
            libc::sigfillset(&mut full);
            let mut prev: libc::sigset_t = MaybeUninit::zeroed().assume_init();
            libc::sigprocmask(libc::SIG_BLOCK, &full, &mut prev);
            Self { prev }
        }
    }
}

impl Default for BlockAllGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BlockAllGuard {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.prev, std::ptr::null_mut());
        }
    }
}

/// Blocks until any signal is delivered (`jobs_pause`).
pub fn pause_for_any_signal() {
    unsafe {
        libc::pause();
    }
}

/// Installs a `sigaction`-based handler with `SA_RESTART` so interrupted
/// blocking syscalls (`read`, `waitpid`) resume transparently outside of
/// the one place (`wait`'s `sigsuspend` loop) that wants to see `EINTR`.
pub fn install_handler(
    signum: libc::c_int,
    handler: extern "C" fn(libc::c_int),
) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = MaybeUninit::zeroed().assume_init();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;
        if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn restore_default(signum: libc::c_int) -> io::Result<()> {
    unsafe {
        if libc::signal(signum, libc::SIG_DFL) == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Resets the process signal mask to empty. Called immediately after
/// `fork()` in both the leader and every worker: the shell blocks all
/// signals around the whole launch (via [`BlockAllGuard`]), and `fork`
/// inherits that blocked mask into the child — without this reset,
/// `execvp`'d programs would start with every signal blocked (signal
/// *dispositions* reset to default across `exec`, but the mask does
/// not).
pub fn reset_mask_to_empty() {
    unsafe {
        let mut empty: libc::sigset_t = MaybeUninit::zeroed().assume_init();
        libc::sigemptyset(&mut empty);
        libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
    }
}

/// Resets dispositions a shell typically ignores back to `SIG_DFL`
/// before `execvp`, since `SIG_IGN` (unlike a handler) survives `exec`.
pub fn reset_default_dispositions() {
    unsafe {
        for &sig in &[libc::SIGINT, libc::SIGTSTP, libc::SIGQUIT, libc::SIGPIPE] {
            libc::signal(sig, libc::SIG_DFL);
        }
    }
}
