//! `errno` save/restore around signal-handler bodies, matching the
//! `int olderrno = errno; ...; errno = olderrno;` bracketing in both
//! handlers of `jobs.c`. A handler that calls a libc function which
//! fails (e.g. a drained `read` hitting `EAGAIN`) would otherwise
//! clobber `errno` out from under whatever libc call the main context
//! was in the middle of when the signal arrived.

#[cfg(target_os = "linux")]
unsafe fn errno_ptr() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "macos")]
unsafe fn errno_ptr() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

pub struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    pub fn save() -> Self {
        Self(unsafe { *errno_ptr() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        unsafe {
            *errno_ptr() = self.0;
        }
    }
}
