use std::io::{self, Write};
use std::os::unix::io::RawFd;

use log::debug;

use crate::capture::CaptureBuffer;
use crate::errno::ErrnoGuard;
use crate::error::{JobError, Result};
use crate::signal::{self, BlockAllGuard};
use crate::state::{self, GlobalState};
use crate::table::{JobId, JobStatus, JobTable};

/// The unconditional cancellation signal (spec.md §4.E / §5): sent to
/// the process group by `cancel`, and the one signal death the
/// classifier maps to `Cancelled` rather than `Aborted`.
const CANCEL_SIGNAL: libc::c_int = libc::SIGKILL;

/// Installs the two signal handlers and creates the process-wide job
/// table. Idempotent: calling `init` twice is a no-op.
pub fn init() -> Result<()> {
    let _guard = BlockAllGuard::new();
    if unsafe { state::state_mut() }.is_some() {
        return Ok(());
    }
    signal::install_handler(libc::SIGCHLD, child_handler).map_err(JobError::SystemCallFailed)?;
    signal::install_handler(libc::SIGIO, io_handler).map_err(JobError::SystemCallFailed)?;
    unsafe {
        *state::state_mut() = Some(GlobalState {
            table: JobTable::new(),
            shell_pid: libc::getpid(),
        });
    }
    debug!("job event=init");
    Ok(())
}

/// Cancels every non-terminal job, waits for each, and expunges all.
/// Best-effort: continues reclaiming what it can even if a sub-step
/// fails, per spec.md §7.
pub fn fini() -> Result<()> {
    let ids: Vec<JobId> = {
        let _guard = BlockAllGuard::new();
        let state = unsafe { state::state_mut() }
            .as_ref()
            .ok_or(JobError::NotInitialized)?;
        state.table.job_ids()
    };

    let mut any_failed = false;
    for id in ids {
        if poll(id).is_err() {
            let _ = cancel(id);
            let _ = wait(id);
        }
        if expunge(id).is_err() {
            any_failed = true;
        }
    }

    {
        let _guard = BlockAllGuard::new();
        unsafe {
            *state::state_mut() = None;
        }
        let _ = signal::restore_default(libc::SIGCHLD);
        let _ = signal::restore_default(libc::SIGIO);
    }

    debug!("job event=fini failed={any_failed}");
    if any_failed {
        Err(JobError::SystemCallFailed(io::Error::other(
            "fini: one or more jobs failed to finalize",
        )))
    } else {
        Ok(())
    }
}

/// Blocks until the job reaches a terminal status, then returns its
/// decoded exit code.
///
/// This is the one operation that deliberately does *not* use
/// [`BlockAllGuard`]: it instead blocks every signal except
/// `SIGCHLD` for its entire duration and loops on test-then-`sigsuspend`,
/// matching `jobs_wait` in the original C exactly. That is what makes
/// the loop race-free — a `SIGCHLD` delivered at any point either has
/// already updated the record before the check runs, or wakes the
/// `sigsuspend` call directly, since it is never blocked.
pub fn wait(job_id: JobId) -> Result<i32> {
    let mut mask: libc::sigset_t = unsafe { std::mem::zeroed() };
    let mut prev: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigfillset(&mut mask);
        libc::sigdelset(&mut mask, libc::SIGCHLD);
        libc::sigprocmask(libc::SIG_SETMASK, &mask, &mut prev);
    }

    let result = loop {
        let snapshot = unsafe { state::state_mut() }
            .as_ref()
            .ok_or(JobError::NotInitialized)
            .map(|s| s.table.find(job_id).map(|r| (r.status, r.exit_status)));

        match snapshot {
            Err(e) => break Err(e),
            Ok(None) => break Err(JobError::NoSuchJob(job_id)),
            Ok(Some((status, exit_status))) if status.is_terminal() => {
                break Ok(decode_exit_status(exit_status));
            }
            Ok(Some(_)) => unsafe {
                libc::sigsuspend(&mask);
            },
        }
    };

    unsafe {
        libc::sigprocmask(libc::SIG_SETMASK, &prev, std::ptr::null_mut());
    }
    result
}

/// Returns the job's current `JobStatus` without requiring it to be
/// terminal (unlike `poll`, which reports an exit code only once the
/// job is done). Useful for tests and diagnostics.
pub fn status(job_id: JobId) -> Result<JobStatus> {
    let _guard = BlockAllGuard::new();
    let state = unsafe { state::state_mut() }
        .as_ref()
        .ok_or(JobError::NotInitialized)?;
    state
        .table
        .find(job_id)
        .map(|r| r.status)
        .ok_or(JobError::NoSuchJob(job_id))
}

/// Returns immediately: the decoded exit code if terminal,
/// `NotTerminated` if not, `NoSuchJob` if unknown.
pub fn poll(job_id: JobId) -> Result<i32> {
    let _guard = BlockAllGuard::new();
    let state = unsafe { state::state_mut() }
        .as_ref()
        .ok_or(JobError::NotInitialized)?;
    let record = state.table.find(job_id).ok_or(JobError::NoSuchJob(job_id))?;
    if record.status.is_terminal() {
        Ok(decode_exit_status(record.exit_status))
    } else {
        Err(JobError::NotTerminated(job_id))
    }
}

/// Sends [`CANCEL_SIGNAL`] to the job's process group. Returns
/// immediately; the transition to `Cancelled` happens when the reaper
/// later observes the leader's death. Permitted only once per job and
/// only before it terminates.
pub fn cancel(job_id: JobId) -> Result<()> {
    let _guard = BlockAllGuard::new();
    let state = unsafe { state::state_mut() }
        .as_mut()
        .ok_or(JobError::NotInitialized)?;
    let record = state
        .table
        .find_mut(job_id)
        .ok_or(JobError::NoSuchJob(job_id))?;
    if record.status.is_terminal() || record.cancel_requested {
        return Err(JobError::AlreadyCancelled(job_id));
    }
    record.cancel_requested = true;
    let pgid = record.pgid;
    if unsafe { libc::kill(-pgid, CANCEL_SIGNAL) } != 0 {
        return Err(JobError::SystemCallFailed(io::Error::last_os_error()));
    }
    debug!("job event=cancel id={job_id} pgid={pgid}");
    Ok(())
}

/// Drains any remaining capture bytes, closes the capture fd, and
/// unlinks the record. Permitted only from a terminal status.
pub fn expunge(job_id: JobId) -> Result<()> {
    let _guard = BlockAllGuard::new();
    let state = unsafe { state::state_mut() }
        .as_mut()
        .ok_or(JobError::NotInitialized)?;
    {
        let record = state.table.find(job_id).ok_or(JobError::NoSuchJob(job_id))?;
        if !record.status.is_terminal() {
            return Err(JobError::NotTerminated(job_id));
        }
    }
    let mut record = state
        .table
        .remove(job_id)
        .ok_or(JobError::NoSuchJob(job_id))?;
    if let Some(fd) = record.capture_fd.take() {
        drain_capture_fd(fd, &mut record.captured_output);
        unsafe {
            libc::close(fd);
        }
    }
    debug!("job event=expunge id={job_id}");
    Ok(())
}

/// Returns a copy of the bytes captured so far. Errors if the job's
/// pipeline never set `capture_output`.
pub fn get_output(job_id: JobId) -> Result<Vec<u8>> {
    let _guard = BlockAllGuard::new();
    let state = unsafe { state::state_mut() }
        .as_ref()
        .ok_or(JobError::NotInitialized)?;
    let record = state.table.find(job_id).ok_or(JobError::NoSuchJob(job_id))?;
    if !record.has_capture() {
        return Err(JobError::CaptureUnavailable(job_id));
    }
    Ok(record.captured_output.as_slice().to_vec())
}

/// Writes one `job_id\tpgid\tstatus\tpipeline` line per job, in
/// insertion order.
pub fn show(out: &mut dyn Write) -> Result<()> {
    let _guard = BlockAllGuard::new();
    let state = unsafe { state::state_mut() }
        .as_ref()
        .ok_or(JobError::NotInitialized)?;
    for record in state.table.iter() {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            record.job_id, record.pgid, record.status, record.rendered
        )
        .map_err(JobError::SystemCallFailed)?;
    }
    Ok(())
}

/// Blocks until any signal is delivered.
pub fn pause() {
    signal::pause_for_any_signal();
}

fn decode_exit_status(raw: i32) -> i32 {
    crate::status::exit_code_from_wait_status(raw).unwrap_or(raw)
}

fn classify(raw_status: libc::c_int) -> JobStatus {
    unsafe {
        if libc::WIFEXITED(raw_status) {
            if libc::WEXITSTATUS(raw_status) == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Aborted
            }
        } else if libc::WIFSIGNALED(raw_status) {
            if libc::WTERMSIG(raw_status) == CANCEL_SIGNAL {
                JobStatus::Cancelled
            } else {
                JobStatus::Aborted
            }
        } else {
            JobStatus::Aborted
        }
    }
}

fn drain_capture_fd(fd: RawFd, buf: &mut CaptureBuffer) {
    let mut chunk = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };
        if n > 0 {
            buf.append(&chunk[..n as usize]);
            continue;
        }
        if n == 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        break; // EAGAIN/EWOULDBLOCK: would block
    }
}

/// Child-termination handler: reaps every terminated pid it can find
/// without blocking, classifies each, and writes the matching job
/// record. Drains with `WNOHANG` rather than reaping exactly one pid
/// per invocation (as the original does): `SIGCHLD` delivery can
/// coalesce when several children terminate in quick succession, and a
/// single-reap handler would then leave one of them unreaped until a
/// later, unrelated signal happened to run this handler again.
extern "C" fn child_handler(_sig: libc::c_int) {
    let _errno_guard = ErrnoGuard::save();
    let _mask_guard = BlockAllGuard::new();
    loop {
        let mut raw_status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut raw_status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        if let Some(state) = unsafe { state::state_mut() } {
            if let Some(record) = state.table.find_by_pgid_mut(pid) {
                record.status = classify(raw_status);
                record.exit_status = raw_status;
            }
            // No matching record: event dropped (spec.md §7).
        }
    }
}

/// I/O-ready handler: drains every job's capture fd, not just the one
/// that became readable, because `SIGIO` delivery does not reliably
/// identify the originating descriptor (spec.md §4.E).
extern "C" fn io_handler(_sig: libc::c_int) {
    let _errno_guard = ErrnoGuard::save();
    let _mask_guard = BlockAllGuard::new();
    if let Some(state) = unsafe { state::state_mut() } {
        for record in state.table.iter_mut() {
            if let Some(fd) = record.capture_fd {
                drain_capture_fd(fd, &mut record.captured_output);
            }
        }
    }
}
