use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use log::{debug, warn};

use crate::error::{JobError, Result};
use crate::pipeline::{Command, Pipeline};
use crate::signal::{self, BlockAllGuard};
use crate::state;
use crate::table::JobId;

/// Forks the pipeline leader, wires up pipes/redirections/capture, and
/// registers a new `Running` job record. See spec.md §4.D for the
/// algorithm this follows step for step.
pub fn run(pipeline: Pipeline) -> Result<JobId> {
    if pipeline.is_empty() {
        return Err(JobError::InvalidPipeline);
    }

    // Rendered exactly once, here, so `show` never calls back into
    // `Arg::eval()` on a later, unrelated call: an expression with side
    // effects would otherwise print something different from what was
    // actually launched, and a panicking expression would take down the
    // whole shell the next time someone happened to call `show`.
    let rendered = render_pipeline(&pipeline);

    let _guard = BlockAllGuard::new();

    let state = unsafe { state::state_mut() }
        .as_mut()
        .ok_or(JobError::NotInitialized)?;

    let (capture_read, capture_write) = make_pipe()?;

    let leader_pid = unsafe { libc::fork() };
    if leader_pid < 0 {
        let err = io::Error::last_os_error();
        close_fd(capture_read);
        close_fd(capture_write);
        return Err(JobError::ForkFailed(err));
    }

    if leader_pid == 0 {
        // Unlike a worker, the leader never execs, so it keeps the fully
        // blocked mask it inherited from this `BlockAllGuard` rather than
        // calling `reset_mask_to_empty`. See `run_leader` for why.
        run_leader(&pipeline, capture_read, capture_write);
        unreachable!("run_leader always terminates the process");
    }

    // Shell side: the leader has its own copy of both capture ends.
    close_fd(capture_write);

    let capture_fd = if pipeline.capture_output {
        if let Err(err) = configure_async_capture(capture_read, unsafe { libc::getpid() }) {
            warn!(
                "job event=run stage=capture_setup pgid={leader_pid} error={err}; \
                 falling back to a blocking, unregistered read end"
            );
        }
        Some(capture_read)
    } else {
        close_fd(capture_read);
        None
    };

    let job_id = state.table.insert(leader_pid, pipeline, capture_fd, rendered);
    debug!(
        "job event=run id={job_id} pgid={leader_pid} capture={}",
        capture_fd.is_some()
    );
    Ok(job_id)
}

/// Renders `pipeline`'s display text once, containing any panic from a
/// pathological `Arg::Expr` evaluation to this one call instead of
/// letting it unwind into the caller. This is the only place outside a
/// forked worker that calls `Arg::eval()`.
fn render_pipeline(pipeline: &Pipeline) -> String {
    let mut buf = String::new();
    let evaluated = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pipeline.pretty_print(&mut buf)
    }));
    match evaluated {
        Ok(Ok(())) => buf,
        _ => "<unprintable pipeline: argument evaluation failed>".to_string(),
    }
}

/// Runs as the forked leader process. Never returns: every path ends in
/// `_exit` (success, a setup failure, or re-raising the tail worker's
/// signal death onto itself).
///
/// Keeps every signal blocked for its entire lifetime instead of
/// resetting the mask the way a worker does. `child_handler`/`io_handler`
/// are installed as `sigaction` dispositions by `reaper::init()`, and a
/// disposition survives `fork()` (only `exec` resets it) — with the mask
/// unblocked, a worker's death would invoke that inherited handler here
/// too, racing the `waitpid` loop below for the same children and
/// corrupting its exit-status bookkeeping. `waitpid` itself does not
/// need `SIGCHLD` unblocked to wake up: the kernel tracks child state
/// independently of signal delivery.
fn run_leader(pipeline: &Pipeline, capture_read: RawFd, capture_write: RawFd) -> ! {
    unsafe {
        if libc::setpgid(0, 0) != 0 {
            libc::_exit(1);
        }
    }
    let leader_pid = unsafe { libc::getpid() };

    let mut prev_read: RawFd = libc::STDIN_FILENO;
    let mut worker_pids: Vec<libc::pid_t> = Vec::with_capacity(pipeline.commands.len());
    let last_index = pipeline.commands.len() - 1;

    for (i, cmd) in pipeline.commands.iter().enumerate() {
        let (stage_read, stage_write) = match make_pipe() {
            Ok(p) => p,
            Err(_) => unsafe { libc::_exit(1) },
        };

        let child_pid = unsafe { libc::fork() };
        if child_pid < 0 {
            unsafe { libc::_exit(1) };
        }

        if child_pid == 0 {
            signal::reset_mask_to_empty();
            run_worker(
                cmd,
                i == 0,
                i == last_index,
                prev_read,
                stage_read,
                stage_write,
                capture_read,
                capture_write,
                pipeline.input_file.as_deref(),
                pipeline.output_file.as_deref(),
                pipeline.capture_output,
            );
            unreachable!("run_worker always terminates the process");
        }

        unsafe {
            // Called from both sides of the race (also by the worker
            // itself, below) so whichever runs first wins and the other
            // is a harmless no-op.
            let _ = libc::setpgid(child_pid, leader_pid);
        }
        close_fd(stage_write);
        if prev_read != libc::STDIN_FILENO {
            close_fd(prev_read);
        }
        prev_read = stage_read;
        worker_pids.push(child_pid);
    }

    if prev_read != libc::STDIN_FILENO {
        close_fd(prev_read);
    }
    close_fd(capture_read);
    close_fd(capture_write);

    let tail_pid = worker_pids.last().copied();
    let mut pending: Vec<libc::pid_t> = worker_pids;
    let mut any_failed = false;
    let mut tail_signal_death = false;

    while !pending.is_empty() {
        let mut raw_status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut raw_status, 0) };
        if pid < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break;
        }
        if let Some(pos) = pending.iter().position(|&p| p == pid) {
            pending.remove(pos);
        } else {
            continue;
        }

        let is_tail = tail_pid == Some(pid);
        unsafe {
            if libc::WIFEXITED(raw_status) {
                if libc::WEXITSTATUS(raw_status) != 0 {
                    any_failed = true;
                }
            } else if libc::WIFSIGNALED(raw_status) {
                any_failed = true;
                if is_tail {
                    tail_signal_death = true;
                }
            }
        }
    }

    if tail_signal_death {
        unsafe {
            libc::raise(libc::SIGABRT);
        }
        unsafe { libc::_exit(1) };
    }

    unsafe { libc::_exit(if any_failed { 1 } else { 0 }) };
}

/// Runs as a forked worker process executing one command of the
/// pipeline. Never returns.
#[allow(clippy::too_many_arguments)]
fn run_worker(
    cmd: &Command,
    is_first: bool,
    is_last: bool,
    prev_read: RawFd,
    stage_read: RawFd,
    stage_write: RawFd,
    capture_read: RawFd,
    capture_write: RawFd,
    input_file: Option<&str>,
    output_file: Option<&str>,
    capture_output: bool,
) -> ! {
    unsafe {
        if libc::setpgid(0, libc::getppid()) != 0 {
            libc::_exit(1);
        }

        signal::reset_default_dispositions();

        if is_first {
            if let Some(path) = input_file {
                match open_file(path, libc::O_RDONLY, 0) {
                    Ok(fd) => {
                        if libc::dup2(fd, libc::STDIN_FILENO) < 0 {
                            libc::_exit(1);
                        }
                        close_fd(fd);
                    }
                    Err(_) => libc::_exit(1),
                }
            }
        } else if prev_read != libc::STDIN_FILENO {
            if libc::dup2(prev_read, libc::STDIN_FILENO) < 0 {
                libc::_exit(1);
            }
            close_fd(prev_read);
        }

        if is_last {
            if let Some(path) = output_file {
                match open_file(
                    path,
                    libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                    0o666,
                ) {
                    Ok(fd) => {
                        if libc::dup2(fd, libc::STDOUT_FILENO) < 0 {
                            libc::_exit(1);
                        }
                        close_fd(fd);
                    }
                    Err(_) => libc::_exit(1),
                }
            } else if capture_output && libc::dup2(capture_write, libc::STDOUT_FILENO) < 0 {
                libc::_exit(1);
            }
        } else if libc::dup2(stage_write, libc::STDOUT_FILENO) < 0 {
            libc::_exit(1);
        }

        close_fd(stage_read);
        close_fd(stage_write);
        close_fd(capture_read);
        close_fd(capture_write);

        let argv: Vec<CString> = match cmd
            .args
            .iter()
            .map(|a| CString::new(a.eval()))
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(v) if !v.is_empty() => v,
            _ => libc::_exit(1),
        };
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        libc::execvp(argv[0].as_ptr(), argv_ptrs.as_ptr());
        libc::_exit(127); // execvp only returns on failure
    }
}

fn make_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(JobError::SystemCallFailed(io::Error::last_os_error()));
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    if fd >= 0 {
        unsafe {
            libc::close(fd);
        }
    }
}

fn open_file(path: &str, flags: libc::c_int, mode: libc::mode_t) -> io::Result<RawFd> {
    let cpath = CString::new(path)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in path"))?;
    let fd = unsafe { libc::open(cpath.as_ptr(), flags, mode) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Configures the capture pipe's read end for non-blocking,
/// asynchronous-notification reads directed at `owner_pid`. Unlike the
/// original's two separate `F_SETFL` calls (the second silently drops
/// the first, since `F_SETFL` replaces rather than ORs flags), this
/// sets `O_NONBLOCK | O_ASYNC` in one call so both actually take effect.
fn configure_async_capture(fd: RawFd, owner_pid: libc::pid_t) -> io::Result<()> {
    unsafe {
        if libc::fcntl(fd, libc::F_SETOWN, owner_pid) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK | libc::O_ASYNC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
