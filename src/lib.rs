//! Job-control core for Mush, a small interactive shell.
//!
//! This crate owns the hardest part of the shell: launching pipelines of
//! external programs as asynchronous jobs, tracking their lifecycles
//! through signal-driven state changes, capturing a pipeline's tail
//! output where requested, and exposing operations to wait, poll,
//! cancel, expunge, and enumerate jobs. Parsing, the program-line store,
//! the variable store, and the REPL are external collaborators — this
//! crate only understands a [`Pipeline`] and a [`JobId`].
//!
//! ```no_run
//! use mush_jobs::{Command, Pipeline};
//!
//! mush_jobs::init().unwrap();
//! let pipeline = Pipeline::new(vec![Command::from_words(["echo", "hello"])])
//!     .with_capture_output(true);
//! let id = mush_jobs::run(pipeline).unwrap();
//! mush_jobs::wait(id).unwrap();
//! assert_eq!(mush_jobs::get_output(id).unwrap(), b"hello\n");
//! mush_jobs::expunge(id).unwrap();
//! mush_jobs::fini().unwrap();
//! ```
//!
//! Unix-only: the design rests on process groups, pipes, and the child-
//! termination signal, which spec.md §1 explicitly scopes out
//! portability beyond.

mod capture;
mod errno;
mod error;
mod launcher;
mod pipeline;
mod reaper;
mod signal;
mod state;
mod status;
mod table;

pub use error::{JobError, Result};
pub use pipeline::{Arg, Command, Evaluate, Literal, Pipeline};
pub use table::{JobId, JobStatus};

/// Initializes job control: installs the `SIGCHLD`/`SIGIO` handlers and
/// creates the job table. Must be called exactly once before any other
/// function in this crate. Idempotent.
pub fn init() -> Result<()> {
    reaper::init()
}

/// Cancels every non-terminal job, waits for each, and expunges all.
/// Must be called exactly once when job processing is to end. No
/// further operation is valid afterward (short of calling `init` again).
pub fn fini() -> Result<()> {
    reaper::fini()
}

/// Launches `pipeline` as a new job, returning its id.
pub fn run(pipeline: Pipeline) -> Result<JobId> {
    launcher::run(pipeline)
}

/// Blocks until `job_id` reaches a terminal status, returning its
/// decoded exit code.
pub fn wait(job_id: JobId) -> Result<i32> {
    reaper::wait(job_id)
}

/// Returns immediately with the decoded exit code if `job_id` is
/// terminal, or an error if it is still running or unknown.
pub fn poll(job_id: JobId) -> Result<i32> {
    reaper::poll(job_id)
}

/// Returns `job_id`'s current [`JobStatus`], terminal or not.
pub fn status(job_id: JobId) -> Result<JobStatus> {
    reaper::status(job_id)
}

/// Requests cancellation of `job_id`. Returns immediately; call `wait`
/// to observe the eventual transition.
pub fn cancel(job_id: JobId) -> Result<()> {
    reaper::cancel(job_id)
}

/// Expunges a terminated job, freeing its resources and forgetting its
/// id.
pub fn expunge(job_id: JobId) -> Result<()> {
    reaper::expunge(job_id)
}

/// Returns the bytes captured so far for `job_id`.
pub fn get_output(job_id: JobId) -> Result<Vec<u8>> {
    reaper::get_output(job_id)
}

/// Writes one line per job (in insertion order) to `out`.
pub fn show(out: &mut dyn std::io::Write) -> Result<()> {
    reaper::show(out)
}

/// Blocks until any signal is delivered.
pub fn pause() {
    reaper::pause()
}
