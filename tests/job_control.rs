//! Black-box tests driving real `/bin` utilities through the public job
//! control API, mirroring the scenarios in spec.md §8. `init`/`fini` own
//! process-wide state (one job table, one pair of signal handlers), so
//! every test runs serialized under a single mutex rather than relying
//! on `cargo test`'s default thread-per-test parallelism.

use std::io::Cursor;
use std::sync::Mutex;

use mush_jobs::{Command, JobStatus, Pipeline};

static SERIAL: Mutex<()> = Mutex::new(());

struct Harness {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let _ = env_logger::try_init();
        let guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        mush_jobs::init().expect("init");
        Self { _guard: guard }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = mush_jobs::fini();
    }
}

fn words(cmd: &[&str]) -> Command {
    Command::from_words(cmd.iter().copied())
}

#[test]
fn echo_capture_round_trip() {
    let _h = Harness::new();
    let pipeline =
        Pipeline::new(vec![words(&["echo", "hello"])]).with_capture_output(true);
    let id = mush_jobs::run(pipeline).unwrap();

    let code = mush_jobs::wait(id).unwrap();
    assert_eq!(code, 0);
    assert_eq!(mush_jobs::get_output(id).unwrap(), b"hello\n");

    mush_jobs::expunge(id).unwrap();
    assert!(matches!(mush_jobs::poll(id), Err(e) if matches!(e, mush_jobs::JobError::NoSuchJob(_))));
}

#[test]
fn three_stage_pipeline_capture() {
    let _h = Harness::new();
    let pipeline = Pipeline::new(vec![
        words(&["echo", "a b c"]),
        words(&["tr", " ", "\n"]),
        words(&["sort"]),
    ])
    .with_capture_output(true);
    let id = mush_jobs::run(pipeline).unwrap();

    mush_jobs::wait(id).unwrap();
    assert_eq!(mush_jobs::get_output(id).unwrap(), b"a\nb\nc\n");
    assert_eq!(mush_jobs::poll(id).unwrap(), 0);
    mush_jobs::expunge(id).unwrap();
}

#[test]
fn input_and_output_file_redirection() {
    let _h = Harness::new();
    let dir = std::env::temp_dir();
    let out_path = dir.join(format!("mush-jobs-test-{}.out", std::process::id()));
    let _ = std::fs::remove_file(&out_path);

    let pipeline = Pipeline::new(vec![words(&["cat"])])
        .with_input_file("/dev/null")
        .with_output_file(out_path.to_str().unwrap());
    let id = mush_jobs::run(pipeline).unwrap();

    let code = mush_jobs::wait(id).unwrap();
    assert_eq!(code, 0);
    let contents = std::fs::read(&out_path).expect("output file created");
    assert!(contents.is_empty());

    mush_jobs::expunge(id).unwrap();
    let _ = std::fs::remove_file(&out_path);
}

#[test]
fn cancel_a_long_running_job() {
    let _h = Harness::new();
    let pipeline = Pipeline::new(vec![words(&["sleep", "30"])]);
    let id = mush_jobs::run(pipeline).unwrap();

    mush_jobs::cancel(id).unwrap();
    let start = std::time::Instant::now();
    mush_jobs::wait(id).unwrap();
    assert!(
        start.elapsed() < std::time::Duration::from_secs(1),
        "cancel should interrupt the sleep almost immediately"
    );

    mush_jobs::expunge(id).unwrap();
}

#[test]
fn cancel_after_completion_is_not_cancelled() {
    let _h = Harness::new();
    let pipeline = Pipeline::new(vec![words(&["true"])]);
    let id = mush_jobs::run(pipeline).unwrap();
    mush_jobs::wait(id).unwrap();

    // Completed before the cancel signal could possibly land.
    assert!(mush_jobs::cancel(id).is_err());
    mush_jobs::expunge(id).unwrap();
}

#[test]
fn false_command_aborts_with_nonzero_status() {
    let _h = Harness::new();
    let pipeline = Pipeline::new(vec![words(&["false"])]);
    let id = mush_jobs::run(pipeline).unwrap();

    let code = mush_jobs::wait(id).unwrap();
    assert_ne!(code, 0);
    mush_jobs::expunge(id).unwrap();
}

#[test]
fn self_sigterm_aborts_not_cancels() {
    let _h = Harness::new();
    let pipeline = Pipeline::new(vec![words(&["sh", "-c", "kill -TERM $$"])]);
    let id = mush_jobs::run(pipeline).unwrap();

    mush_jobs::wait(id).unwrap();
    assert_eq!(mush_jobs::status(id).unwrap(), mush_jobs::JobStatus::Aborted);
    mush_jobs::expunge(id).unwrap();
}

#[test]
fn second_cancel_is_an_error() {
    let _h = Harness::new();
    let pipeline = Pipeline::new(vec![words(&["sleep", "5"])]);
    let id = mush_jobs::run(pipeline).unwrap();

    mush_jobs::cancel(id).unwrap();
    assert!(mush_jobs::cancel(id).is_err());

    mush_jobs::wait(id).unwrap();
    mush_jobs::expunge(id).unwrap();
}

#[test]
fn expunge_before_termination_is_an_error() {
    let _h = Harness::new();
    let pipeline = Pipeline::new(vec![words(&["sleep", "5"])]);
    let id = mush_jobs::run(pipeline).unwrap();

    assert!(mush_jobs::expunge(id).is_err());

    mush_jobs::cancel(id).unwrap();
    mush_jobs::wait(id).unwrap();
    mush_jobs::expunge(id).unwrap();
}

#[test]
fn job_ids_are_monotonic_and_show_lists_in_order() {
    let _h = Harness::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = mush_jobs::run(Pipeline::new(vec![words(&["true"])])).unwrap();
        mush_jobs::wait(id).unwrap();
        ids.push(id);
    }
    assert!(ids.windows(2).all(|w| w[1] > w[0]));

    let mut buf = Cursor::new(Vec::new());
    mush_jobs::show(&mut buf).unwrap();
    let text = String::from_utf8(buf.into_inner()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    for (line, id) in lines.iter().zip(ids.iter()) {
        assert!(line.starts_with(&format!("{id}\t")));
    }

    for id in ids {
        mush_jobs::expunge(id).unwrap();
    }
}

#[test]
fn poll_is_not_terminated_then_sticky_after_wait() {
    let _h = Harness::new();
    let id = mush_jobs::run(Pipeline::new(vec![words(&["sleep", "1"])])).unwrap();
    assert!(mush_jobs::poll(id).is_err());

    let code = mush_jobs::wait(id).unwrap();
    assert_eq!(mush_jobs::poll(id).unwrap(), code);
    assert_eq!(mush_jobs::poll(id).unwrap(), code);

    mush_jobs::expunge(id).unwrap();
}

#[test]
fn stress_many_short_capturing_pipelines() {
    let _h = Harness::new();
    let mut ids = Vec::new();
    for i in 0..50 {
        let pipeline = Pipeline::new(vec![words(&["echo", "n"])])
            .with_capture_output(true);
        let id = mush_jobs::run(pipeline).unwrap();
        ids.push((i, id));
    }

    for (_, id) in &ids {
        mush_jobs::wait(*id).unwrap();
        assert_eq!(mush_jobs::get_output(*id).unwrap(), b"n\n");
    }
    for (_, id) in ids {
        mush_jobs::expunge(id).unwrap();
    }
}

#[test]
fn status_enum_matches_observed_terminal_outcomes() {
    let _h = Harness::new();

    let completed = mush_jobs::run(Pipeline::new(vec![words(&["true"])])).unwrap();
    mush_jobs::wait(completed).unwrap();

    let aborted = mush_jobs::run(Pipeline::new(vec![words(&["false"])])).unwrap();
    mush_jobs::wait(aborted).unwrap();

    let cancelled = mush_jobs::run(Pipeline::new(vec![words(&["sleep", "30"])])).unwrap();
    mush_jobs::cancel(cancelled).unwrap();
    mush_jobs::wait(cancelled).unwrap();

    assert_eq!(mush_jobs::status(completed).unwrap(), JobStatus::Completed);
    assert_eq!(mush_jobs::status(aborted).unwrap(), JobStatus::Aborted);
    assert_eq!(mush_jobs::status(cancelled).unwrap(), JobStatus::Cancelled);

    mush_jobs::expunge(completed).unwrap();
    mush_jobs::expunge(aborted).unwrap();
    mush_jobs::expunge(cancelled).unwrap();
}
