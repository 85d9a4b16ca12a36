use std::os::unix::io::RawFd;

use crate::capture::CaptureBuffer;
use crate::pipeline::Pipeline;

/// Monotonically assigned, process-unique job identifier.
pub type JobId = i64;

/// The lifecycle state of a job. Once a job reaches a terminal status it
/// is never mutated again (invariant 1 in spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    New,
    Running,
    Completed,
    Aborted,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Aborted | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::New => "new",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Aborted => "aborted",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One entry in the job table.
pub struct JobRecord {
    pub job_id: JobId,
    pub pgid: libc::pid_t,
    pub status: JobStatus,
    /// Set by `cancel`; orthogonal to `status` until the reaper confirms
    /// the leader actually died of the cancellation signal.
    pub cancel_requested: bool,
    pub exit_status: i32,
    pub capture_fd: Option<RawFd>,
    pub pipeline: Pipeline,
    pub captured_output: CaptureBuffer,
    /// The pipeline's display text, evaluated exactly once at launch
    /// time. `show` prints this rather than re-rendering `pipeline`, so
    /// it never re-evaluates an `Arg::Expr` after launch.
    pub rendered: String,
}

impl JobRecord {
    pub fn has_capture(&self) -> bool {
        self.capture_fd.is_some()
    }
}

/// Ordered collection of job records keyed by job id.
///
/// A plain `Vec` is sufficient per the design notes: the doubly-linked
/// sentinel list in the original is an implementation detail, not a
/// contract — insertion order and an O(n) scan by id satisfy every
/// testable property in spec.md §8. The table itself carries no
/// synchronization; callers (`launcher`/`reaper`) are required to hold
/// the process signal mask at "all blocked" for the duration of any
/// mutation, which is the crate's sole concurrency primitive (spec.md
/// §5).
pub struct JobTable {
    records: Vec<JobRecord>,
    next_id: JobId,
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_id: 0,
        }
    }

    /// Insert a new `Running` record, returning its freshly assigned id.
    pub fn insert(
        &mut self,
        pgid: libc::pid_t,
        pipeline: Pipeline,
        capture_fd: Option<RawFd>,
        rendered: String,
    ) -> JobId {
        let job_id = self.next_id;
        self.next_id += 1;
        self.records.push(JobRecord {
            job_id,
            pgid,
            status: JobStatus::Running,
            cancel_requested: false,
            exit_status: -1,
            capture_fd,
            pipeline,
            captured_output: CaptureBuffer::new(),
            rendered,
        });
        job_id
    }

    pub fn find(&self, job_id: JobId) -> Option<&JobRecord> {
        self.records.iter().find(|r| r.job_id == job_id)
    }

    pub fn find_mut(&mut self, job_id: JobId) -> Option<&mut JobRecord> {
        self.records.iter_mut().find(|r| r.job_id == job_id)
    }

    /// Used by the child-termination handler, which only knows the
    /// reaped pid (equal to the job's pgid, since the leader is the only
    /// direct child of the shell).
    pub fn find_by_pgid_mut(&mut self, pgid: libc::pid_t) -> Option<&mut JobRecord> {
        self.records.iter_mut().find(|r| r.pgid == pgid)
    }

    /// Removes and returns the record with the given id, preserving the
    /// insertion order of the remaining entries.
    pub fn remove(&mut self, job_id: JobId) -> Option<JobRecord> {
        let idx = self.records.iter().position(|r| r.job_id == job_id)?;
        Some(self.records.remove(idx))
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.iter()
    }

    /// Iterate mutably in insertion order (used by the I/O-ready handler
    /// to drain every capture fd per signal).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut JobRecord> {
        self.records.iter_mut()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.records.iter().map(|r| r.job_id).collect()
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(vec![crate::pipeline::Command::from_words(["true"])])
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let mut table = JobTable::new();
        let a = table.insert(100, pipeline(), None, "true".into());
        let b = table.insert(101, pipeline(), None, "true".into());
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn traversal_follows_insertion_order() {
        let mut table = JobTable::new();
        let ids: Vec<_> = (0..5)
            .map(|i| table.insert(100 + i, pipeline(), None, "true".into()))
            .collect();
        let seen: Vec<_> = table.iter().map(|r| r.job_id).collect();
        assert_eq!(seen, ids);
    }

    #[test]
    fn remove_unlinks_without_reordering_the_rest() {
        let mut table = JobTable::new();
        let a = table.insert(1, pipeline(), None, "true".into());
        let b = table.insert(2, pipeline(), None, "true".into());
        let c = table.insert(3, pipeline(), None, "true".into());
        table.remove(b).unwrap();
        let seen: Vec<_> = table.iter().map(|r| r.job_id).collect();
        assert_eq!(seen, vec![a, c]);
        assert!(table.find(b).is_none());
    }

    #[test]
    fn find_by_pgid_locates_the_right_record() {
        let mut table = JobTable::new();
        table.insert(11, pipeline(), None, "true".into());
        let id = table.insert(22, pipeline(), None, "true".into());
        let found = table.find_by_pgid_mut(22).unwrap();
        assert_eq!(found.job_id, id);
    }
}
