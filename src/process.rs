//! Data structures for tracking job state.
//!
//! This module defines the definition of a command (`CommandDefinition`), its
//! current lifecycle status (`JobStatus`), and the per-command record
//! (`JobHandle`) that owns its output history.

use std::fmt;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::output::OutputBuffer;

/// Group assigned to commands that do not name one.
pub const DEFAULT_GROUP: &str = "Default";

/// A command the supervisor is allowed to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    /// Unique name of the command.
    pub name: String,
    /// Command line handed to the shell.
    pub cmd: String,
    /// Labels the command is listed under.
    pub groups: Vec<String>,
    /// Whether the command is started when the panel opens.
    pub autostart: bool,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            groups: vec![DEFAULT_GROUP.to_string()],
            autostart: false,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        if self.groups.is_empty() {
            self.groups.push(DEFAULT_GROUP.to_string());
        }
        self
    }
}

/// The lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// A process is alive for this job.
    Running,
    /// Never started, or stopped on request.
    Stopped,
    /// The process exited with code 0.
    Exited,
    /// The process exited with a nonzero code or was killed by a signal.
    Failed,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Exited => "exited",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Supervised state of one command.
///
/// A handle is created on the first successful start and lives for the rest
/// of the session; only the process behind it changes.
#[derive(Debug)]
pub struct JobHandle {
    pub name: String,
    /// OS process id, present only while running.
    pub pid: Option<u32>,
    pub status: JobStatus,
    /// Exit code, present only when exited or failed.
    pub exit_code: Option<i32>,
    pub started_at: Option<Instant>,
    pub output: OutputBuffer,
    /// Incremented on every spawn; identifies the current run.
    pub(crate) generation: u64,
    pub(crate) kill_tx: Option<oneshot::Sender<()>>,
    pub(crate) pending_restart: Option<JoinHandle<()>>,
    /// Identifies the most recently scheduled restart.
    pub(crate) restart_token: u64,
    /// The last spawned process has not been reaped yet, even if the job
    /// already reads `Stopped`.
    pub(crate) process_live: bool,
    /// Spawn as soon as the previous process has been reaped.
    pub(crate) deferred_start: bool,
}

impl JobHandle {
    pub fn new(name: impl Into<String>, max_lines: usize) -> Self {
        Self {
            name: name.into(),
            pid: None,
            status: JobStatus::Stopped,
            exit_code: None,
            started_at: None,
            output: OutputBuffer::new(max_lines),
            generation: 0,
            kill_tx: None,
            pending_restart: None,
            restart_token: 0,
            process_live: false,
            deferred_start: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Records a freshly spawned process.
    pub(crate) fn mark_started(&mut self, pid: Option<u32>, kill_tx: oneshot::Sender<()>) -> u64 {
        self.generation += 1;
        self.pid = pid;
        self.status = JobStatus::Running;
        self.exit_code = None;
        self.started_at = Some(Instant::now());
        self.kill_tx = Some(kill_tx);
        self.process_live = true;
        self.deferred_start = false;
        self.generation
    }

    /// Records that the watcher of the current run has finished.
    ///
    /// Returns whether a start was deferred until this point.
    pub(crate) fn mark_reaped(&mut self) -> bool {
        self.process_live = false;
        std::mem::take(&mut self.deferred_start)
    }

    /// Records the exit of the current run.
    pub(crate) fn mark_exited(&mut self, code: i32) {
        self.pid = None;
        self.kill_tx = None;
        self.exit_code = Some(code);
        self.status = if code == 0 {
            JobStatus::Exited
        } else {
            JobStatus::Failed
        };
    }

    /// Moves a running job to `Stopped` and hands back the termination trigger.
    pub(crate) fn mark_stopped(&mut self) -> Option<oneshot::Sender<()>> {
        self.pid = None;
        self.exit_code = None;
        self.status = JobStatus::Stopped;
        self.kill_tx.take()
    }

    /// Whether a delayed restart or a deferred start is waiting to spawn.
    pub fn start_pending(&self) -> bool {
        self.pending_restart.is_some() || self.deferred_start
    }

    /// Aborts a pending delayed restart and drops a deferred start.
    /// Returns whether either was pending.
    pub(crate) fn cancel_pending_start(&mut self) -> bool {
        let deferred = std::mem::take(&mut self.deferred_start);
        match self.pending_restart.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => deferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_selects_status() {
        let mut job = JobHandle::new("build", 10);
        let (tx, _rx) = oneshot::channel();
        job.mark_started(Some(42), tx);
        assert!(job.is_running());
        job.mark_exited(0);
        assert_eq!(job.status, JobStatus::Exited);
        assert_eq!(job.exit_code, Some(0));
        assert_eq!(job.pid, None);

        let (tx, _rx) = oneshot::channel();
        job.mark_started(Some(43), tx);
        assert_eq!(job.exit_code, None);
        job.mark_exited(2);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(2));
    }

    #[test]
    fn generation_advances_per_spawn() {
        let mut job = JobHandle::new("web", 10);
        let (tx, _rx) = oneshot::channel();
        assert_eq!(job.mark_started(None, tx), 1);
        assert!(job.mark_stopped().is_some());
        assert_eq!(job.status, JobStatus::Stopped);
        let (tx, _rx) = oneshot::channel();
        assert_eq!(job.mark_started(None, tx), 2);
    }

    #[test]
    fn stopped_job_stays_live_until_reaped() {
        let mut job = JobHandle::new("web", 10);
        let (tx, _rx) = oneshot::channel();
        job.mark_started(Some(7), tx);
        job.mark_stopped();
        assert!(job.process_live);
        job.deferred_start = true;
        assert!(job.start_pending());
        assert!(job.mark_reaped());
        assert!(!job.process_live);
        assert!(!job.start_pending());
        assert!(!job.mark_reaped());
    }

    #[test]
    fn cancel_drops_deferred_start() {
        let mut job = JobHandle::new("web", 10);
        assert!(!job.cancel_pending_start());
        job.deferred_start = true;
        assert!(job.cancel_pending_start());
        assert!(!job.deferred_start);
    }

    #[test]
    fn empty_groups_fall_back_to_default() {
        let def = CommandDefinition::new("lint", "cargo clippy").with_groups(Vec::<String>::new());
        assert_eq!(def.groups, vec![DEFAULT_GROUP]);
    }
}
