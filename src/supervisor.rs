//! Process supervision.
//!
//! This module contains the `Supervisor`, the registry and control surface for
//! configured commands. It spawns commands through a shell, forwards their
//! stdout and stderr into each job's `OutputBuffer`, and records lifecycle
//! transitions as processes exit. All job state lives behind one mutex that is
//! never held across an await, so control calls from the panel thread and
//! events from background tasks are serialized.

use std::collections::HashMap;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::output::DEFAULT_MAX_LINES;
use crate::process::{CommandDefinition, JobHandle, JobStatus};

const READ_CHUNK: usize = 8 * 1024;
// Grandchildren may keep the pipes open after the shell exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);
const MARKER_PREFIX: &str = "[runpanel]";

/// Errors returned by supervisor control operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The OS refused to create the process.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    /// No live process exists for the job.
    #[error("{0} is not running")]
    NotRunning(String),
    /// No command with this name is configured.
    #[error("unknown command: {0}")]
    InvalidName(String),
}

/// Shell used to interpret command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub program: String,
    pub flag: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                program: "cmd".to_string(),
                flag: "/C".to_string(),
            }
        } else {
            Self {
                program: "sh".to_string(),
                flag: "-c".to_string(),
            }
        }
    }
}

/// Tunables for a supervisor instance.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Lines kept per command.
    pub max_lines: usize,
    /// Grace delay between stopping and respawning on restart.
    pub restart_delay: Duration,
    pub shell: ShellConfig,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            restart_delay: Duration::from_millis(150),
            shell: ShellConfig::default(),
        }
    }
}

/// Point-in-time view of one configured command, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub name: String,
    pub groups: Vec<String>,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub uptime: Option<Duration>,
    pub last_line: Option<String>,
    pub line_count: usize,
    pub restart_pending: bool,
}

/// Outcome of `Supervisor::stop_all`.
#[derive(Debug, Default)]
pub struct StopAllReport {
    /// Jobs that were signalled or had a pending start cancelled.
    pub stopped: Vec<String>,
    /// Jobs whose stop could not be delivered.
    pub failed: Vec<(String, SupervisorError)>,
}

/// Shared handle to the job registry.
///
/// Cloning is cheap; all clones control the same set of jobs.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    definitions: Vec<CommandDefinition>,
    restart_delay: Duration,
    shell: ShellConfig,
    max_lines: AtomicUsize,
    jobs: Mutex<HashMap<String, JobHandle>>,
    // Spawned processes not yet reaped by their watcher.
    live: AtomicUsize,
    runtime: Handle,
}

impl Supervisor {
    /// Creates a supervisor for the given commands.
    ///
    /// Background tasks (output readers, exit watchers, delayed restarts) are
    /// spawned onto `runtime`, so control methods may be called from threads
    /// outside of it.
    pub fn new(
        definitions: Vec<CommandDefinition>,
        settings: SupervisorSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                definitions,
                restart_delay: settings.restart_delay,
                shell: settings.shell,
                max_lines: AtomicUsize::new(settings.max_lines.max(1)),
                jobs: Mutex::new(HashMap::new()),
                live: AtomicUsize::new(0),
                runtime,
            }),
        }
    }

    fn definition(&self, name: &str) -> Result<&CommandDefinition, SupervisorError> {
        self.inner
            .definitions
            .iter()
            .find(|def| def.name == name)
            .ok_or_else(|| SupervisorError::InvalidName(name.to_string()))
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobHandle>> {
        self.inner
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a command.
    ///
    /// Starting a job that is already running is a no-op. If the previous run
    /// was stopped but its process has not exited yet, the spawn is deferred
    /// until it has. Returns without waiting either way.
    pub fn start(&self, name: &str) -> Result<(), SupervisorError> {
        let def = self.definition(name)?;
        let mut jobs = self.jobs();
        if let Some(job) = jobs.get_mut(name) {
            if job.deferred_start {
                debug!(job = %name, "start already waiting for previous run");
                return Ok(());
            }
            if job.cancel_pending_start() {
                debug!(job = %name, "pending start superseded by start");
            }
            if job.is_running() {
                debug!(job = %name, "start ignored, already running");
                return Ok(());
            }
            if job.process_live {
                defer_start(job);
                return Ok(());
            }
        }
        self.spawn_locked(&mut jobs, def, None)
    }

    /// Requests termination of a running command without waiting for it.
    ///
    /// A restart that is still waiting out its grace delay is cancelled instead.
    pub fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        self.definition(name)?;
        let mut jobs = self.jobs();
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;
        if job.cancel_pending_start() {
            job.output
                .append_marker([marker("pending start cancelled")]);
            info!(job = %name, "pending start cancelled");
            return Ok(());
        }
        if !job.is_running() {
            return Err(SupervisorError::NotRunning(name.to_string()));
        }
        if signal_stop(job)? == StopRequest::Signalled {
            job.output.append_marker([marker("stopped")]);
        }
        Ok(())
    }

    /// Stops a running command and starts it again after the grace delay.
    ///
    /// A job with no live process is started immediately. Requesting another
    /// restart while one is pending resets the delay.
    pub fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        let def = self.definition(name)?;
        let delay = self.inner.restart_delay;
        let mut jobs = self.jobs();
        let active = jobs
            .get(name)
            .is_some_and(|job| job.process_live || job.start_pending());
        if !active {
            return self.spawn_locked(&mut jobs, def, Some(marker("restarting")));
        }
        let Some(job) = jobs.get_mut(name) else {
            return Ok(());
        };

        job.cancel_pending_start();
        if job.is_running() {
            if let Err(err) = signal_stop(job) {
                debug!(job = %name, error = %err, "restart could not signal old run");
            }
        }
        job.output.append_marker([marker(&format!(
            "restarting in {}ms",
            delay.as_millis()
        ))]);
        job.restart_token += 1;
        let token = job.restart_token;
        let supervisor = self.clone();
        let job_name = name.to_string();
        job.pending_restart = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            supervisor.complete_restart(&job_name, token);
        }));
        info!(job = %name, delay_ms = delay.as_millis() as u64, "restart scheduled");
        Ok(())
    }

    fn complete_restart(&self, name: &str, token: u64) {
        let Ok(def) = self.definition(name) else {
            return;
        };
        let mut jobs = self.jobs();
        let Some(job) = jobs.get_mut(name) else {
            return;
        };
        if job.restart_token != token || job.pending_restart.is_none() {
            return;
        }
        job.pending_restart = None;
        if job.process_live {
            defer_start(job);
            return;
        }
        self.spawn_pending(&mut jobs, def);
    }

    // Spawns a start that was scheduled earlier; failures only reach the output.
    fn spawn_pending(&self, jobs: &mut HashMap<String, JobHandle>, def: &CommandDefinition) {
        if let Err(err) = self.spawn_locked(jobs, def, None) {
            warn!(job = %def.name, error = %err, "restart failed");
            if let Some(job) = jobs.get_mut(&def.name) {
                job.output
                    .append_marker([marker(&format!("restart failed: {}", err))]);
            }
        }
    }

    /// Stops every running job. Individual failures do not stop the sweep.
    pub fn stop_all(&self) -> StopAllReport {
        let mut report = StopAllReport::default();
        let mut jobs = self.jobs();
        for def in &self.inner.definitions {
            let Some(job) = jobs.get_mut(&def.name) else {
                continue;
            };
            let cancelled = job.cancel_pending_start();
            let outcome = if job.is_running() {
                signal_stop(job)
            } else {
                Ok(StopRequest::Exiting)
            };
            match outcome {
                Ok(StopRequest::Signalled) => {
                    job.output.append_marker([marker("stopped")]);
                    report.stopped.push(def.name.clone());
                }
                Ok(StopRequest::Exiting) if cancelled => {
                    job.output
                        .append_marker([marker("pending start cancelled")]);
                    report.stopped.push(def.name.clone());
                }
                Ok(StopRequest::Exiting) => {}
                Err(err) => report.failed.push((def.name.clone(), err)),
            }
        }
        if !report.stopped.is_empty() {
            info!(count = report.stopped.len(), "stopped all jobs");
        }
        report
    }

    /// Returns the current status of a command; never-started commands are `Stopped`.
    pub fn status(&self, name: &str) -> Result<JobStatus, SupervisorError> {
        self.definition(name)?;
        Ok(self
            .jobs()
            .get(name)
            .map(|job| job.status)
            .unwrap_or(JobStatus::Stopped))
    }

    /// Returns a copy of a command's output, or `None` if it was never started.
    pub fn output_snapshot(&self, name: &str) -> Option<Vec<String>> {
        self.jobs().get(name).map(|job| job.output.snapshot())
    }

    /// Summarizes every configured command in config order.
    pub fn overview(&self) -> Vec<JobSummary> {
        let jobs = self.jobs();
        self.inner
            .definitions
            .iter()
            .map(|def| {
                let job = jobs.get(&def.name);
                JobSummary {
                    name: def.name.clone(),
                    groups: def.groups.clone(),
                    status: job.map(|j| j.status).unwrap_or(JobStatus::Stopped),
                    exit_code: job.and_then(|j| j.exit_code),
                    pid: job.and_then(|j| j.pid),
                    uptime: job
                        .filter(|j| j.is_running())
                        .and_then(|j| j.started_at)
                        .map(|at| at.elapsed()),
                    last_line: job.and_then(|j| j.output.last().map(str::to_string)),
                    line_count: job.map(|j| j.output.len()).unwrap_or(0),
                    restart_pending: job.is_some_and(|j| j.start_pending()),
                }
            })
            .collect()
    }

    /// Changes the per-command line cap; buffers apply it on their next append.
    pub fn set_max_lines(&self, max_lines: usize) {
        let max_lines = max_lines.max(1);
        self.inner.max_lines.store(max_lines, Ordering::SeqCst);
        for job in self.jobs().values_mut() {
            job.output.set_max_lines(max_lines);
        }
    }

    /// Stops everything and waits up to `timeout` for the processes to exit.
    pub async fn shutdown(&self, timeout: Duration) -> StopAllReport {
        let report = self.stop_all();
        let deadline = Instant::now() + timeout;
        while self.inner.live.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let remaining = self.inner.live.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(remaining, "processes still alive after shutdown timeout");
        }
        report
    }

    fn spawn_locked(
        &self,
        jobs: &mut HashMap<String, JobHandle>,
        def: &CommandDefinition,
        banner: Option<String>,
    ) -> Result<(), SupervisorError> {
        let _guard = self.inner.runtime.enter();
        let mut child = self.command_for(def).spawn().map_err(|source| {
            warn!(job = %def.name, error = %source, "spawn failed");
            SupervisorError::Spawn {
                name: def.name.clone(),
                source,
            }
        })?;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let max_lines = self.inner.max_lines.load(Ordering::SeqCst);
        let job = jobs
            .entry(def.name.clone())
            .or_insert_with(|| JobHandle::new(def.name.clone(), max_lines));
        let generation = job.mark_started(pid, kill_tx);
        job.output.append_marker(
            banner
                .into_iter()
                .chain([marker(&format!("started: {}", def.cmd))]),
        );

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_output(
                self.clone(),
                def.name.clone(),
                generation,
                stdout,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_output(
                self.clone(),
                def.name.clone(),
                generation,
                stderr,
            )));
        }
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(watch_exit(
            self.clone(),
            def.name.clone(),
            generation,
            child,
            kill_rx,
            readers,
        ));
        info!(job = %def.name, pid = ?pid, generation, "started");
        Ok(())
    }

    fn command_for(&self, def: &CommandDefinition) -> Command {
        let shell = &self.inner.shell;
        let mut command = Command::new(&shell.program);
        command
            .arg(&shell.flag)
            .arg(&def.cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        command
    }

    // Output of a run that has been superseded is dropped.
    fn append_output(&self, name: &str, generation: u64, chunk: &[u8]) {
        if let Some(job) = self.jobs().get_mut(name) {
            if job.generation == generation {
                job.output.append(chunk);
            }
        }
    }

    fn finish_run(&self, name: &str, generation: u64, status: io::Result<ExitStatus>) {
        let mut jobs = self.jobs();
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        let Some(job) = jobs.get_mut(name) else {
            return;
        };
        if job.generation != generation {
            debug!(job = %name, generation, "superseded run exited");
            return;
        }
        job.output.flush_partial();
        if job.is_running() {
            record_exit(job, status);
        } else {
            debug!(job = %name, generation, "stopped run exited");
        }
        if job.mark_reaped() {
            if let Ok(def) = self.definition(name) {
                self.spawn_pending(&mut jobs, def);
            }
        }
    }
}

fn record_exit(job: &mut JobHandle, status: io::Result<ExitStatus>) {
    match status {
        Ok(status) => {
            let code = exit_code(status);
            job.mark_exited(code);
            let text = if code == 0 {
                "process ended successfully".to_string()
            } else {
                format!("process ended with code {}", code)
            };
            job.output.append_marker([marker(&text)]);
            info!(job = %job.name, code, "exited");
        }
        Err(err) => {
            warn!(job = %job.name, error = %err, "failed to wait for process");
            job.mark_exited(-1);
            job.output
                .append_marker([marker(&format!("process lost: {}", err))]);
        }
    }
}

fn marker(text: &str) -> String {
    format!("{} {}", MARKER_PREFIX, text)
}

fn defer_start(job: &mut JobHandle) {
    job.deferred_start = true;
    job.output
        .append_marker([marker("waiting for previous run to exit")]);
    info!(job = %job.name, "start deferred until previous run exits");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    /// The job moved to `Stopped` and its watcher was told to terminate.
    Signalled,
    /// The process already exited; its watcher will record the outcome.
    Exiting,
}

fn signal_stop(job: &mut JobHandle) -> Result<StopRequest, SupervisorError> {
    match &job.kill_tx {
        None => return Err(SupervisorError::NotRunning(job.name.clone())),
        Some(kill_tx) if kill_tx.is_closed() => {
            debug!(job = %job.name, "stop ignored, process already exiting");
            return Ok(StopRequest::Exiting);
        }
        Some(_) => {}
    }
    let pid = job.pid;
    if let Some(kill_tx) = job.mark_stopped() {
        // A send that loses the race with the exit still leaves the job stopped.
        let _ = kill_tx.send(());
    }
    info!(job = %job.name, pid = ?pid, "stop requested");
    Ok(StopRequest::Signalled)
}

async fn watch_exit(
    supervisor: Supervisor,
    name: String,
    generation: u64,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    readers: Vec<tokio::task::JoinHandle<()>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            terminate(&mut child);
            child.wait().await
        }
    };
    for reader in readers {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
            debug!(job = %name, "output still open after exit");
        }
    }
    supervisor.finish_run(&name, generation, status);
}

async fn forward_output<R>(supervisor: Supervisor, name: String, generation: u64, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => supervisor.append_output(&name, generation, &buf[..n]),
            Err(err) => {
                debug!(job = %name, error = %err, "output stream closed");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    unsafe {
        let pid = pid as i32;
        let _ = libc::kill(-pid, libc::SIGTERM);
        let _ = libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(commands: &[(&str, &str)]) -> Supervisor {
        supervisor_with(commands, SupervisorSettings::default())
    }

    fn supervisor_with(commands: &[(&str, &str)], settings: SupervisorSettings) -> Supervisor {
        let defs = commands
            .iter()
            .map(|(name, cmd)| CommandDefinition::new(*name, *cmd))
            .collect();
        Supervisor::new(defs, settings, Handle::current())
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    fn status(sup: &Supervisor, name: &str) -> JobStatus {
        sup.status(name).unwrap()
    }

    fn last_exit(sup: &Supervisor, name: &str) -> Option<i32> {
        sup.overview()
            .into_iter()
            .find(|job| job.name == name)
            .and_then(|job| job.exit_code)
    }

    fn live(sup: &Supervisor) -> usize {
        sup.inner.live.load(Ordering::SeqCst)
    }

    fn generation(sup: &Supervisor, name: &str) -> u64 {
        sup.jobs().get(name).map(|job| job.generation).unwrap_or(0)
    }

    fn output_contains(sup: &Supervisor, name: &str, needle: &str) -> bool {
        sup.output_snapshot(name)
            .map(|lines| lines.iter().any(|line| line == needle))
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn echo_exits_cleanly_with_output() {
        let sup = supervisor(&[("build", "echo hi")]);
        sup.start("build").unwrap();
        assert!(wait_until(|| status(&sup, "build") == JobStatus::Exited).await);
        assert_eq!(last_exit(&sup, "build"), Some(0));
        let lines = sup.output_snapshot("build").unwrap();
        assert_eq!(lines.first().unwrap(), "[runpanel] started: echo hi");
        assert!(lines.iter().any(|line| line == "hi"));
        assert_eq!(
            lines.last().unwrap(),
            "[runpanel] process ended successfully"
        );
    }

    #[tokio::test]
    async fn nonzero_exit_marks_failed() {
        let sup = supervisor(&[("lint", "exit 3")]);
        sup.start("lint").unwrap();
        assert!(wait_until(|| status(&sup, "lint") == JobStatus::Failed).await);
        assert_eq!(last_exit(&sup, "lint"), Some(3));
        let summary = &sup.overview()[0];
        assert_eq!(summary.exit_code, Some(3));
        assert_eq!(summary.pid, None);
    }

    #[tokio::test]
    async fn stderr_shares_the_buffer() {
        let sup = supervisor(&[("mixed", "echo out; echo err 1>&2")]);
        sup.start("mixed").unwrap();
        assert!(wait_until(|| status(&sup, "mixed") == JobStatus::Exited).await);
        assert!(output_contains(&sup, "mixed", "out"));
        assert!(output_contains(&sup, "mixed", "err"));
    }

    #[tokio::test]
    async fn unterminated_last_line_is_kept() {
        let sup = supervisor(&[("printf", "printf 'no newline'")]);
        sup.start("printf").unwrap();
        assert!(wait_until(|| status(&sup, "printf") == JobStatus::Exited).await);
        let lines = sup.output_snapshot("printf").unwrap();
        let idx = lines.iter().position(|l| l == "no newline").unwrap();
        assert_eq!(idx, lines.len() - 2);
    }

    #[tokio::test]
    async fn output_is_bounded() {
        let sup = supervisor_with(
            &[("count", "seq 1 50")],
            SupervisorSettings {
                max_lines: 5,
                ..SupervisorSettings::default()
            },
        );
        sup.start("count").unwrap();
        assert!(wait_until(|| status(&sup, "count") == JobStatus::Exited).await);
        assert_eq!(
            sup.output_snapshot("count").unwrap(),
            vec![
                "47",
                "48",
                "49",
                "50",
                "[runpanel] process ended successfully"
            ]
        );
    }

    #[tokio::test]
    async fn lowered_cap_applies_to_running_jobs() {
        let sup = supervisor(&[("tail", "seq 1 10; sleep 0.3; echo done")]);
        sup.start("tail").unwrap();
        assert!(wait_until(|| output_contains(&sup, "tail", "10")).await);
        sup.set_max_lines(2);
        assert!(wait_until(|| status(&sup, "tail") == JobStatus::Exited).await);
        let lines = sup.output_snapshot("tail").unwrap();
        assert_eq!(lines, vec!["done", "[runpanel] process ended successfully"]);
    }

    #[tokio::test]
    async fn stop_on_idle_job_is_not_running() {
        let sup = supervisor(&[("idle", "echo never")]);
        assert!(matches!(
            sup.stop("idle"),
            Err(SupervisorError::NotRunning(name)) if name == "idle"
        ));
        assert_eq!(status(&sup, "idle"), JobStatus::Stopped);
        assert!(sup.output_snapshot("idle").is_none());
    }

    #[tokio::test]
    async fn stop_after_exit_keeps_state() {
        let sup = supervisor(&[("once", "true")]);
        sup.start("once").unwrap();
        assert!(wait_until(|| status(&sup, "once") == JobStatus::Exited).await);
        let before = sup.output_snapshot("once").unwrap();
        assert!(matches!(
            sup.stop("once"),
            Err(SupervisorError::NotRunning(_))
        ));
        assert_eq!(status(&sup, "once"), JobStatus::Exited);
        assert_eq!(last_exit(&sup, "once"), Some(0));
        assert_eq!(sup.output_snapshot("once").unwrap(), before);
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let sup = supervisor(&[("known", "true")]);
        assert!(matches!(
            sup.start("nope"),
            Err(SupervisorError::InvalidName(name)) if name == "nope"
        ));
        assert!(matches!(
            sup.stop("nope"),
            Err(SupervisorError::InvalidName(_))
        ));
        assert!(matches!(
            sup.restart("nope"),
            Err(SupervisorError::InvalidName(_))
        ));
        assert!(matches!(
            sup.status("nope"),
            Err(SupervisorError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_no_job() {
        let sup = supervisor_with(
            &[("broken", "echo hi")],
            SupervisorSettings {
                shell: ShellConfig {
                    program: "/nonexistent/runpanel-shell".to_string(),
                    flag: "-c".to_string(),
                },
                ..SupervisorSettings::default()
            },
        );
        assert!(matches!(
            sup.start("broken"),
            Err(SupervisorError::Spawn { name, .. }) if name == "broken"
        ));
        assert_eq!(status(&sup, "broken"), JobStatus::Stopped);
        assert!(sup.output_snapshot("broken").is_none());
    }

    #[tokio::test]
    async fn stop_is_immediate_and_exit_is_ignored() {
        let sup = supervisor(&[("server", "sleep 30")]);
        sup.start("server").unwrap();
        assert_eq!(status(&sup, "server"), JobStatus::Running);
        sup.stop("server").unwrap();
        assert_eq!(status(&sup, "server"), JobStatus::Stopped);
        assert!(wait_until(|| sup.inner.live.load(Ordering::SeqCst) == 0).await);
        assert_eq!(status(&sup, "server"), JobStatus::Stopped);
        assert_eq!(last_exit(&sup, "server"), None);
        assert_eq!(
            sup.output_snapshot("server").unwrap().last().unwrap(),
            "[runpanel] stopped"
        );
    }

    #[tokio::test]
    async fn start_while_running_is_noop() {
        let sup = supervisor(&[("server", "sleep 30")]);
        sup.start("server").unwrap();
        let pid = sup.overview()[0].pid;
        sup.start("server").unwrap();
        assert_eq!(generation(&sup, "server"), 1);
        assert_eq!(sup.overview()[0].pid, pid);
        sup.stop("server").unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_starts_spawn_once() {
        let sup = supervisor(&[("server", "sleep 30")]);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let sup = sup.clone();
                scope.spawn(move || sup.start("server").unwrap());
            }
        });
        assert_eq!(status(&sup, "server"), JobStatus::Running);
        assert_eq!(generation(&sup, "server"), 1);
        sup.stop("server").unwrap();
    }

    #[tokio::test]
    async fn restart_preserves_history() {
        let sup = supervisor(&[("web", "echo booted; sleep 30")]);
        sup.start("web").unwrap();
        assert!(wait_until(|| output_contains(&sup, "web", "booted")).await);
        sup.restart("web").unwrap();
        assert_eq!(status(&sup, "web"), JobStatus::Stopped);
        assert!(wait_until(|| generation(&sup, "web") == 2).await);
        assert_eq!(status(&sup, "web"), JobStatus::Running);
        assert!(wait_until(|| {
            sup.output_snapshot("web")
                .map(|lines| lines.iter().filter(|l| *l == "booted").count() == 2)
                .unwrap_or(false)
        })
        .await);
        let lines = sup.output_snapshot("web").unwrap();
        assert_eq!(lines[0], "[runpanel] started: echo booted; sleep 30");
        assert!(lines.contains(&"[runpanel] restarting in 150ms".to_string()));
        sup.stop("web").unwrap();
    }

    #[tokio::test]
    async fn restart_of_idle_job_starts_it() {
        let sup = supervisor(&[("web", "sleep 30")]);
        sup.restart("web").unwrap();
        assert_eq!(status(&sup, "web"), JobStatus::Running);
        assert_eq!(
            sup.output_snapshot("web").unwrap(),
            vec!["[runpanel] restarting", "[runpanel] started: sleep 30"]
        );
        sup.stop("web").unwrap();
    }

    #[tokio::test]
    async fn second_restart_resets_pending_delay() {
        let sup = supervisor_with(
            &[("web", "sleep 30")],
            SupervisorSettings {
                restart_delay: Duration::from_millis(200),
                ..SupervisorSettings::default()
            },
        );
        sup.start("web").unwrap();
        sup.restart("web").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sup.restart("web").unwrap();
        assert!(sup.overview()[0].restart_pending);
        assert!(wait_until(|| status(&sup, "web") == JobStatus::Running).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(generation(&sup, "web"), 2);
        sup.stop("web").unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_pending_restart() {
        let sup = supervisor_with(
            &[("web", "sleep 30")],
            SupervisorSettings {
                restart_delay: Duration::from_millis(100),
                ..SupervisorSettings::default()
            },
        );
        sup.start("web").unwrap();
        sup.restart("web").unwrap();
        sup.stop("web").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(status(&sup, "web"), JobStatus::Stopped);
        assert_eq!(generation(&sup, "web"), 1);
    }

    #[tokio::test]
    async fn stop_all_is_best_effort() {
        let sup = supervisor(&[("a", "sleep 30"), ("b", "sleep 30"), ("c", "sleep 30")]);
        sup.start("a").unwrap();
        sup.start("b").unwrap();
        sup.stop("b").unwrap();
        sup.start("c").unwrap();
        let report = sup.stop_all();
        assert!(report.failed.is_empty());
        assert_eq!(report.stopped, vec!["a", "c"]);
        for name in ["a", "b", "c"] {
            assert_eq!(status(&sup, name), JobStatus::Stopped);
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_exit() {
        let sup = supervisor(&[("a", "sleep 30"), ("b", "sleep 30")]);
        sup.start("a").unwrap();
        sup.start("b").unwrap();
        let report = sup.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.stopped.len(), 2);
        assert_eq!(live(&sup), 0);
    }

    #[tokio::test]
    async fn stop_while_output_drains_keeps_exit() {
        // The shell exits at once; the background sleep holds the pipes open.
        let sup = supervisor(&[("bg", "sleep 2 & exit 0")]);
        sup.start("bg").unwrap();
        assert!(wait_until(|| {
            sup.jobs()
                .get("bg")
                .and_then(|job| job.kill_tx.as_ref())
                .is_some_and(|kill_tx| kill_tx.is_closed())
        })
        .await);
        assert_eq!(status(&sup, "bg"), JobStatus::Running);
        sup.stop("bg").unwrap();
        assert_eq!(status(&sup, "bg"), JobStatus::Running);
        assert!(wait_until(|| status(&sup, "bg") == JobStatus::Exited).await);
        assert_eq!(last_exit(&sup, "bg"), Some(0));
        assert_eq!(
            sup.output_snapshot("bg").unwrap().last().unwrap(),
            "[runpanel] process ended successfully"
        );
    }

    #[tokio::test]
    async fn start_waits_for_unreaped_process() {
        let sup = supervisor(&[("stubborn", "trap '' TERM; sleep 1")]);
        sup.start("stubborn").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sup.stop("stubborn").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        sup.start("stubborn").unwrap();
        assert_eq!(live(&sup), 1);
        assert_eq!(generation(&sup, "stubborn"), 1);
        assert_eq!(status(&sup, "stubborn"), JobStatus::Stopped);
        assert!(sup.overview()[0].restart_pending);
        sup.start("stubborn").unwrap();
        let waiting = sup
            .output_snapshot("stubborn")
            .unwrap()
            .iter()
            .filter(|line| *line == "[runpanel] waiting for previous run to exit")
            .count();
        assert_eq!(waiting, 1);

        assert!(wait_until(|| generation(&sup, "stubborn") == 2).await);
        assert_eq!(status(&sup, "stubborn"), JobStatus::Running);
        assert_eq!(live(&sup), 1);
        assert!(!sup.overview()[0].restart_pending);
    }

    #[tokio::test]
    async fn stop_cancels_deferred_start() {
        let sup = supervisor(&[("stubborn", "trap '' TERM; sleep 1")]);
        sup.start("stubborn").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sup.stop("stubborn").unwrap();
        sup.start("stubborn").unwrap();
        sup.stop("stubborn").unwrap();
        assert!(!sup.overview()[0].restart_pending);
        assert!(wait_until(|| live(&sup) == 0).await);
        assert_eq!(generation(&sup, "stubborn"), 1);
        assert_eq!(status(&sup, "stubborn"), JobStatus::Stopped);
    }

    #[tokio::test]
    async fn output_of_previous_run_is_dropped() {
        let sup = supervisor(&[("web", "sleep 30")]);
        sup.start("web").unwrap();
        sup.stop("web").unwrap();
        assert!(wait_until(|| live(&sup) == 0).await);
        sup.start("web").unwrap();
        assert_eq!(generation(&sup, "web"), 2);
        sup.append_output("web", 1, b"stale\n");
        sup.append_output("web", 2, b"fresh\n");
        assert!(!output_contains(&sup, "web", "stale"));
        assert!(output_contains(&sup, "web", "fresh"));
        sup.stop("web").unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_all_races_individual_calls() {
        let sup = supervisor(&[("a", "sleep 30"), ("b", "sleep 30")]);
        std::thread::scope(|scope| {
            for name in ["a", "b"] {
                let sup = sup.clone();
                scope.spawn(move || {
                    for _ in 0..10 {
                        sup.start(name).unwrap();
                        let _ = sup.stop(name);
                    }
                });
            }
            let sup = sup.clone();
            scope.spawn(move || {
                for _ in 0..20 {
                    let report = sup.stop_all();
                    assert!(report.failed.is_empty());
                    assert!(live(&sup) <= 2);
                }
            });
        });

        assert!(sup.stop_all().failed.is_empty());
        assert!(wait_until(|| live(&sup) == 0).await);
        for job in sup.overview() {
            assert_ne!(job.status, JobStatus::Running);
            assert!(!job.restart_pending);
        }
        assert!(sup.jobs().values().all(|job| !job.process_live));
    }
}
