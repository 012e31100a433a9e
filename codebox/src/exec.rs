//! Command execution under supervision.
//!
//! One command in, one [`Response`] out: spawn (through the jail or
//! directly), deliver stdin, drain both pipes, cap stdout volume, enforce
//! the wall-clock deadline, and reap the whole descendant group when the
//! child overstays.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::Notify;

use codebox_shared::models::{Command, Response};

use crate::config;
use crate::jail::{self, Invocation, log as jail_log};

/// How a command is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Through the isolation tool. The production path.
    #[default]
    Isolated,

    /// Directly on the host, with the same supervision (deadline, output
    /// cap, group reaping) but no isolation envelope. For trusted input
    /// only.
    Unconfined,
}

/// Delay between the group SIGTERM and the follow-up SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on waiting for the pipe readers after the child is gone.
/// Grandchildren that inherited the pipes can hold them open past the kill.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one command against a staged scratch directory.
pub async fn execute(command: &Command, scratch: &Path) -> Response {
    execute_with(ExecutionMode::Isolated, command, scratch).await
}

/// Run one command in the given mode.
pub async fn execute_with(mode: ExecutionMode, command: &Command, scratch: &Path) -> Response {
    let started = Instant::now();
    let timeout = command.timeout.unwrap_or(config::DEFAULT_TIMEOUT);

    tracing::debug!(command = %command.command, ?mode, timeout, "Executing command");

    let words = match jail::split_command(&command.command) {
        Ok(words) => words,
        Err(e) => return Response::from_error(e.to_string()),
    };
    if words.is_empty() {
        // An empty command line runs nothing and succeeds.
        return Response::default();
    }

    let mut response = match mode {
        ExecutionMode::Isolated => {
            run_isolated(&words, command.stdin.as_deref(), scratch, timeout).await
        }
        ExecutionMode::Unconfined => {
            run_unconfined(&words, command.stdin.as_deref(), scratch, timeout).await
        }
    };
    response.elapsed_time = started.elapsed().as_secs_f64();
    response
}

async fn run_isolated(
    words: &[String],
    stdin: Option<&str>,
    scratch: &Path,
    timeout: f64,
) -> Response {
    // Private log file for this invocation; nsjail writes its diagnostics
    // there rather than polluting the child's stderr.
    let log_file = match tempfile::NamedTempFile::new() {
        Ok(file) => file,
        Err(e) => {
            return Response::from_error(format!("failed to create jail log file: {}", e));
        }
    };

    let invocation = Invocation::new(scratch, log_file.path(), words);
    let outcome = supervise(invocation.to_command(), stdin, timeout).await;

    // A jail that fails without telling the client why still tells us: its
    // log carries the reason (a missing cgroup file, a bad mount, an OOM
    // kill notice).
    if outcome.exit_code() != 0 && outcome.stderr.is_empty() {
        demux_jail_log(log_file.path(), outcome.exit_code());
    }
    outcome.into_response(timeout)
}

async fn run_unconfined(
    words: &[String],
    stdin: Option<&str>,
    scratch: &Path,
    timeout: f64,
) -> Response {
    let mut cmd = ProcessCommand::new(&words[0]);
    cmd.args(&words[1..]).current_dir(scratch);

    supervise(cmd, stdin, timeout).await.into_response(timeout)
}

/// Terminal state of one supervised child. Exactly one applies.
#[derive(Debug)]
enum Terminal {
    /// The child exited, or a signal it did not get from us terminated it.
    Finished(ExitStatus),
    /// The deadline expired and the process group was reaped.
    TimedOut,
    /// The stdout cap was crossed and the process group was reaped.
    OutputCapped,
    /// The child never ran to completion under supervision; the payload
    /// describes the spawn or wait failure.
    Failed(String),
}

/// Raw collection result, before response shaping.
struct Supervised {
    stdout: String,
    stderr: String,
    terminal: Terminal,
}

impl Supervised {
    fn failed(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            terminal: Terminal::Failed(message),
        }
    }

    fn exit_code(&self) -> i32 {
        match &self.terminal {
            Terminal::Finished(status) => exit_code_of(*status),
            Terminal::TimedOut | Terminal::OutputCapped | Terminal::Failed(_) => -1,
        }
    }

    fn into_response(self, timeout: f64) -> Response {
        let exit_code = self.exit_code();
        let stderr = match self.terminal {
            Terminal::TimedOut if self.stderr.is_empty() => {
                format!("Timeout Error. Exceeded {}s", timeout)
            }
            Terminal::Failed(message) if self.stderr.is_empty() => message,
            _ => self.stderr,
        };
        Response::new(self.stdout, stderr, exit_code)
    }
}

/// Spawn `cmd` and supervise it to completion.
///
/// The child leads its own process group so a deadline or cap breach can
/// take the whole descendant tree down, not just the direct child.
async fn supervise(mut cmd: ProcessCommand, stdin: Option<&str>, timeout: f64) -> Supervised {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0)
    .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Supervised::failed(e.to_string()),
    };

    if let Some(text) = stdin
        && let Some(mut handle) = child.stdin.take()
    {
        let text = text.to_owned();
        tokio::spawn(async move {
            let _ = handle.write_all(text.as_bytes()).await;
            let _ = handle.shutdown().await;
        });
    }

    let (Some(stdout_pipe), Some(stderr_pipe)) = (child.stdout.take(), child.stderr.take()) else {
        return Supervised::failed("stdout/stderr pipes were not available".to_string());
    };

    // Both pipes are drained on their own tasks: an unread pipe blocks the
    // child, which would turn every chatty program into a timeout.
    let capped = Arc::new(Notify::new());
    let stdout_task = tokio::spawn(read_capped(
        stdout_pipe,
        Some(config::OUTPUT_MAX),
        Arc::clone(&capped),
    ));
    let stderr_task = tokio::spawn(read_capped(stderr_pipe, None, Arc::clone(&capped)));

    let terminal = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Terminal::Finished(status),
            Err(e) => Terminal::Failed(format!("wait failed: {}", e)),
        },
        _ = tokio::time::sleep(deadline(timeout)) => {
            reap_group(&mut child).await;
            Terminal::TimedOut
        }
        _ = capped.notified() => {
            tracing::info!("Output exceeded the limit, terminating the jail");
            reap_group(&mut child).await;
            Terminal::OutputCapped
        }
    };

    let stdout_bytes = drain(stdout_task).await;
    let stderr_bytes = drain(stderr_task).await;

    Supervised {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        terminal,
    }
}

/// Read a pipe to EOF in chunks, optionally stopping once `cap` bytes have
/// been collected. Crossing the cap fires `capped` and abandons the pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    cap: Option<usize>,
    capped: Arc<Notify>,
) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut chunk = vec![0u8; config::READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                collected.extend_from_slice(&chunk[..n]);
                if let Some(cap) = cap
                    && collected.len() > cap
                {
                    capped.notify_one();
                    break;
                }
            }
        }
    }
    collected
}

/// Collect a reader task's output, aborting it if pipes stay open too long.
async fn drain(mut task: tokio::task::JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            task.abort();
            Vec::new()
        }
    }
}

/// Terminate the child's whole process group and wait it out: SIGTERM, a
/// short grace, then SIGKILL.
async fn reap_group(child: &mut Child) {
    signal_group(child, Signal::SIGTERM);
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        signal_group(child, Signal::SIGKILL);
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Signal the child's process group. The tool forks, so signalling only the
/// direct child would leak descendants.
fn signal_group(child: &Child, signal: Signal) {
    let Some(pid) = child.id() else { return };
    // spawn() put the child in its own group, so the pgid is its pid.
    if let Err(e) = signal::killpg(Pid::from_raw(pid as i32), signal)
        && e != Errno::ESRCH
    {
        tracing::warn!(pid, error = %e, "Failed to signal the child's process group");
    }
}

/// Clamp the configured timeout into a usable deadline. Non-positive or
/// non-finite values expire immediately.
fn deadline(timeout: f64) -> Duration {
    Duration::try_from_secs_f64(timeout).unwrap_or(Duration::ZERO)
}

/// Map an exit status to the wire convention: the child's code when it
/// exited, `128 + N` when signal `N` terminated it.
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

/// Feed the jail's log through the demultiplexer.
fn demux_jail_log(log_path: &Path, exit_code: i32) {
    let contents = std::fs::read_to_string(log_path).unwrap_or_default();
    jail_log::forward(contents.lines());
    tracing::info!(exit_code, "nsjail returned a non-zero status");
}
