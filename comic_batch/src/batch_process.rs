//! Process Executor: one long-lived `gm batch` child per task.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ─spawn─▶ Started ─write─▶ Writing ─close stdin─▶ Draining ─exit─▶ Terminated
//!                  └──────────────── cancel / error ──────────────────────▶┘
//! ```
//!
//! ## Pipe deadlock
//!
//! `gm` writes diagnostics while it reads commands. If stdout/stderr are
//! piped but nobody reads them, the child blocks on a full pipe buffer,
//! stops reading stdin, and our writes block forever. Both output pipes are
//! therefore drained by dedicated threads from the moment the child starts.
//!
//! A waiter thread owns the `Child` and blocks in `wait()`; the exit status
//! comes back over a channel. A watchdog thread polls the cancellation
//! token every tick and kills the child when it flips.
//!
//! ## 非阻塞 stdin
//!
//! The write end of stdin is switched to `O_NONBLOCK` (unix), so a child
//! that stops reading makes `write` return `WouldBlock` instead of parking
//! the worker. `write_chunked` backs off and gives up with
//! `ProcessIoTimeout` after `max_attempts` stalled writes in a row.
//!
//! ## 防止误杀
//!
//! The waiter flips `exited` under a lock before the child is reaped, and
//! every kill takes the same lock, so a signal never reaches a recycled pid.

use crate::cancel::CancellationToken;
use crate::error::{ProcessingError, Result};
use std::ffi::OsString;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Cancellation poll interval of the watchdog.
pub const WATCHDOG_TICK: Duration = Duration::from_millis(50);

// ═══════════════════════════════════════════════════════════════
// Chunked writes
// ═══════════════════════════════════════════════════════════════

/// Retry policy for pipe writes. Timeouts are attempt-based: only writes
/// that make no progress count towards `max_attempts`.
///
/// `gm` reads the next command only after finishing the current one, so the
/// default tolerates roughly 45 s without progress (one very large page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub chunk_size: usize,
    pub max_attempts: u32,
    /// First backoff delay; doubled per stalled attempt up to `max_backoff`.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            max_attempts: 100,
            backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl WritePolicy {
    fn delay(&self, stalled: u32) -> Duration {
        let factor = 1u32 << stalled.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Write all of `data` in `chunk_size` pieces.
///
/// - `Interrupted` is retried at once
/// - `WouldBlock` and zero-length writes back off, `ProcessIoTimeout` after
///   `max_attempts` in a row
/// - `BrokenPipe` fails immediately with `PipeBroken`
///
/// The token is checked before every write.
pub fn write_chunked<W: Write>(
    writer: &mut W,
    data: &[u8],
    policy: &WritePolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let chunk_size = policy.chunk_size.max(1);
    let mut offset = 0;
    let mut stalled = 0u32;

    while offset < data.len() {
        cancel.check()?;

        let end = (offset + chunk_size).min(data.len());
        match writer.write(&data[offset..end]) {
            Ok(0) => stall(&mut stalled, policy)?,
            Ok(n) => {
                offset += n;
                stalled = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => stall(&mut stalled, policy)?,
            Err(e) => return Err(ProcessingError::from_pipe_error(&e)),
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => stall(&mut stalled, policy)?,
            Err(e) => return Err(ProcessingError::from_pipe_error(&e)),
        }
    }
}

fn stall(stalled: &mut u32, policy: &WritePolicy) -> Result<()> {
    *stalled += 1;
    if *stalled >= policy.max_attempts {
        return Err(ProcessingError::ProcessIoTimeout { attempts: *stalled });
    }
    thread::sleep(policy.delay(*stalled));
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
// Batch process
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Started,
    Writing,
    Draining,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Idle => "idle",
            ProcessState::Started => "started",
            ProcessState::Writing => "writing",
            ProcessState::Draining => "draining",
            ProcessState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Program plus arguments of the batch child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl BatchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `gm batch -escape unix -echo off -`: read commands from stdin until
    /// end of input, shell-style quoting.
    pub fn graphicsmagick(gm: &Path) -> Self {
        Self::new(gm).args(["batch", "-escape", "unix", "-echo", "off", "-"])
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// Result of a clean run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub commands: usize,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

pub struct BatchProcess {
    state: ProcessState,
    tool: String,
    pid: u32,
    stdin: Option<ChildStdin>,
    stdout_thread: Option<JoinHandle<String>>,
    stderr_thread: Option<JoinHandle<String>>,
    waiter_thread: Option<JoinHandle<()>>,
    watchdog_thread: Option<JoinHandle<()>>,
    exit_rx: Receiver<io::Result<ExitStatus>>,
    exit_status: Option<io::Result<ExitStatus>>,
    exited: Arc<Mutex<bool>>,
    cancel: CancellationToken,
    policy: WritePolicy,
    commands_written: usize,
    started_at: Instant,
}

impl BatchProcess {
    pub fn spawn(
        command: &BatchCommand,
        policy: WritePolicy,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        cancel.check()?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessingError::SpawnFailed {
                program: command.program.clone(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        if let Some(stdin) = &stdin {
            if let Err(e) = set_nonblocking(stdin) {
                // writes stay blocking; only cancellation can unblock them
                warn!(pid, error = %e, "Cannot make stdin non-blocking");
            }
        }
        let stdout_thread = child.stdout.take().map(|out| drain_lines(out, "stdout"));
        let stderr_thread = child.stderr.take().map(|err| drain_lines(err, "stderr"));

        let exited = Arc::new(Mutex::new(false));
        let (exit_tx, exit_rx) = mpsc::channel();
        let waiter_thread = {
            let exited = Arc::clone(&exited);
            thread::spawn(move || {
                let status = reap(child, &exited);
                // receiver gone means the process handle was dropped
                let _ = exit_tx.send(status);
            })
        };

        let watchdog_thread = {
            let exited = Arc::clone(&exited);
            let cancel = cancel.clone();
            thread::spawn(move || {
                while !has_exited(&exited) {
                    if cancel.is_cancelled() {
                        debug!(pid, "Cancellation observed, killing batch process");
                        kill_unless_exited(pid, &exited);
                        return;
                    }
                    thread::sleep(WATCHDOG_TICK);
                }
            })
        };

        debug!(pid, program = %command.program.display(), "Batch process started");

        Ok(Self {
            state: ProcessState::Started,
            tool: command.tool_name(),
            pid,
            stdin,
            stdout_thread,
            stderr_thread,
            waiter_thread: Some(waiter_thread),
            watchdog_thread: Some(watchdog_thread),
            exit_rx,
            exit_status: None,
            exited,
            cancel: cancel.clone(),
            policy,
            commands_written: 0,
            started_at: Instant::now(),
        })
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Stream newline-terminated commands into the child.
    pub fn write_commands(&mut self, commands: &[String]) -> Result<()> {
        match self.state {
            ProcessState::Started | ProcessState::Writing => {}
            state => {
                return Err(ProcessingError::PipeWriteFailed {
                    kind: io::ErrorKind::NotConnected,
                    message: format!("cannot write while {}", state),
                })
            }
        }
        self.state = ProcessState::Writing;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ProcessingError::PipeBroken);
        };

        let mut payload = String::with_capacity(commands.iter().map(|c| c.len() + 1).sum());
        for command in commands {
            payload.push_str(command);
            payload.push('\n');
        }

        match write_chunked(stdin, payload.as_bytes(), &self.policy, &self.cancel) {
            Ok(()) => {
                self.commands_written += commands.len();
                Ok(())
            }
            // a child killed for cancellation surfaces here as a broken pipe
            Err(_) if self.cancel.is_cancelled() => Err(ProcessingError::ProcessingCancelled),
            Err(e) => Err(e),
        }
    }

    /// Close stdin, wait for exit and collect output.
    pub fn finish(mut self) -> Result<BatchOutcome> {
        self.state = ProcessState::Draining;
        let status = self.shutdown(false);
        let stdout = join_drain(self.stdout_thread.take());
        let stderr = join_drain(self.stderr_thread.take());
        let duration = self.started_at.elapsed();

        if self.cancel.is_cancelled() {
            debug!(pid = self.pid, "Batch process finished after cancellation");
            return Err(ProcessingError::ProcessingCancelled);
        }

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!(pid = self.pid, error = %e, "Failed to wait for batch process");
                -1
            }
        };

        let summary = format!("batch: {} commands", self.commands_written);
        shared_utils::logging::log_external_tool(
            &self.tool,
            &summary,
            &stderr,
            Some(exit_code),
            duration,
        );

        if exit_code != 0 {
            return Err(ProcessingError::GraphicsMagickExecutionFailed { exit_code, stderr });
        }

        Ok(BatchOutcome {
            commands: self.commands_written,
            stdout,
            stderr,
            duration,
        })
    }

    /// Kill the child and release every handle.
    pub fn terminate(&mut self) {
        if self.state != ProcessState::Terminated {
            warn!(pid = self.pid, state = %self.state, "Terminating batch process");
            self.shutdown(true);
            join_drain(self.stdout_thread.take());
            join_drain(self.stderr_thread.take());
        }
    }

    /// Close stdin, optionally kill, then block until the waiter reports.
    /// Joins the waiter and watchdog; leaves the drain threads to the caller.
    fn shutdown(&mut self, kill: bool) -> io::Result<ExitStatus> {
        drop(self.stdin.take());

        if kill {
            kill_unless_exited(self.pid, &self.exited);
        }

        if self.exit_status.is_none() {
            self.exit_status = Some(self.exit_rx.recv().unwrap_or_else(|_| {
                Err(io::Error::other("waiter thread exited without a status"))
            }));
        }

        if let Some(handle) = self.waiter_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.watchdog_thread.take() {
            let _ = handle.join();
        }

        self.state = ProcessState::Terminated;

        match self.exit_status.as_ref() {
            Some(Ok(status)) => Ok(*status),
            Some(Err(e)) => Err(io::Error::new(e.kind(), e.to_string())),
            None => Err(io::Error::other("no exit status")),
        }
    }
}

impl Drop for BatchProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Spawn, stream every command, close and wait. Write failures kill the
/// child, except a broken pipe from a child that already exited with an
/// error, which is reported as that exit.
pub fn run_batch(
    command: &BatchCommand,
    commands: &[String],
    policy: WritePolicy,
    cancel: &CancellationToken,
) -> Result<BatchOutcome> {
    let mut process = BatchProcess::spawn(command, policy, cancel)?;

    match process.write_commands(commands) {
        Ok(()) => process.finish(),
        Err(ProcessingError::PipeBroken) => match process.finish() {
            Ok(_) => Err(ProcessingError::PipeBroken),
            Err(e) => Err(e),
        },
        Err(e) => {
            process.terminate();
            Err(e)
        }
    }
}

fn drain_lines<R: Read + Send + 'static>(reader: R, stream: &'static str) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut collected = String::new();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    debug!(stream, line = %text.trim_end(), "gm output");
                    collected.push_str(&text);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(stream, error = %e, "Output drain stopped");
                    break;
                }
            }
        }
        collected
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════
// 🔥 v0.1.1: 进程控制 (non-blocking stdin, reap, kill)
// ═══════════════════════════════════════════════════════════════

#[cfg(unix)]
fn set_nonblocking(stdin: &ChildStdin) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = stdin.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_nonblocking(_stdin: &ChildStdin) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "non-blocking pipes need unix",
    ))
}

fn has_exited(exited: &Mutex<bool>) -> bool {
    *exited.lock().unwrap_or_else(|e| e.into_inner())
}

/// Signal the child only while it is still unreaped.
fn kill_unless_exited(pid: u32, exited: &Mutex<bool>) {
    let exited = exited.lock().unwrap_or_else(|e| e.into_inner());
    if !*exited {
        kill_pid(pid);
    }
}

/// Block until the child exits, mark it exited, then reap it.
///
/// `waitid(WNOWAIT)` leaves the zombie in place, so the pid stays reserved
/// until `wait()` runs under the `exited` lock.
#[cfg(unix)]
fn reap(mut child: Child, exited: &Mutex<bool>) -> io::Result<ExitStatus> {
    if let Err(e) = wait_until_exited(child.id()) {
        debug!(error = %e, "waitid failed, reaping directly");
        let status = child.wait();
        *exited.lock().unwrap_or_else(|e| e.into_inner()) = true;
        return status;
    }

    let mut exited = exited.lock().unwrap_or_else(|e| e.into_inner());
    *exited = true;
    child.wait()
}

#[cfg(unix)]
fn wait_until_exited(pid: u32) -> io::Result<()> {
    loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// The open process handle keeps the pid reserved until `child` drops.
#[cfg(not(unix))]
fn reap(mut child: Child, exited: &Mutex<bool>) -> io::Result<ExitStatus> {
    let status = child.wait();
    *exited.lock().unwrap_or_else(|e| e.into_inner()) = true;
    status
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    if ret != 0 {
        debug!(pid, error = %io::Error::last_os_error(), "kill failed");
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) {
    let result = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        debug!(pid, error = %e, "taskkill failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts up to `accept` bytes per call, then replays scripted errors.
    struct ScriptedWriter {
        written: Vec<u8>,
        accept: usize,
        errors: Vec<io::ErrorKind>,
        calls: usize,
    }

    impl ScriptedWriter {
        fn new(accept: usize, errors: Vec<io::ErrorKind>) -> Self {
            Self {
                written: Vec::new(),
                accept,
                errors,
                calls: 0,
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if !self.errors.is_empty() {
                let kind = self.errors.remove(0);
                return Err(io::Error::new(kind, "scripted"));
            }
            let n = buf.len().min(self.accept);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn fast_policy() -> WritePolicy {
        WritePolicy {
            chunk_size: 4,
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_chunked_write_handles_partial_writes() {
        let mut writer = ScriptedWriter::new(3, vec![]);
        let data = b"convert 'a' 'b'\n";
        write_chunked(&mut writer, data, &fast_policy(), &CancellationToken::new()).unwrap();
        assert_eq!(writer.written, data);
        assert!(writer.calls >= data.len() / 3);
    }

    #[test]
    fn test_interrupted_and_would_block_are_retried() {
        let mut writer = ScriptedWriter::new(
            64,
            vec![
                io::ErrorKind::Interrupted,
                io::ErrorKind::WouldBlock,
                io::ErrorKind::Interrupted,
            ],
        );
        write_chunked(&mut writer, b"hello", &fast_policy(), &CancellationToken::new()).unwrap();
        assert_eq!(writer.written, b"hello");
    }

    #[test]
    fn test_would_block_times_out_after_cap() {
        let mut writer = ScriptedWriter::new(64, vec![io::ErrorKind::WouldBlock; 10]);
        let err = write_chunked(&mut writer, b"hello", &fast_policy(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ProcessingError::ProcessIoTimeout { attempts: 3 }));
    }

    #[test]
    fn test_zero_length_writes_time_out() {
        let mut writer = ScriptedWriter::new(0, vec![]);
        let err = write_chunked(&mut writer, b"x", &fast_policy(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ProcessingError::ProcessIoTimeout { .. }));
    }

    #[test]
    fn test_broken_pipe_fails_immediately() {
        let mut writer = ScriptedWriter::new(64, vec![io::ErrorKind::BrokenPipe]);
        let err = write_chunked(&mut writer, b"hello", &fast_policy(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ProcessingError::PipeBroken));
        assert_eq!(writer.calls, 1);
    }

    #[test]
    fn test_cancelled_write_stops_before_writing() {
        let mut writer = ScriptedWriter::new(64, vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = write_chunked(&mut writer, b"hello", &fast_policy(), &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(writer.calls, 0);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = fast_policy();
        assert_eq!(policy.delay(1), Duration::from_millis(1));
        assert_eq!(policy.delay(2), Duration::from_millis(2));
        assert_eq!(policy.delay(30), Duration::from_millis(2));
    }

    #[test]
    fn test_graphicsmagick_arguments() {
        let cmd = BatchCommand::graphicsmagick(Path::new("/usr/bin/gm"));
        assert_eq!(cmd.program, PathBuf::from("/usr/bin/gm"));
        assert_eq!(cmd.args, ["batch", "-escape", "unix", "-echo", "off", "-"]);
        assert_eq!(cmd.tool_name(), "gm");
    }

    #[test]
    fn test_spawn_failure() {
        let cmd = BatchCommand::new("/nonexistent/definitely/gm");
        let err = BatchProcess::spawn(&cmd, WritePolicy::default(), &CancellationToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, ProcessingError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use tempfile::TempDir;

        fn sh(script: &str) -> BatchCommand {
            BatchCommand::new("/bin/sh").args(["-c", script])
        }

        fn bulk_commands() -> Vec<String> {
            (0..50_000)
                .map(|i| format!("convert '{:08}.png' 'out.jpg'", i))
                .collect()
        }

        #[test]
        fn test_commands_reach_stdin() {
            let dir = TempDir::new().unwrap();
            let record = dir.path().join("stdin.txt");
            let cmd = sh(&format!("cat > '{}'", record.display()));
            let commands = vec![
                "convert 'a.png' 'a.jpg'".to_string(),
                "convert 'b.png' 'b.jpg'".to_string(),
            ];

            let outcome =
                run_batch(&cmd, &commands, WritePolicy::default(), &CancellationToken::new())
                    .unwrap();
            assert_eq!(outcome.commands, 2);
            assert_eq!(
                std::fs::read_to_string(&record).unwrap(),
                "convert 'a.png' 'a.jpg'\nconvert 'b.png' 'b.jpg'\n"
            );
        }

        #[test]
        fn test_nonzero_exit_reports_stderr() {
            let cmd = sh("cat > /dev/null; echo 'gm convert: Unable to open file' >&2; exit 3");
            let commands = ["x".to_string()];
            let err = run_batch(&cmd, &commands, WritePolicy::default(), &CancellationToken::new())
                .unwrap_err();
            match err {
                ProcessingError::GraphicsMagickExecutionFailed { exit_code, stderr } => {
                    assert_eq!(exit_code, 3);
                    assert!(stderr.contains("Unable to open file"));
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }

        #[test]
        fn test_heavy_output_does_not_deadlock() {
            // ~1 MiB on each stream, far beyond any pipe buffer
            let cmd = sh(
                "i=0; while [ $i -lt 16384 ]; do \
                 echo 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx'; \
                 echo 'yyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyy' >&2; \
                 i=$((i+1)); done; cat > /dev/null",
            );
            let commands: Vec<String> = (0..2000)
                .map(|i| format!("convert '{}.png' '{}.jpg'", i, i))
                .collect();

            let outcome =
                run_batch(&cmd, &commands, WritePolicy::default(), &CancellationToken::new())
                    .unwrap();
            assert_eq!(outcome.stdout.lines().count(), 16384);
            assert_eq!(outcome.stderr.lines().count(), 16384);
        }

        #[test]
        fn test_state_transitions() {
            let mut process = BatchProcess::spawn(
                &sh("cat > /dev/null"),
                WritePolicy::default(),
                &CancellationToken::new(),
            )
            .unwrap();
            assert_eq!(process.state(), ProcessState::Started);
            process.write_commands(&["one".to_string()]).unwrap();
            assert_eq!(process.state(), ProcessState::Writing);
            process.finish().unwrap();
        }

        #[test]
        fn test_cancellation_kills_hung_child() {
            let cancel = CancellationToken::new();
            let mut process =
                BatchProcess::spawn(&sh("exec sleep 30"), WritePolicy::default(), &cancel).unwrap();
            process.write_commands(&["one".to_string()]).unwrap();

            let started = Instant::now();
            let trigger = cancel.clone();
            let canceller = thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                trigger.cancel();
            });

            let err = process.finish().unwrap_err();
            canceller.join().unwrap();
            assert!(err.is_cancelled());
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn test_cancellation_unblocks_stuck_writer() {
            // child never reads stdin, so writes block once the pipe fills
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let canceller = thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });

            let commands = bulk_commands();
            let err = run_batch(&sh("exec sleep 30"), &commands, WritePolicy::default(), &cancel)
                .unwrap_err();
            canceller.join().unwrap();
            assert!(err.is_cancelled());
        }

        #[test]
        fn test_stalled_reader_times_out() {
            // ~1.6 MiB of commands against a child that never reads stdin
            let policy = WritePolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                ..WritePolicy::default()
            };

            let started = Instant::now();
            let commands = bulk_commands();
            let err = run_batch(&sh("exec sleep 5"), &commands, policy, &CancellationToken::new())
                .unwrap_err();
            assert!(
                matches!(err, ProcessingError::ProcessIoTimeout { attempts: 3 }),
                "unexpected error: {:?}",
                err
            );
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        #[test]
        fn test_exit_status_survives_late_kill() {
            let cancel = CancellationToken::new();
            let mut process =
                BatchProcess::spawn(&sh("exit 3"), WritePolicy::default(), &cancel).unwrap();

            let deadline = Instant::now() + Duration::from_secs(5);
            while !has_exited(&process.exited) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            assert!(has_exited(&process.exited));

            // already reaped: no signal is sent, the recorded status stays
            kill_unless_exited(process.pid, &process.exited);
            let err = process.finish().unwrap_err();
            assert!(matches!(
                err,
                ProcessingError::GraphicsMagickExecutionFailed { exit_code: 3, .. }
            ));
        }

        #[test]
        fn test_drop_kills_running_child() {
            let process = BatchProcess::spawn(
                &sh("exec sleep 30"),
                WritePolicy::default(),
                &CancellationToken::new(),
            )
            .unwrap();
            let started = Instant::now();
            drop(process);
            assert!(started.elapsed() < Duration::from_secs(10));
        }
    }
}
