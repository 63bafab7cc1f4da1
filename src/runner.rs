//! Command runner — subprocess execution with timeout and output capture.
//!
//! Two invocation modes: a shell string (`sh -c`) for free-form commands and
//! a pre-built argv vector for configured templates, so templated input never
//! passes through a shell.
//!
//! Each child runs in its own process group. stdout and stderr are drained by
//! reader threads while the parent polls for exit. Once the child exits or
//! times out the whole group is killed, so background jobs holding the pipes
//! die too. Output collection is bounded by the same deadline.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{WorkspaceError, WorkspaceResult};

/// Environment variables passed to every child. Everything else is dropped.
pub const DEFAULT_ENV_PASSTHROUGH: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "LANG", "LC_ALL", "LC_CTYPE", "TERM", "TMPDIR", "SHELL",
];

/// Per-stream capture limit (1 MiB). Excess output is drained and discarded.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Interval between `try_wait` polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep collecting output after a timeout kill.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// What to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Interpreted by `sh -c`.
    Shell(String),
    /// Executed directly; the first element is the program.
    Argv(Vec<String>),
}

impl Invocation {
    /// Human-readable rendering for logs and results.
    pub fn display(&self) -> String {
        match self {
            Self::Shell(line) => line.clone(),
            Self::Argv(argv) => argv.join(" "),
        }
    }
}

/// Outcome of one subprocess run. A non-zero exit code is data, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Executes invocations with a filtered environment.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    env_passthrough: Vec<String>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl CommandRunner {
    /// Create a runner passing through the default allowlist plus `extra_env`.
    pub fn new(extra_env: &[String]) -> Self {
        let mut env_passthrough: Vec<String> =
            DEFAULT_ENV_PASSTHROUGH.iter().map(|s| (*s).to_owned()).collect();
        for name in extra_env {
            if !env_passthrough.contains(name) {
                env_passthrough.push(name.clone());
            }
        }
        Self { env_passthrough }
    }

    /// Run `invocation` in `cwd`, killing it after `timeout`.
    ///
    /// Fails only when the process cannot be spawned.
    pub fn run(
        &self,
        invocation: &Invocation,
        cwd: &Path,
        timeout: Duration,
    ) -> WorkspaceResult<CommandResult> {
        let mut command = match invocation {
            Invocation::Shell(line) => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(line);
                c
            }
            Invocation::Argv(argv) => {
                let Some((program, args)) = argv.split_first() else {
                    return Err(WorkspaceError::CommandExecution {
                        command: String::new(),
                        reason: "empty argv".to_owned(),
                    });
                };
                let mut c = Command::new(program);
                c.args(args);
                c
            }
        };

        command
            .current_dir(cwd)
            .env_clear()
            .envs(
                self.env_passthrough
                    .iter()
                    .filter_map(|name| std::env::var_os(name).map(|v| (name, v))),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            command.process_group(0);
        }

        let rendered = invocation.display();
        debug!(command = %rendered, cwd = %cwd.display(), timeout_secs = timeout.as_secs(), "spawning");

        let deadline = Instant::now() + timeout;
        let mut child = command
            .spawn()
            .map_err(|e| WorkspaceError::CommandExecution {
                command: rendered.clone(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Stream::Stderr, tx.clone());
        }
        drop(tx);

        let (status, mut timed_out) = wait_with_deadline(&mut child, deadline, &rendered)?;

        // Background jobs left behind by the child still hold the pipes.
        kill_process_group(child.id());

        let mut stdout = Capture::default();
        let mut stderr = Capture::default();
        let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
        loop {
            let remaining = drain_until.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Output::Data(Stream::Stdout, bytes)) => stdout.bytes.extend(bytes),
                Ok(Output::Data(Stream::Stderr, bytes)) => stderr.bytes.extend(bytes),
                Ok(Output::Truncated(Stream::Stdout)) => stdout.truncated = true,
                Ok(Output::Truncated(Stream::Stderr)) => stderr.truncated = true,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !timed_out {
                        warn!(command = %rendered, "output pipes still open at deadline, giving up");
                    }
                    timed_out = true;
                    break;
                }
            }
        }

        let exit_code = exit_code(status);
        debug!(command = %rendered, exit_code, timed_out, "command finished");

        Ok(CommandResult {
            exit_code,
            stdout: stdout.into_text(),
            stderr: stderr.into_text(),
            timed_out,
        })
    }
}

/// Poll the child until it exits or `deadline` passes.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
    command_line: &str,
) -> WorkspaceResult<(Option<ExitStatus>, bool)> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((Some(status), false)),
            Ok(None) if Instant::now() >= deadline => {
                warn!(command = %command_line, "command timed out, killing process group");
                kill_process_group(child.id());
                let _ = child.kill();
                let status = child.wait().ok();
                return Ok((status, true));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill_process_group(child.id());
                let _ = child.kill();
                let _ = child.wait();
                return Err(WorkspaceError::CommandExecution {
                    command: command_line.to_owned(),
                    reason: format!("failed to check process status: {e}"),
                });
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // The child was spawned with process_group(0), so its pid is the pgid.
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "killpg failed"),
    }
}

#[cfg(not(unix))]
const fn kill_process_group(_pid: u32) {}

fn exit_code(status: Option<ExitStatus>) -> i32 {
    let Some(status) = status else {
        return -1;
    };
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

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Message from a reader thread.
enum Output {
    Data(Stream, Vec<u8>),
    Truncated(Stream),
}

#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str("\n... (output truncated)\n");
        }
        text
    }
}

/// Forward up to [`MAX_CAPTURE_BYTES`] of `stream` to `tx`, draining the rest.
///
/// The thread is detached: it ends when every holder of the pipe is gone.
fn spawn_reader<R: Read + Send + 'static>(mut reader: R, stream: Stream, tx: Sender<Output>) {
    std::thread::spawn(move || {
        let mut forwarded = 0usize;
        let mut truncated = false;
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = MAX_CAPTURE_BYTES.saturating_sub(forwarded);
                    let take = n.min(room);
                    if take > 0 {
                        forwarded += take;
                        if tx.send(Output::Data(stream, chunk[..take].to_vec())).is_err() {
                            break;
                        }
                    }
                    if n > room && !truncated {
                        truncated = true;
                        if tx.send(Output::Truncated(stream)).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> CommandRunner {
        CommandRunner::default()
    }

    #[test]
    fn test_shell_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = runner()
            .run(
                &Invocation::Shell("echo out; echo err >&2".to_owned()),
                dir.path(),
                Duration::from_secs(10),
            )
            .expect("run");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(!result.timed_out);
    }

    #[test]
    fn test_nonzero_exit_is_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = runner()
            .run(&Invocation::Shell("exit 3".to_owned()), dir.path(), Duration::from_secs(10))
            .expect("run");
        assert_eq!(result.exit_code, 3);
    }

    #[test]
    fn test_argv_mode_does_not_interpret_shell() {
        let dir = tempfile::tempdir().expect("tempdir");
        let argv = vec!["echo".to_owned(), "$HOME; rm -rf x".to_owned()];
        let result = runner()
            .run(&Invocation::Argv(argv), dir.path(), Duration::from_secs(10))
            .expect("run");
        assert_eq!(result.stdout, "$HOME; rm -rf x\n");
    }

    #[test]
    fn test_runs_in_cwd() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("marker.txt"), "here").expect("write");
        let result = runner()
            .run(&Invocation::Shell("cat marker.txt".to_owned()), dir.path(), Duration::from_secs(10))
            .expect("run");
        assert_eq!(result.stdout, "here");
    }

    #[test]
    fn test_timeout_kills_and_reports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let start = Instant::now();
        let result = runner()
            .run(
                &Invocation::Shell("echo started; sleep 30".to_owned()),
                dir.path(),
                Duration::from_millis(300),
            )
            .expect("run");
        assert!(result.timed_out);
        assert!(result.stdout.contains("started"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_background_job_does_not_outlive_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let start = Instant::now();
        let result = runner()
            .run(
                &Invocation::Shell("echo before; sleep 8 &".to_owned()),
                dir.path(),
                Duration::from_secs(1),
            )
            .expect("run");
        assert!(start.elapsed() < Duration::from_secs(4), "took {:?}", start.elapsed());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "before\n");
    }

    #[test]
    fn test_escaped_pipe_holder_is_bounded_by_timeout() {
        if which::which("setsid").is_err() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let start = Instant::now();
        // setsid leaves the process group, so only the deadline can end the wait.
        let result = runner()
            .run(
                &Invocation::Shell("echo partial; setsid sleep 8 &".to_owned()),
                dir.path(),
                Duration::from_secs(1),
            )
            .expect("run");
        assert!(start.elapsed() < Duration::from_secs(4), "took {:?}", start.elapsed());
        assert!(result.timed_out);
        assert_eq!(result.stdout, "partial\n");
    }

    #[test]
    fn test_output_is_capped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = runner()
            .run(
                &Invocation::Shell("head -c 2000000 /dev/zero | tr '\\0' x".to_owned()),
                dir.path(),
                Duration::from_secs(20),
            )
            .expect("run");
        assert!(result.stdout.starts_with(&"x".repeat(MAX_CAPTURE_BYTES)));
        assert!(result.stdout.ends_with("(output truncated)\n"));
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = runner()
            .run(
                &Invocation::Argv(vec!["definitely-not-a-real-binary-codemcp".to_owned()]),
                dir.path(),
                Duration::from_secs(5),
            )
            .expect_err("spawn should fail");
        assert_eq!(err.kind(), "CommandExecutionError");
    }

    #[test]
    fn test_environment_is_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = runner()
            .run(
                &Invocation::Shell("env | cut -d= -f1".to_owned()),
                dir.path(),
                Duration::from_secs(10),
            )
            .expect("run");
        let child_names: Vec<&str> = result.stdout.lines().collect();
        for (name, _) in std::env::vars_os() {
            let name = name.to_string_lossy();
            if DEFAULT_ENV_PASSTHROUGH.contains(&name.as_ref())
                // Exported by sh itself.
                || matches!(name.as_ref(), "PWD" | "SHLVL" | "_" | "OLDPWD")
            {
                continue;
            }
            assert!(
                !child_names.contains(&name.as_ref()),
                "variable leaked into child: {name}"
            );
        }
    }
}
