//! External tool invocation with captured output and a wall-clock limit.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, warn};

use crate::error::RunnerError;

/// How often a child with a deadline is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A command line for one of the external astronomy tools.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
        }
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Kill the child once it has run longer than `timeout`. `None` waits
    /// indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn arguments(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Space-joined command line, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program())
            .chain(self.arguments())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion or until the timeout expires.
    pub fn run(&self) -> Result<ToolOutput, RunnerError> {
        let program = self.program();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        debug!(command = %self.display(), "starting");
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let completion = match self.timeout {
            None => Completion::Exited(
                child
                    .wait()
                    .map_err(|source| RunnerError::Wait {
                        program: program.clone(),
                        source,
                    })?
                    .code(),
            ),
            Some(limit) => wait_with_deadline(&mut child, &program, start + limit)?,
        };
        let elapsed = start.elapsed();

        // A killed child may have left grandchildren holding the pipes open,
        // so readers are only joined after a normal exit.
        let (stdout, stderr) = match completion {
            Completion::Exited(_) => (join_reader(stdout), join_reader(stderr)),
            Completion::TimedOut => (Vec::new(), Vec::new()),
        };

        Ok(ToolOutput {
            completion,
            stdout,
            stderr,
            elapsed,
        })
    }
}

fn wait_with_deadline(
    child: &mut Child,
    program: &str,
    deadline: Instant,
) -> Result<Completion, RunnerError> {
    loop {
        let status: Option<ExitStatus> = child.try_wait().map_err(|source| RunnerError::Wait {
            program: program.to_string(),
            source,
        })?;
        if let Some(status) = status {
            return Ok(Completion::Exited(status.code()));
        }
        if Instant::now() >= deadline {
            child.kill().map_err(|source| RunnerError::Kill {
                program: program.to_string(),
                source,
            })?;
            // reap
            let _ = child.wait();
            return Ok(Completion::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Exit code, `None` when terminated by a signal.
    Exited(Option<i32>),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub completion: Completion,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.completion == Completion::Exited(Some(0))
    }

    pub fn timed_out(&self) -> bool {
        self.completion == Completion::TimedOut
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// stdout followed by stderr, the layout of a tool log file.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }
}

/// Run `command` and log a warning for anything but a clean exit.
/// Returns whether the tool succeeded.
pub fn run_logged(command: &ToolCommand) -> anyhow::Result<bool> {
    let output = command
        .run()
        .with_context(|| format!("running {}", command.display()))?;
    match output.completion {
        Completion::Exited(Some(0)) => Ok(true),
        Completion::Exited(code) => {
            warn!(
                command = %command.display(),
                ?code,
                stderr = %output.stderr_text().trim_end(),
                "tool exited with an error"
            );
            Ok(false)
        }
        Completion::TimedOut => {
            warn!(command = %command.display(), "tool timed out");
            Ok(false)
        }
    }
}

/// Append-only record of runs needing attention, shared between workers.
#[derive(Debug)]
pub struct ProblemLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProblemLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn append(&self, message: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening problem log {}", self.path.display()))?;
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
        writeln!(file, "{stamp} {message}")
            .with_context(|| format!("writing problem log {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_arguments() {
        let cmd = ToolCommand::new("galfit").arg("f1.00003.galfeed");
        assert_eq!(cmd.display(), "galfit f1.00003.galfeed");
        assert_eq!(cmd.arguments(), vec!["f1.00003.galfeed".to_string()]);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = ToolCommand::new("/nonexistent/galpipe-no-such-tool")
            .run()
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let out = ToolCommand::new("sh")
            .args(["-c", "echo hello; echo oops >&2; exit 3"])
            .run()
            .unwrap();
        assert_eq!(out.completion, Completion::Exited(Some(3)));
        assert!(!out.success());
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.stderr, b"oops\n");
        assert_eq!(out.combined(), b"hello\noops\n");
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = ToolCommand::new("pwd")
            .current_dir(dir.path())
            .timeout(Some(Duration::from_secs(10)))
            .run()
            .unwrap();
        assert!(out.success());
        let printed = PathBuf::from(String::from_utf8_lossy(&out.stdout).trim());
        assert_eq!(
            printed.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn slow_child_is_killed_at_deadline() {
        let out = ToolCommand::new("sleep")
            .arg("30")
            .timeout(Some(Duration::from_millis(200)))
            .run()
            .unwrap();
        assert!(out.timed_out());
        assert!(out.elapsed < Duration::from_secs(10));
    }

    #[test]
    fn problem_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProblemLog::new(dir.path().join("problems.log"));
        log.append("first").unwrap();
        log.append("second").unwrap();
        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        assert!(lines[1].ends_with(" second"));
    }
}
