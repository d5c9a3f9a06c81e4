use crate::error::{classify_failure, spawn_failure_code, ExecutionError};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(key, value)| (key.clone(), value.clone())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn render(&self) -> String {
        fn shell_quote(part: &str) -> String {
            if part.is_empty() {
                return "\"\"".to_string();
            }
            if part.chars().any(|c| c.is_whitespace()) {
                return format!("\"{}\"", part.replace('"', "\\\""));
            }
            part.to_string()
        }
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub lines: Vec<String>,
    pub failure: Option<&'static str>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// Non-zero exits are `Ok`; only spawn, wait and timeout failures are errors.
pub trait CommandRunner: Sync {
    fn run(
        &self,
        invocation: &Invocation,
        capture_output: bool,
        timeout: Duration,
    ) -> Result<CommandResult, ExecutionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        invocation: &Invocation,
        capture_output: bool,
        timeout: Duration,
    ) -> Result<CommandResult, ExecutionError> {
        let command = invocation.render();
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());
        if capture_output {
            cmd.stdout(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
        }

        debug!(command = %command, timeout_ms = timeout.as_millis() as u64, "spawning command");
        let mut child = cmd.spawn().map_err(|source| {
            let (code, hint) = spawn_failure_code(&source);
            warn!(command = %command, error_code = code, hint = hint.unwrap_or_default(), "spawn failed");
            ExecutionError::Spawn {
                command: command.clone(),
                source,
            }
        })?;

        let deadline = Instant::now() + timeout;
        let stdout_reader = child.stdout.take().map(|stdout| {
            spawn_reader(move || {
                BufReader::new(stdout)
                    .lines()
                    .map_while(Result::ok)
                    .collect::<Vec<String>>()
            })
        });
        let stderr_reader = child.stderr.take().map(|stderr| {
            let command = command.clone();
            spawn_reader(move || {
                let mut collected = String::new();
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!(command = %command, "stderr: {line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });

        let status = match child.wait_timeout(timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(
                    command = %command,
                    timeout_ms = timeout.as_millis() as u64,
                    "command timed out and was killed"
                );
                // Reader threads are detached: a grandchild may still hold the pipes open.
                return Err(ExecutionError::TimedOut { command, timeout });
            }
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecutionError::Wait { command, source });
            }
        };

        let (Some(lines), Some(stderr)) = (
            join_reader(stdout_reader, deadline),
            join_reader(stderr_reader, deadline),
        ) else {
            warn!(
                command = %command,
                timeout_ms = timeout.as_millis() as u64,
                "command exited but its output stayed open past the timeout"
            );
            return Err(ExecutionError::TimedOut { command, timeout });
        };

        let exit_code = status
            .code()
            .unwrap_or(if status.success() { 0 } else { 1 });
        let mut failure = None;
        if exit_code != 0 {
            let (error_code, hint) = classify_failure(&stderr);
            failure = Some(error_code);
            warn!(
                command = %command,
                exit_code,
                error_code,
                hint = hint.unwrap_or_default(),
                stderr = stderr.trim(),
                "command exited with non-zero status"
            );
        }
        Ok(CommandResult {
            exit_code,
            lines,
            failure,
        })
    }
}

fn spawn_reader<T, F>(read: F) -> Receiver<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(read());
    });
    receiver
}

// `None` when the pipe is still open at the deadline, e.g. held by a backgrounded descendant.
fn join_reader<T: Default>(reader: Option<Receiver<T>>, deadline: Instant) -> Option<T> {
    let Some(reader) = reader else {
        return Some(T::default());
    };
    match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(value) => Some(value),
        Err(RecvTimeoutError::Disconnected) => Some(T::default()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

pub fn run_lines<R: CommandRunner + ?Sized>(
    runner: &R,
    invocation: &Invocation,
    timeout: Duration,
) -> Result<CommandResult, ExecutionError> {
    let result = runner.run(invocation, true, timeout)?;
    if !result.success() {
        return Err(ExecutionError::NonZeroExit {
            command: invocation.render(),
            code: result.exit_code,
            failure: result.failure,
        });
    }
    Ok(result)
}

pub fn run_status<R: CommandRunner + ?Sized>(
    runner: &R,
    invocation: &Invocation,
    timeout: Duration,
) -> bool {
    match runner.run(invocation, false, timeout) {
        Ok(result) => result.success(),
        Err(err) => {
            warn!(command = %err.command(), error = %err, "command did not complete");
            false
        }
    }
}
