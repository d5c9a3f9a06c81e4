use crate::error::{classify_failure, ExecutionError};
use crate::exec::{CommandResult, CommandRunner, Invocation};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Lines(Vec<String>),
    Exit(i32),
    Fail(i32, &'static str),
    TimedOut,
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub capture_output: bool,
    pub timeout: Duration,
}

impl RecordedCall {
    pub fn line(&self) -> String {
        self.args.join(" ")
    }
}

#[derive(Default)]
pub(crate) struct MockRunner {
    calls: Mutex<Vec<RecordedCall>>,
    rules: Mutex<Vec<(String, Vec<Reply>)>>,
}

impl MockRunner {
    pub fn lines(lines: &[&str]) -> Reply {
        Reply::Lines(lines.iter().map(|line| line.to_string()).collect())
    }

    pub fn respond(&self, pattern: &str, reply: Reply) {
        let mut rules = self.rules.lock().unwrap();
        if let Some((_, replies)) = rules.iter_mut().find(|(p, _)| p == pattern) {
            replies.push(reply);
        } else {
            rules.push((pattern.to_string(), vec![reply]));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.line().contains(pattern))
            .count()
    }

    fn next_reply(&self, line: &str) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap();
        let (_, replies) = rules
            .iter_mut()
            .filter(|(pattern, _)| line.contains(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())?;
        if replies.len() > 1 {
            Some(replies.remove(0))
        } else {
            replies.first().cloned()
        }
    }
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        invocation: &Invocation,
        capture_output: bool,
        timeout: Duration,
    ) -> Result<CommandResult, ExecutionError> {
        let call = RecordedCall {
            program: invocation.program().to_string(),
            args: invocation.arguments().to_vec(),
            cwd: invocation.cwd().to_path_buf(),
            env: invocation.env().clone(),
            capture_output,
            timeout,
        };
        let line = call.line();
        self.calls.lock().unwrap().push(call);

        match self.next_reply(&line) {
            None => Ok(CommandResult::default()),
            Some(Reply::Lines(lines)) => Ok(CommandResult {
                exit_code: 0,
                lines: if capture_output { lines } else { Vec::new() },
                failure: None,
            }),
            Some(Reply::Exit(exit_code)) => Ok(CommandResult {
                exit_code,
                lines: Vec::new(),
                failure: Some(classify_failure("").0),
            }),
            Some(Reply::Fail(exit_code, stderr)) => Ok(CommandResult {
                exit_code,
                lines: Vec::new(),
                failure: Some(classify_failure(stderr).0),
            }),
            Some(Reply::TimedOut) => Err(ExecutionError::TimedOut {
                command: invocation.render(),
                timeout,
            }),
            Some(Reply::Hang) => {
                thread::sleep(timeout);
                Err(ExecutionError::TimedOut {
                    command: invocation.render(),
                    timeout,
                })
            }
        }
    }
}
