//! Escalating process runner
//!
//! Executes fully-composed command lines as child processes, optionally
//! through a privilege-escalation wrapper, and applies short-circuit
//! policy across compound chains. Single-threaded: exactly one child is
//! active per `execute_one` call and its three standard streams are fully
//! drained before the call returns.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::compose::{Operator, SubCommand};
use crate::error::{Error, Result};
use crate::escalate::BecomeCommand;

mod prompt;

/// Default bound on the multiplex wait for a password prompt.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how the runner launches children.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Working directory for every spawned child.
    pub basedir: PathBuf,
    /// Bound on each multiplex wait while awaiting a password prompt.
    /// The final join after the prompt phase is deliberately unbounded;
    /// a never-terminating child blocks the caller.
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            basedir: PathBuf::from("."),
            timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }
}

/// Outcome of one executed command. Immutable once produced; a non-zero
/// exit code is ordinary data, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A built escalation invocation plus the secret to deliver.
///
/// The prompt-detection protocol only runs when `password` is set;
/// without a secret there is nothing to type and the child is simply
/// joined.
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub command: BecomeCommand,
    pub password: Option<String>,
}

/// Execute one command line as a child process.
///
/// With `escalation` set the launch line is the escalation wrapper and,
/// if a secret is configured, stdout/stderr are switched to non-blocking
/// mode to run the prompt-detection protocol before the final join.
/// Otherwise the command runs under `executable -c` when an interpreter
/// is given, or under `/bin/sh -c`.
pub fn execute_one(
    cmd: &str,
    executable: Option<&str>,
    escalation: Option<&EscalationRequest>,
    config: &RunnerConfig,
) -> Result<ExecutionResult> {
    let mut command = build_launch(cmd, executable, escalation);
    command
        .current_dir(&config.basedir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(%cmd, escalated = escalation.is_some(), "spawning child");
    let mut child = command.spawn()?;

    if let Some(request) = escalation {
        if let Some(password) = request.password.as_deref() {
            prompt::negotiate(&mut child, &request.command, password, config.timeout)?;
        }
    }

    // Unbounded join: collect remaining output and the exit status.
    let output = child.wait_with_output()?;
    Ok(ExecutionResult {
        exit_code: exit_code_of(output.status),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run an ordered sub-command chain, applying short-circuit policy.
///
/// `run` executes a single sub-command; this function decides whether the
/// next one runs based on the previous exit code and the joining
/// operator. For AND the next runs only on exit 0, for OR only on
/// non-zero exit, and for SEQ unconditionally with the earlier result
/// kept as the aggregate. Sub-commands execute strictly left to right;
/// an untaken branch is never executed.
pub fn execute_chain<F>(subs: &[SubCommand], mut run: F) -> Result<ExecutionResult>
where
    F: FnMut(&SubCommand) -> Result<ExecutionResult>,
{
    chain_step(subs, &mut run)
}

fn chain_step<F>(subs: &[SubCommand], run: &mut F) -> Result<ExecutionResult>
where
    F: FnMut(&SubCommand) -> Result<ExecutionResult>,
{
    let Some((head, rest)) = subs.split_first() else {
        return Err(Error::ChainCondition);
    };
    let result = run(head)?;
    match head.next {
        None => Ok(result),
        Some(Operator::And) => {
            if result.exit_code != 0 {
                Ok(result)
            } else {
                chain_step(rest, run)
            }
        }
        Some(Operator::Or) => {
            if result.exit_code == 0 {
                Ok(result)
            } else {
                chain_step(rest, run)
            }
        }
        Some(Operator::Seq) => {
            // The rest of the chain runs for its effects; the result of
            // the sub-command before the ';' is the aggregate.
            chain_step(rest, run)?;
            Ok(result)
        }
    }
}

fn build_launch(
    cmd: &str,
    executable: Option<&str>,
    escalation: Option<&EscalationRequest>,
) -> Command {
    let interpreter = executable
        .map(str::split_whitespace)
        .and_then(|mut parts| parts.next());

    if let Some(request) = escalation {
        // The escalation wrapper is a single shell line.
        let mut command = Command::new(interpreter.unwrap_or("/bin/sh"));
        command.arg("-c").arg(&request.command.launch_line);
        command
    } else if let Some(program) = interpreter {
        let mut command = Command::new(program);
        if let Some(exe) = executable {
            command.args(exe.split_whitespace().skip(1));
        }
        command.arg("-c").arg(cmd);
        command
    } else {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(cmd);
        command
    }
}

/// Map an exit status to an integer, encoding a terminating signal as
/// its negation, mirroring the convention callers of the original
/// interface expect.
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(-1, |sig| -sig))
}
