//! The nsenter connection adapter
//!
//! Owns exactly one target container. Commands submitted through
//! `execute_command` are decomposed into sub-commands, rewritten with the
//! container's environment and the namespace-entry prefix, and executed
//! by the runner with short-circuit semantics across `&&`, `||` and `;`.
//! File transfers resolve paths against the container's root directory
//! and copy on the host side.
//!
//! Not safe for concurrent use against the same instance: nothing here
//! mutates shared state, but the namespace-entry session to one
//! container is effectively serial, so callers should serialize.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::compose::{self, SubCommand};
use crate::error::{Error, Result};
use crate::escalate::{self, BecomeConfig, SUPPORTED_METHODS};
use crate::machine::{ContainerContext, Inspector, Machinectl};
use crate::runner::{self, EscalationRequest, ExecutionResult, RunnerConfig, DEFAULT_PROMPT_TIMEOUT};

/// Connection-wide settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Working directory for spawned children.
    pub basedir: PathBuf,
    /// Bound on each wait for a password prompt during escalation.
    pub timeout: Duration,
    /// Escalation settings; `None` disables escalation even for
    /// sudoable requests.
    pub become_config: Option<BecomeConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            basedir: PathBuf::from("."),
            timeout: DEFAULT_PROMPT_TIMEOUT,
            become_config: None,
        }
    }
}

/// One command submission.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Raw command line; may carry leading `KEY=VALUE` assignments and
    /// compound operators.
    pub command: String,
    /// Accepted for interface parity with the orchestrating host; the
    /// adapter does not use it.
    pub tmp_path: Option<PathBuf>,
    /// Target user override for this call.
    pub become_user: Option<String>,
    /// Whether escalation may be applied to this call.
    pub sudoable: bool,
    /// Interpreter for the command, `/bin/sh` by default.
    pub executable: Option<String>,
    /// Pipelined input. Unsupported; any non-empty value is rejected
    /// before a process is spawned.
    pub in_data: Option<Vec<u8>>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        ExecRequest {
            command: command.into(),
            tmp_path: None,
            become_user: None,
            sudoable: false,
            executable: Some("/bin/sh".to_string()),
            in_data: None,
        }
    }
}

/// Adapter bound to a single container.
pub struct Connection {
    context: ContainerContext,
    config: ConnectionConfig,
    inspector: Box<dyn Inspector>,
}

impl Connection {
    /// Open a connection to the named machine via `machinectl`.
    ///
    /// Preconditions are checked here, once: the process must run as
    /// root (or be configured to become root), and `machinectl` and
    /// `nsenter` must be on PATH. Failures are `Configuration` errors,
    /// never retried.
    pub fn new(name: &str, config: ConnectionConfig) -> Result<Self> {
        let becomes_root = config
            .become_config
            .as_ref()
            .is_some_and(|become_config| become_config.user == "root");
        if !nix::unistd::geteuid().is_root() && !becomes_root {
            return Err(Error::Configuration(
                "nsenter connection requires running as root".to_string(),
            ));
        }
        for binary in ["machinectl", "nsenter"] {
            which::which(binary)
                .map_err(|_| Error::Configuration(format!("{binary} not found in PATH")))?;
        }
        Self::with_inspector(name, config, Box::new(Machinectl))
    }

    /// Build a connection through a caller-supplied inspector.
    ///
    /// Skips the privilege and binary preflight of [`Connection::new`];
    /// the caller asserts the environment is usable.
    pub fn with_inspector(
        name: &str,
        config: ConnectionConfig,
        inspector: Box<dyn Inspector>,
    ) -> Result<Self> {
        let info = inspector.show(name)?;
        let environment = inspector.environment(info.leader)?;
        let context = ContainerContext {
            name: info.name,
            leader_pid: info.leader,
            root_directory: info.root_directory,
            environment,
        };
        Ok(Connection {
            context,
            config,
            inspector,
        })
    }

    /// No-op validation hook; the adapter is ready as constructed.
    pub fn connect(&self) -> &Self {
        debug!(
            machine = %self.context.name,
            root = %self.context.root_directory.display(),
            "container root resolved"
        );
        self
    }

    pub fn context(&self) -> &ContainerContext {
        &self.context
    }

    /// Run a command line inside the container.
    ///
    /// Decomposes `request.command` at `&&`, `||` and `;`, rewrites each
    /// sub-command for namespace entry, and executes them left to right
    /// under short-circuit policy. The result is the decisive
    /// sub-command's exit code and output.
    pub fn execute_command(&self, request: &ExecRequest) -> Result<ExecutionResult> {
        self.sanitize(request)?;
        let subs = compose::split_compound(&request.command);
        runner::execute_chain(&subs, |sub| self.run_sub(sub, request))
    }

    fn sanitize(&self, request: &ExecRequest) -> Result<()> {
        if request.sudoable {
            if let Some(become_config) = &self.config.become_config {
                if !SUPPORTED_METHODS.contains(&become_config.method.as_str()) {
                    return Err(Error::UnsupportedEscalationMethod(
                        become_config.method.clone(),
                    ));
                }
            }
        }
        if request.in_data.as_ref().is_some_and(|data| !data.is_empty()) {
            return Err(Error::UnsupportedFeature(
                "pipelined module input".to_string(),
            ));
        }
        Ok(())
    }

    fn run_sub(&self, sub: &SubCommand, request: &ExecRequest) -> Result<ExecutionResult> {
        // The leader process can change between invocations; resolve it
        // fresh for every sub-command.
        let leader = self.inspector.show(&self.context.name)?.leader;
        let cmd = compose::rewrite_for_namespace(sub, &self.context.environment, leader);

        let escalation = if request.sudoable {
            self.config
                .become_config
                .as_ref()
                .map(|become_config| EscalationRequest {
                    command: escalate::build_become_command(
                        &cmd,
                        become_config,
                        request.become_user.as_deref(),
                        request.executable.as_deref(),
                    ),
                    password: become_config.password.clone(),
                })
        } else {
            None
        };

        debug!(machine = %self.context.name, %cmd, "EXEC");
        let runner_config = RunnerConfig {
            basedir: self.config.basedir.clone(),
            timeout: self.config.timeout,
        };
        runner::execute_one(
            &cmd,
            request.executable.as_deref(),
            escalation.as_ref(),
            &runner_config,
        )
    }

    /// Copy a local file into the container's root filesystem.
    pub fn put_file(&self, local_src: &Path, container_dest: &str) -> Result<()> {
        debug!(
            machine = %self.context.name,
            src = %local_src.display(),
            dest = container_dest,
            "PUT"
        );
        if !local_src.exists() {
            return Err(Error::FileNotFound(local_src.to_path_buf()));
        }
        let dest = self.resolve_container_path(container_dest);
        std::fs::copy(local_src, &dest).map_err(|source| Error::Copy {
            src: local_src.to_path_buf(),
            dest,
            source,
        })?;
        Ok(())
    }

    /// Copy a file out of the container's root filesystem over an
    /// existing local file.
    pub fn fetch_file(&self, container_src: &str, local_dest: &Path) -> Result<()> {
        debug!(
            machine = %self.context.name,
            src = container_src,
            dest = %local_dest.display(),
            "FETCH"
        );
        if !local_dest.exists() {
            return Err(Error::FileNotFound(local_dest.to_path_buf()));
        }
        let src = self.resolve_container_path(container_src);
        std::fs::copy(&src, local_dest).map_err(|source| Error::Copy {
            src,
            dest: local_dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// No-op; there is nothing to tear down.
    pub fn close(&self) {}

    fn resolve_container_path(&self, relative: &str) -> PathBuf {
        self.context
            .root_directory
            .join(relative.trim_start_matches('/'))
    }
}
