//! Prompt-detection protocol for escalated children
//!
//! Escalation prompts land on stdout or stderr and must be drained
//! before the child will accept the secret on stdin, but a blind
//! blocking read would hang forever when no prompt ever appears (wrong
//! secret, passwordless sudo misconfiguration). The protocol therefore
//! switches both output streams to non-blocking mode and multiplex-waits
//! with a bounded timeout, turning an indefinite hang into a diagnosable
//! failure carrying everything read so far.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::process::Child;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::debug;

use crate::error::{Error, Result};
use crate::escalate::{check_password_prompt, BecomeCommand};

const READ_CHUNK: usize = 8192;

/// Drive the child until a prompt or the success marker appears, then
/// deliver the secret if it is still needed.
///
/// On success both streams are back in blocking mode and the caller
/// performs the final join. On timeout or premature stream closure the
/// child is drained and reaped here and the error carries the output
/// observed up to that point.
pub(crate) fn negotiate(
    child: &mut Child,
    become_cmd: &BecomeCommand,
    password: &str,
    timeout: Duration,
) -> Result<()> {
    set_nonblocking(child, true)?;
    match watch_for_prompt(child, become_cmd, timeout) {
        Ok(observed) => {
            if !observed.contains(&become_cmd.success_marker) {
                // Prompt (exact or heuristic) broke the loop: type the
                // secret, exactly once.
                debug!("password prompt detected, delivering secret");
                let stdin = child
                    .stdin
                    .as_mut()
                    .ok_or_else(|| Error::Io(std::io::Error::other("child stdin not piped")))?;
                stdin.write_all(password.as_bytes())?;
                stdin.write_all(b"\n")?;
                stdin.flush()?;
            }
            set_nonblocking(child, false)?;
            Ok(())
        }
        Err(err) => {
            let _ = set_nonblocking(child, false);
            drain(child);
            Err(err)
        }
    }
}

/// Accumulate child output until the success marker is seen or a prompt
/// breaks the loop. Returns the observed output; the caller decides
/// whether the secret is still owed.
fn watch_for_prompt(
    child: &mut Child,
    become_cmd: &BecomeCommand,
    timeout: Duration,
) -> Result<String> {
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let poll_timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);

    let mut observed = String::new();
    while !observed.contains(&become_cmd.success_marker) {
        if !become_cmd.prompt.is_empty() && observed.ends_with(&become_cmd.prompt) {
            break;
        }
        if check_password_prompt(&observed) {
            break;
        }

        let (stdout_ready, stderr_ready) = {
            let (stdout_fd, stderr_fd) = stream_fds(child)?;
            let mut fds = [
                PollFd::new(stdout_fd, PollFlags::POLLIN),
                PollFd::new(stderr_fd, PollFlags::POLLIN),
            ];
            let ready = poll(&mut fds, poll_timeout)?;
            if ready == 0 {
                return Err(Error::PromptTimeout { output: observed });
            }
            (is_readable(&fds[0]), is_readable(&fds[1]))
        };

        let outcome = if stdout_ready {
            let stdout = child
                .stdout
                .as_mut()
                .ok_or_else(|| Error::Io(std::io::Error::other("child stdout not piped")))?;
            read_available(stdout)?
        } else if stderr_ready {
            let stderr = child
                .stderr
                .as_mut()
                .ok_or_else(|| Error::Io(std::io::Error::other("child stderr not piped")))?;
            read_available(stderr)?
        } else {
            continue;
        };

        match outcome {
            ReadOutcome::Data(bytes) => {
                observed.push_str(&String::from_utf8_lossy(&bytes));
            }
            ReadOutcome::Eof => {
                return Err(Error::StreamClosed { output: observed });
            }
            // A non-blocking read may come up empty without the stream
            // being closed; keep polling.
            ReadOutcome::WouldBlock => {}
        }
    }
    Ok(observed)
}

enum ReadOutcome {
    Data(Vec<u8>),
    Eof,
    WouldBlock,
}

fn read_available<R: Read>(stream: &mut R) -> std::io::Result<ReadOutcome> {
    let mut buf = [0u8; READ_CHUNK];
    match stream.read(&mut buf) {
        Ok(0) => Ok(ReadOutcome::Eof),
        Ok(n) => Ok(ReadOutcome::Data(buf[..n].to_vec())),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
        Err(err) => Err(err),
    }
}

fn is_readable(fd: &PollFd) -> bool {
    fd.revents().is_some_and(|revents| {
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

fn stream_fds(child: &Child) -> Result<(BorrowedFd<'_>, BorrowedFd<'_>)> {
    let stdout = child
        .stdout
        .as_ref()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stdout not piped")))?
        .as_fd();
    let stderr = child
        .stderr
        .as_ref()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stderr not piped")))?
        .as_fd();
    Ok((stdout, stderr))
}

/// Toggle O_NONBLOCK on both output streams.
fn set_nonblocking(child: &Child, enable: bool) -> Result<()> {
    let (stdout_fd, stderr_fd) = stream_fds(child)?;
    for fd in [stdout_fd, stderr_fd] {
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        let flags = if enable {
            flags | OFlag::O_NONBLOCK
        } else {
            flags & !OFlag::O_NONBLOCK
        };
        fcntl(fd, FcntlArg::F_SETFL(flags))?;
    }
    Ok(())
}

/// Blocking join on the failure path: close stdin, read both streams to
/// the end, reap the child. Output is discarded; the error already
/// carries what mattered.
fn drain(child: &mut Child) {
    drop(child.stdin.take());
    if let Some(mut stdout) = child.stdout.take() {
        let mut sink = Vec::new();
        let _ = stdout.read_to_end(&mut sink);
    }
    if let Some(mut stderr) = child.stderr.take() {
        let mut sink = Vec::new();
        let _ = stderr.read_to_end(&mut sink);
    }
    let _ = child.wait();
}
