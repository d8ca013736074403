//! Container inspection via systemd-machined
//!
//! Resolves a container's identity (name, root directory, leader PID)
//! through `machinectl show` and snapshots the leader's environment from
//! `/proc/<leader>/environ`. The `Inspector` trait is the seam the
//! connection adapter consumes, so tests can substitute a fake.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{Error, Result};

/// Identity of a running machine as reported by inspection.
#[derive(Debug, Clone)]
pub struct MachineInfo {
    pub name: String,
    pub root_directory: PathBuf,
    pub leader: u32,
}

/// Everything the adapter holds about its target container.
///
/// Resolved once at connection setup and read-only afterwards. The
/// environment snapshot is taken from the leader process at construction
/// and kept for the adapter's lifetime; the leader PID recorded here is
/// only the initial one, command rewriting re-resolves it per call.
#[derive(Debug, Clone)]
pub struct ContainerContext {
    pub name: String,
    pub leader_pid: u32,
    pub root_directory: PathBuf,
    pub environment: HashMap<String, String>,
}

/// Collaborator interface for container metadata lookup.
pub trait Inspector: Send + Sync {
    /// Resolve a machine's current identity by name.
    fn show(&self, name: &str) -> Result<MachineInfo>;

    /// Snapshot the environment of the machine's leader process.
    fn environment(&self, leader: u32) -> Result<HashMap<String, String>>;
}

/// Real inspector backed by the `machinectl` binary and procfs.
pub struct Machinectl;

impl Inspector for Machinectl {
    fn show(&self, name: &str) -> Result<MachineInfo> {
        let output = Command::new("machinectl").arg("show").arg(name).output()?;
        if !output.status.success() {
            return Err(Error::Configuration(format!(
                "machinectl show {name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_show_output(&String::from_utf8_lossy(&output.stdout), name)
    }

    fn environment(&self, leader: u32) -> Result<HashMap<String, String>> {
        let raw = std::fs::read(format!("/proc/{leader}/environ"))?;
        Ok(parse_environ(&raw))
    }
}

/// Parse the `Key=Value` block printed by `machinectl show`.
///
/// `Name` must be present and non-empty, and `Leader` must be a valid
/// PID; either missing is a fatal configuration error, not a retryable
/// condition.
pub fn parse_show_output(output: &str, name: &str) -> Result<MachineInfo> {
    let shown_name = extract_field(output, "Name")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Configuration(format!("invalid machine name {name}")))?;

    let leader = extract_field(output, "Leader")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|pid| *pid != 0)
        .ok_or_else(|| {
            Error::Configuration(format!("machine {name} has no usable leader PID"))
        })?;

    let root_directory = extract_field(output, "RootDirectory")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::Configuration(format!("machine {name} has no root directory"))
        })?;

    Ok(MachineInfo {
        name: shown_name,
        root_directory,
        leader,
    })
}

fn extract_field(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v.to_string())
    })
}

/// Split a NUL-separated `KEY=VALUE` environ block into a map.
pub fn parse_environ(raw: &[u8]) -> HashMap<String, String> {
    String::from_utf8_lossy(raw)
        .split('\0')
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            record
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
