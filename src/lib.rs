//! nsrun: run commands inside systemd-machined containers via nsenter
//!
//! The adapter attaches child processes to a container's namespaces by
//! prefixing each command with an `nsenter` invocation targeting the
//! container's leader PID, with transparent support for sudo escalation
//! (password prompt detection over non-blocking pipes) and the compound
//! operators `&&`, `||` and `;`.

pub mod compose;
pub mod connection;
pub mod error;
pub mod escalate;
pub mod machine;
pub mod runner;

pub use connection::{Connection, ConnectionConfig, ExecRequest};
pub use error::{Error, Result};
pub use runner::ExecutionResult;
