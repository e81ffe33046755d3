// src/exec/mod.rs

//! Privileged command execution
//!
//! All root-privileged work (snapshotting, chmod/chown, foreign commands)
//! goes through a [`PrivilegedExecutor`] handed to the subvolume, never
//! through ambient `sudo` calls sprinkled over the code. Production builds
//! use [`HostExecutor`]; tests use [`RecordingExecutor`] to observe the
//! exact argv the compiler would run.

mod host;
mod recording;

pub use host::{Escalation, HostExecutor};
pub use recording::RecordingExecutor;

use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;

/// A host path made visible at another path, read-only unless stated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Source path on host
    pub source: PathBuf,
    /// Target path in the command's view
    pub target: PathBuf,
    /// Whether to mount read-write (default is read-only)
    pub writable: bool,
}

impl BindMount {
    pub fn readonly(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: false,
        }
    }

    pub fn writable(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: true,
        }
    }
}

/// A single privileged invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Host paths bound into the command; read-only unless marked writable
    pub binds: Vec<BindMount>,
    /// Working directory; `None` inherits the caller's
    pub cwd: Option<PathBuf>,
    /// Wall-clock deadline; `None` waits forever
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_binds(mut self, mounts: impl IntoIterator<Item = BindMount>) -> Self {
        self.binds.extend(mounts);
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable rendering for logs and error messages
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or -1 if the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability to run commands with root privilege
///
/// `execute` returns the output for *any* exit status; it only fails when
/// the command could not be run to completion (spawn failure, timeout).
/// Mapping a non-zero exit to an error is the caller's decision.
pub trait PrivilegedExecutor: Send + Sync {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}
