// src/error.rs

//! Error types for the image compiler
//!
//! Every failure inside the pipeline is fatal to the build. The variants
//! carry enough context (paths, argv, exit codes, item provenance) for
//! the caller to attribute a failure to a specific declared item.

use crate::items::PhaseOrder;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while compiling an image
#[derive(Error, Debug)]
pub enum Error {
    /// A resolved path left the subvolume root
    #[error("Path '{path}' escapes subvolume root {}", .root.display())]
    PathEscape { root: PathBuf, path: String },

    /// The top-level target of a stat operation is a symlink
    #[error("Refusing to set stat options on {}: it is a symlink", .0.display())]
    UnsafeSymlinkTarget(PathBuf),

    /// A privileged subprocess exited non-zero
    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The mode or ownership step of a stat application failed
    #[error("Failed to apply {step} to {}: {source}", .path.display())]
    StatApplication {
        step: &'static str,
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// An item failed; attributes the cause to its declaration
    #[error("{provenance}: {phase} phase failed: {source}")]
    Item {
        provenance: String,
        phase: PhaseOrder,
        #[source]
        source: Box<Error>,
    },

    /// A privileged subprocess exceeded its deadline and was killed
    #[error("Command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// A subprocess could not be started at all
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An item declaration is inconsistent or unsupported
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    /// A symbolic or numeric mode could not be parsed
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// The per-repository artifacts directory is in an inconsistent state
    #[error("Artifacts directory error: {0}")]
    ArtifactsDir(String),

    /// Layer configuration file failed to parse
    #[error("Failed to parse layer config: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for image compiler operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The exit code of the failing subprocess, looking through wrappers
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Command { exit_code, .. } => Some(*exit_code),
            Self::StatApplication { source, .. } | Self::Item { source, .. } => {
                source.exit_code()
            }
            _ => None,
        }
    }

    /// The innermost error, skipping attribution and stat wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::StatApplication { source, .. } | Self::Item { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

/// Attach item provenance to a failing result
pub(crate) trait ResultExt<T> {
    fn with_provenance(self, provenance: &str, phase: PhaseOrder) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_provenance(self, provenance: &str, phase: PhaseOrder) -> Result<T> {
        self.map_err(|e| Error::Item {
            provenance: provenance.to_string(),
            phase,
            source: Box::new(e),
        })
    }
}
