// src/lib.rs

//! Strata image compiler
//!
//! Builds immutable filesystem images by applying declarative items to a
//! copy-on-write subvolume.
//!
//! # Architecture
//!
//! - Items: closed set of declared mutations, each assigned to a phase
//! - Phases: totally ordered; the parent layer first, foreign commands last
//! - Subvolume: the one mutable tree; every path is confined to its root
//! - Executor: all root-privileged work goes through one explicit capability
//! - Build appliance: trusted tools and identity databases for mutating
//!   an untrusted or incomplete image

pub mod artifacts_dir;
pub mod compiler;
pub mod config;
mod error;
pub mod exec;
pub mod items;
pub mod subvol;

pub use compiler::{BuildState, compile_items, group_by_phase};
pub use config::{LayerConfig, LayerOpts};
pub use error::{Error, Result};
pub use exec::{BindMount, CommandOutput, CommandSpec, Escalation, HostExecutor, PrivilegedExecutor, RecordingExecutor};
pub use items::{Item, Mode, PhaseOrder, StatOptions};
pub use subvol::{BuildAppliance, Subvolume};
