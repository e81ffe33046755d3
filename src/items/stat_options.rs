// src/items/stat_options.rs

//! Helpers for setting `stat(2)` options (mode, ownership) on paths being
//! created inside the image.

use crate::error::{Error, Result};
use crate::subvol::appliance::identity_binds;
use crate::subvol::{BuildAppliance, Subvolume};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Default ownership when an item does not specify one
pub const DEFAULT_USER_GROUP: &str = "root:root";

/// File mode: either the full permission bits, or a symbolic delta like
/// `u+rx` which is applied on top of mode 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mode {
    Bits(u32),
    Symbolic(String),
}

impl Mode {
    /// Reject modes `chmod` would misinterpret
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Bits(bits) if *bits > 0o7777 => {
                Err(Error::InvalidMode(format!("{:o} has bits above 0o7777", bits)))
            }
            Self::Bits(_) => Ok(()),
            Self::Symbolic(s) => validate_symbolic(s),
        }
    }
}

impl From<u32> for Mode {
    fn from(bits: u32) -> Self {
        Self::Bits(bits)
    }
}

impl From<&str> for Mode {
    fn from(s: &str) -> Self {
        Self::Symbolic(s.to_string())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&mode_to_str(self))
    }
}

/// Each comma-separated clause is `[ugoa]*` followed by one or more
/// `[-+=][rwxXst]*` actions
fn validate_symbolic(s: &str) -> Result<()> {
    let invalid = || Error::InvalidMode(format!("'{}' is not a symbolic mode", s));
    if s.is_empty() {
        return Err(invalid());
    }
    for clause in s.split(',') {
        let rest = clause.trim_start_matches(['u', 'g', 'o', 'a']);
        let mut chars = rest.chars().peekable();
        if chars.peek().is_none() {
            return Err(invalid());
        }
        while let Some(op) = chars.next() {
            if !matches!(op, '-' | '+' | '=') {
                return Err(invalid());
            }
            while let Some(c) = chars.peek() {
                match c {
                    'r' | 'w' | 'x' | 'X' | 's' | 't' => {
                        chars.next();
                    }
                    '-' | '+' | '=' => break,
                    _ => return Err(invalid()),
                }
            }
        }
    }
    Ok(())
}

/// `chmod` argument for `mode`
///
/// Symbolic modes are prefixed with a clause clearing every bit, so the
/// result never depends on the target's pre-existing mode.
pub fn mode_to_str(mode: &Mode) -> String {
    match mode {
        Mode::Bits(bits) => format!("{:04o}", bits),
        Mode::Symbolic(s) => format!("a-rwxXst,{}", s),
    }
}

/// Mode and ownership requested for a path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatOptions {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub user_group: Option<String>,
}

impl StatOptions {
    pub fn new(mode: impl Into<Mode>, user_group: impl Into<String>) -> Self {
        Self {
            mode: Some(mode.into()),
            user_group: Some(user_group.into()),
        }
    }

    /// Fill in unset fields: `default_mode`, and `root:root`
    pub fn customize(&mut self, default_mode: impl Into<Mode>) {
        if self.mode.is_none() {
            self.mode = Some(default_mode.into());
        }
        if self.user_group.is_none() {
            self.user_group = Some(DEFAULT_USER_GROUP.to_string());
        }
    }

    /// Copy with defaults applied
    pub fn customized(&self, default_mode: impl Into<Mode>) -> Self {
        let mut stat = self.clone();
        stat.customize(default_mode);
        stat
    }

    pub fn user_group(&self) -> &str {
        self.user_group.as_deref().unwrap_or(DEFAULT_USER_GROUP)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(mode) = &self.mode {
            mode.validate()?;
        }
        if let Some(ug) = &self.user_group
            && (ug.is_empty() || ug.matches(':').count() != 1)
        {
            return Err(Error::InvalidItem(format!(
                "user_group '{}' must look like 'user:group'",
                ug
            )));
        }
        Ok(())
    }
}

/// Where the stat commands execute
enum Runner<'a> {
    Host(&'a Subvolume),
    Appliance(&'a BuildAppliance<'a>),
}

impl Runner<'_> {
    fn target(&self, subvol: &Subvolume, rel: &Path) -> Result<String> {
        let path = match self {
            Self::Host(_) => subvol.path(rel)?,
            Self::Appliance(ba) => ba.path(rel)?,
        };
        Ok(path.to_string_lossy().into_owned())
    }

    fn run(&self, argv: Vec<String>, with_identity: bool) -> Result<()> {
        match self {
            Self::Host(sv) => sv.run_as_root(argv, &[])?,
            Self::Appliance(ba) => {
                let binds = if with_identity { identity_binds() } else { Vec::new() };
                ba.run(argv, &binds)?
            }
        };
        Ok(())
    }
}

/// Fail with [`Error::UnsafeSymlinkTarget`] if the top-level target is a symlink
///
/// On the host the check is done in-process. Inside the appliance it is
/// `test ! -L`, and only a bare exit 1 (no stderr) means "symlink"; any
/// other failure came from the wrapper and is surfaced unchanged. A
/// missing target passes, leaving `chmod` to report it.
fn refuse_symlink_target(runner: &Runner<'_>, full_target_path: &Path, target: &str) -> Result<()> {
    let unsafe_target = || Error::UnsafeSymlinkTarget(full_target_path.to_path_buf());
    match runner {
        Runner::Host(_) => match std::fs::symlink_metadata(full_target_path) {
            Ok(meta) if meta.file_type().is_symlink() => Err(unsafe_target()),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
        Runner::Appliance(_) => {
            match runner.run(vec!["test".into(), "!".into(), "-L".into(), target.to_string()], false) {
                Err(Error::Command { exit_code: 1, ref stderr, .. }) if stderr.is_empty() => Err(unsafe_target()),
                other => other,
            }
        }
    }
}

/// Apply `stat` to `full_target_path` (a host path inside `subvol`)
///
/// Mode is applied recursively first, then ownership with
/// `--no-dereference --recursive`. Only the top-level target is checked
/// for being a symlink: `chmod` has no way to avoid following it, while
/// nested symlinks are handled per-entry by `chown --no-dereference`.
///
/// With a build appliance, the host's `/etc/passwd` and `/etc/group` are
/// mounted read-only for the `chown`, so `user:group` names resolve the
/// same way regardless of what the image contains.
pub fn build_stat_options(
    stat: &StatOptions,
    subvol: &Subvolume,
    full_target_path: &Path,
    appliance: Option<&BuildAppliance<'_>>,
    do_not_set_mode: bool,
) -> Result<()> {
    let rel = subvol.relative(full_target_path)?;
    let runner = match appliance {
        Some(ba) => Runner::Appliance(ba),
        None => Runner::Host(subvol),
    };
    let target = runner.target(subvol, &rel)?;
    refuse_symlink_target(&runner, full_target_path, &target)?;

    if do_not_set_mode {
        if stat.mode.is_some() {
            return Err(Error::InvalidItem(format!(
                "mode must not be set for {}",
                full_target_path.display()
            )));
        }
    } else {
        let mode = stat.mode.as_ref().ok_or_else(|| {
            Error::InvalidItem(format!(
                "no mode resolved for {}; customize() was not applied",
                full_target_path.display()
            ))
        })?;
        debug!("chmod {} {}", mode, target);
        runner
            .run(
                vec!["chmod".into(), "--recursive".into(), mode_to_str(mode), target.clone()],
                false,
            )
            .map_err(|e| Error::StatApplication {
                step: "mode",
                path: full_target_path.to_path_buf(),
                source: Box::new(e),
            })?;
    }

    runner
        .run(
            vec![
                "chown".into(),
                "--no-dereference".into(),
                "--recursive".into(),
                stat.user_group().to_string(),
                target,
            ],
            true,
        )
        .map_err(|e| Error::StatApplication {
            step: "ownership",
            path: full_target_path.to_path_buf(),
            source: Box::new(e),
        })?;

    Ok(())
}
