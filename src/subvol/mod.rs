// src/subvol/mod.rs

//! Copy-on-write subvolumes as build targets
//!
//! A [`Subvolume`] is the one mutable tree a layer build writes to. It
//! resolves logical image paths (`/etc/passwd`) to host paths confined
//! under its root, and funnels every privileged command through the
//! [`PrivilegedExecutor`] it was constructed with.
//!
//! The copy-on-write engine itself is external; this module only drives
//! it (`btrfs subvolume create|snapshot`, `btrfs property set`).

pub mod appliance;
pub mod nspawn;

pub use appliance::BuildAppliance;
pub use nspawn::Nspawn;

use crate::error::{Error, Result};
use crate::exec::{BindMount, CommandOutput, CommandSpec, PrivilegedExecutor};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One writable (or frozen) image tree
#[derive(Clone)]
pub struct Subvolume {
    root: PathBuf,
    read_only: bool,
    executor: Arc<dyn PrivilegedExecutor>,
}

impl fmt::Debug for Subvolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subvolume")
            .field("root", &self.root)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Subvolume {
    /// Wrap an existing (or about-to-be-created) subvolume path
    pub fn new(root: impl Into<PathBuf>, executor: Arc<dyn PrivilegedExecutor>) -> Self {
        Self {
            root: root.into(),
            read_only: false,
            executor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn executor(&self) -> &Arc<dyn PrivilegedExecutor> {
        &self.executor
    }

    /// Resolve a logical image path to a host path under the root
    ///
    /// Absolute and relative logical paths are both taken relative to the
    /// image root. `..` is resolved lexically; climbing above the root is
    /// a [`Error::PathEscape`], never clamped.
    pub fn path(&self, logical: impl AsRef<Path>) -> Result<PathBuf> {
        let logical = logical.as_ref();
        let mut parts = Vec::new();
        for component in logical.components() {
            match component {
                Component::Normal(c) => parts.push(c),
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(self.escape(logical));
                    }
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);
        if !resolved.starts_with(&self.root) {
            return Err(self.escape(logical));
        }
        Ok(resolved)
    }

    /// Inverse of [`Subvolume::path`]: the image-relative part of a host path
    pub fn relative(&self, host_path: impl AsRef<Path>) -> Result<PathBuf> {
        let host_path = host_path.as_ref();
        // Re-normalize so `root/a/../..` cannot sneak through strip_prefix
        let rel = host_path
            .strip_prefix(&self.root)
            .map_err(|_| self.escape(host_path))?;
        let normalized = self.path(rel)?;
        Ok(normalized
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_default())
    }

    /// Whether something (including a dangling symlink) exists at `logical`
    pub fn exists(&self, logical: impl AsRef<Path>) -> Result<bool> {
        let path = self.path(logical)?;
        match std::fs::symlink_metadata(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `logical` is a directory (not following a final symlink)
    pub fn is_dir(&self, logical: impl AsRef<Path>) -> Result<bool> {
        let path = self.path(logical)?;
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `argv` as root, exposing `binds` to it
    ///
    /// Fails with [`Error::Command`] on non-zero exit.
    pub fn run_as_root<I, S>(&self, argv: I, binds: &[BindMount]) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_command(&CommandSpec::new(argv).with_binds(binds.iter().cloned()))
    }

    /// Run a fully specified command as root
    ///
    /// Without an explicit `cwd` the command runs inside the subvolume,
    /// once it exists.
    pub fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut spec = spec.clone();
        if spec.cwd.is_none() && self.root.is_dir() {
            spec.cwd = Some(self.root.clone());
        }
        debug!("[{}] {}", self.root.display(), spec.display());
        let output = self.executor.execute(&spec)?;
        if !output.is_success() {
            return Err(Error::Command {
                command: spec.display(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim_end().to_string(),
            });
        }
        Ok(output)
    }

    /// A `systemd-nspawn` invocation whose root is this subvolume
    pub fn nspawn(&self) -> Nspawn {
        Nspawn::new(&self.root)
    }

    /// Create this subvolume empty
    pub fn create(&self) -> Result<()> {
        info!("Creating empty subvolume {}", self.root.display());
        self.run_as_root(
            ["btrfs".to_string(), "subvolume".into(), "create".into(), self.root_str()],
            &[],
        )?;
        Ok(())
    }

    /// Create this subvolume as a copy-on-write snapshot of `parent`
    pub fn snapshot_from(&self, parent: &Subvolume) -> Result<()> {
        info!(
            "Snapshotting {} into {}",
            parent.root.display(),
            self.root.display()
        );
        self.run_as_root(
            [
                "btrfs".to_string(),
                "subvolume".into(),
                "snapshot".into(),
                parent.root_str(),
                self.root_str(),
            ],
            &[],
        )?;
        Ok(())
    }

    /// Freeze or thaw the subvolume at the storage layer
    pub fn set_readonly(&mut self, read_only: bool) -> Result<()> {
        self.run_as_root(
            [
                "btrfs".to_string(),
                "property".into(),
                "set".into(),
                "-ts".into(),
                self.root_str(),
                "ro".into(),
                read_only.to_string(),
            ],
            &[],
        )?;
        self.read_only = read_only;
        Ok(())
    }

    fn root_str(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    fn escape(&self, path: &Path) -> Error {
        Error::PathEscape {
            root: self.root.clone(),
            path: path.to_string_lossy().into_owned(),
        }
    }
}
