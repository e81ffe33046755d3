// src/items/foreign_layer.rs

//! Foreign layer: run an arbitrary command against the nearly-final image
//!
//! The command runs in a non-booted container rooted at the subvolume, so
//! it sees every earlier phase's result as `/`. Reserved bookkeeping
//! directories are write-protected for the duration of the command by
//! bind-mounting each onto itself and remounting the bind read-only. A
//! protected path that does not exist is left alone; protection never
//! creates it.
//!
//! The protection is released after the command returns, whether it
//! succeeded or not.

use super::{PhaseBuilder, PhaseOrder};
use crate::config::LayerOpts;
use crate::error::{Error, Result, ResultExt};
use crate::exec::BindMount;
use crate::subvol::Subvolume;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

fn default_user() -> String {
    "root".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignLayerItem {
    pub from_target: String,
    /// argv, executed inside the image; not passed through a shell
    pub cmd: Vec<String>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host repo-snapshot directories, mounted read-only at the same path
    #[serde(default)]
    pub serve_rpm_snapshots: Vec<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ForeignLayerItem {
    pub fn new<I, S>(from_target: impl Into<String>, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from_target: from_target.into(),
            cmd: cmd.into_iter().map(Into::into).collect(),
            user: default_user(),
            env: BTreeMap::new(),
            serve_rpm_snapshots: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn phase(&self) -> PhaseOrder {
        PhaseOrder::ForeignLayer
    }

    pub fn validate(&self) -> Result<()> {
        if self.cmd.is_empty() {
            return Err(Error::InvalidItem("foreign_layer cmd is empty".to_string()));
        }
        if self.user.is_empty() {
            return Err(Error::InvalidItem("foreign_layer user is empty".to_string()));
        }
        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(Error::InvalidItem(format!("bad environment variable name '{}'", key)));
        }
        if let Some(dir) = self.serve_rpm_snapshots.iter().find(|d| !d.is_absolute()) {
            return Err(Error::InvalidItem(format!(
                "snapshot directory {} must be absolute",
                dir.display()
            )));
        }
        Ok(())
    }

    fn build(&self, subvol: &Subvolume, protected_paths: &[String]) -> Result<()> {
        self.validate()?;
        let mut guard = ProtectionGuard::new(subvol);
        for path in protected_paths {
            guard.protect(path)?;
        }

        let mut nspawn = subvol
            .nspawn()
            .user(&self.user)
            .binds(
                self.serve_rpm_snapshots
                    .iter()
                    .map(|dir| BindMount::readonly(dir, dir)),
            )
            .timeout(self.timeout_secs.map(Duration::from_secs));
        for (key, value) in &self.env {
            nspawn = nspawn.setenv(key, value);
        }

        info!("Running foreign command: {}", self.cmd.join(" "));
        let result = subvol.run_command(&nspawn.command(self.cmd.iter().cloned()));
        let released = guard.release();
        match (result, released) {
            (Err(e), Err(cleanup)) => {
                warn!("Failed to release protected paths: {}", cleanup);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), released) => released,
        }
    }
}

/// Read-only self bind mounts over protected paths, undone on release
///
/// Dropping an unreleased guard still unmounts, logging failures.
struct ProtectionGuard<'a> {
    subvol: &'a Subvolume,
    mounted: Vec<PathBuf>,
}

impl<'a> ProtectionGuard<'a> {
    fn new(subvol: &'a Subvolume) -> Self {
        Self {
            subvol,
            mounted: Vec::new(),
        }
    }

    fn protect(&mut self, logical: &str) -> Result<()> {
        let host = self.subvol.path(logical)?;
        if !self.subvol.exists(logical)? {
            debug!("Protected path {} absent, skipping", logical);
            return Ok(());
        }
        if !self.subvol.is_dir(logical)? {
            return Err(Error::InvalidItem(format!(
                "protected path {} is not a directory",
                logical
            )));
        }

        let target = host.to_string_lossy().into_owned();
        self.subvol.run_as_root(
            ["mount".to_string(), "--bind".into(), target.clone(), target.clone()],
            &[],
        )?;
        // Tracked before the remount so a failed remount is still unmounted
        self.mounted.push(host);
        self.subvol.run_as_root(
            ["mount".to_string(), "-o".into(), "remount,bind,ro".into(), target],
            &[],
        )?;
        Ok(())
    }

    /// Unmount in reverse order; every mount is attempted, first error wins
    fn release(mut self) -> Result<()> {
        self.unmount_all()
    }

    fn unmount_all(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(path) = self.mounted.pop() {
            if let Err(e) = unmount(self.subvol, &path)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for ProtectionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.unmount_all() {
            warn!("Failed to release protected paths: {}", e);
        }
    }
}

fn unmount(subvol: &Subvolume, path: &Path) -> Result<()> {
    subvol.run_as_root(["umount".to_string(), path.to_string_lossy().into_owned()], &[])?;
    Ok(())
}

pub(super) fn get_phase_builder(items: Vec<ForeignLayerItem>, opts: &LayerOpts) -> PhaseBuilder<'_> {
    Box::new(move |subvol: &Subvolume| {
        for item in &items {
            item.build(subvol, &opts.protected_paths)
                .with_provenance(&item.from_target, PhaseOrder::ForeignLayer)?;
        }
        Ok(())
    })
}
