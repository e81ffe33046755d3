// src/items/install_file.rs

//! Copy a host file into the image

use super::stat_options::{StatOptions, build_stat_options};
use crate::error::{Error, Result};
use crate::subvol::{BuildAppliance, Subvolume};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFileItem {
    pub from_target: String,
    /// Host file to copy
    pub source: PathBuf,
    /// Image path to create; must not exist yet
    pub dest: PathBuf,
    #[serde(flatten)]
    pub stat: StatOptions,
}

impl InstallFileItem {
    pub fn new(from_target: impl Into<String>, source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            from_target: from_target.into(),
            source: source.into(),
            dest: dest.into(),
            stat: StatOptions::default(),
        }
    }

    pub fn with_stat(mut self, stat: StatOptions) -> Self {
        self.stat = stat;
        self
    }

    pub fn build(&self, subvol: &Subvolume, appliance: Option<&BuildAppliance<'_>>) -> Result<()> {
        let meta = std::fs::metadata(&self.source)?;
        if !meta.is_file() {
            return Err(Error::InvalidItem(format!(
                "install source {} is not a regular file",
                self.source.display()
            )));
        }

        let dest = subvol.path(&self.dest)?;
        if subvol.exists(&self.dest)? {
            return Err(Error::InvalidItem(format!(
                "install destination {} already exists",
                self.dest.display()
            )));
        }
        let parent = self.dest.parent().unwrap_or(Path::new("/"));
        if !subvol.is_dir(parent)? {
            return Err(Error::InvalidItem(format!(
                "install destination parent {} is not a directory",
                parent.display()
            )));
        }

        subvol.run_as_root(
            [
                "cp".to_string(),
                "--no-target-directory".into(),
                self.source.to_string_lossy().into_owned(),
                dest.to_string_lossy().into_owned(),
            ],
            &[],
        )?;

        let stat = self.stat.customized(default_mode(meta.permissions().mode()));
        build_stat_options(&stat, subvol, &dest, appliance, false)
    }
}

/// Read-only by default; executables stay executable
fn default_mode(source_mode: u32) -> u32 {
    if source_mode & 0o111 != 0 { 0o555 } else { 0o444 }
}
