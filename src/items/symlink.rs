// src/items/symlink.rs

//! Create a symlink inside the image

use crate::error::{Error, Result};
use crate::subvol::{BuildAppliance, Subvolume};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkItem {
    pub from_target: String,
    /// Image path the link points at; must exist
    pub source: PathBuf,
    /// Image path of the link itself; must not exist
    pub dest: PathBuf,
}

impl SymlinkItem {
    pub fn new(from_target: impl Into<String>, source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            from_target: from_target.into(),
            source: source.into(),
            dest: dest.into(),
        }
    }

    /// The link text is the absolute image path of `source`, so it
    /// resolves correctly once the image is mounted as `/`.
    pub fn build(&self, subvol: &Subvolume, appliance: Option<&BuildAppliance<'_>>) -> Result<()> {
        let source_host = subvol.path(&self.source)?;
        let link_text = Path::new("/").join(subvol.relative(&source_host)?);
        if !subvol.exists(&self.source)? {
            return Err(Error::InvalidItem(format!(
                "symlink source {} does not exist in the image",
                link_text.display()
            )));
        }
        let dest = subvol.path(&self.dest)?;
        if subvol.exists(&self.dest)? {
            return Err(Error::InvalidItem(format!(
                "symlink destination {} already exists",
                self.dest.display()
            )));
        }

        subvol.run_as_root(
            [
                "ln".to_string(),
                "--symbolic".into(),
                "--no-target-directory".into(),
                link_text.to_string_lossy().into_owned(),
                dest.to_string_lossy().into_owned(),
            ],
            &[],
        )?;

        // Links have no meaningful mode, only an owner
        let chown = |target: String| {
            vec![
                "chown".to_string(),
                "--no-dereference".into(),
                "root:root".into(),
                target,
            ]
        };
        match appliance {
            Some(ba) => ba.run(chown(ba.path(&self.dest)?.to_string_lossy().into_owned()), &[])?,
            None => subvol.run_as_root(chown(dest.to_string_lossy().into_owned()), &[])?,
        };
        Ok(())
    }
}
