// src/items/remove_path.rs

//! Remove a path from the image

use crate::error::{Error, Result};
use crate::subvol::Subvolume;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePathItem {
    pub from_target: String,
    pub path: PathBuf,
    /// Fail when nothing is there to remove
    #[serde(default)]
    pub must_exist: bool,
}

impl RemovePathItem {
    pub fn new(from_target: impl Into<String>, path: impl Into<PathBuf>, must_exist: bool) -> Self {
        Self {
            from_target: from_target.into(),
            path: path.into(),
            must_exist,
        }
    }

    pub fn build(&self, subvol: &Subvolume) -> Result<()> {
        let target = subvol.path(&self.path)?;
        if target == subvol.root() {
            return Err(Error::InvalidItem("refusing to remove the image root".to_string()));
        }
        if !subvol.exists(&self.path)? {
            if self.must_exist {
                return Err(Error::InvalidItem(format!(
                    "{} does not exist",
                    self.path.display()
                )));
            }
            debug!("{} absent, nothing to remove", self.path.display());
            return Ok(());
        }

        subvol.run_as_root(
            [
                "rm".to_string(),
                "--recursive".into(),
                "--force".into(),
                "--one-file-system".into(),
                target.to_string_lossy().into_owned(),
            ],
            &[],
        )?;
        Ok(())
    }
}
