// src/items/make_dirs.rs

//! Create a directory chain inside an existing image directory

use super::stat_options::{StatOptions, build_stat_options};
use crate::error::{Error, Result};
use crate::subvol::{BuildAppliance, Subvolume};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Default mode for newly created directories
pub const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeDirsItem {
    pub from_target: String,
    /// Existing image directory the new chain is created under
    pub into_dir: PathBuf,
    /// Relative chain of directories to create
    pub path_to_make: PathBuf,
    #[serde(flatten)]
    pub stat: StatOptions,
}

impl MakeDirsItem {
    pub fn new(
        from_target: impl Into<String>,
        into_dir: impl Into<PathBuf>,
        path_to_make: impl Into<PathBuf>,
    ) -> Self {
        Self {
            from_target: from_target.into(),
            into_dir: into_dir.into(),
            path_to_make: path_to_make.into(),
            stat: StatOptions::default(),
        }
    }

    pub fn with_stat(mut self, stat: StatOptions) -> Self {
        self.stat = stat;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.stat.validate()?;
        let plain = !self.path_to_make.as_os_str().is_empty()
            && self
                .path_to_make
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain {
            return Err(Error::InvalidItem(format!(
                "path_to_make '{}' must be a plain relative path",
                self.path_to_make.display()
            )));
        }
        Ok(())
    }

    /// Create every missing component; stat options go on the outermost
    /// newly created directory, recursively
    ///
    /// Directories that already exist keep their mode and ownership.
    pub fn build(&self, subvol: &Subvolume, appliance: Option<&BuildAppliance<'_>>) -> Result<()> {
        self.validate()?;
        if !subvol.is_dir(&self.into_dir)? {
            return Err(Error::InvalidItem(format!(
                "into_dir {} is not a directory in the image",
                self.into_dir.display()
            )));
        }

        let Some(outermost) = self.first_missing(subvol)? else {
            debug!(
                "{} already exists under {}",
                self.path_to_make.display(),
                self.into_dir.display()
            );
            return Ok(());
        };

        let full = subvol.path(self.into_dir.join(&self.path_to_make))?;
        subvol.run_as_root(
            [
                "mkdir".to_string(),
                "--parents".into(),
                full.to_string_lossy().into_owned(),
            ],
            &[],
        )?;

        let stat = self.stat.customized(DEFAULT_DIR_MODE);
        build_stat_options(&stat, subvol, &subvol.path(&outermost)?, appliance, false)
    }

    fn first_missing(&self, subvol: &Subvolume) -> Result<Option<PathBuf>> {
        let mut logical = self.into_dir.clone();
        for component in self.path_to_make.components() {
            logical.push(component);
            if !subvol.exists(&logical)? {
                return Ok(Some(logical));
            }
            if !subvol.is_dir(&logical)? {
                return Err(Error::InvalidItem(format!(
                    "{} exists and is not a directory",
                    Path::new("/").join(&logical).display()
                )));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RecordingExecutor;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<RecordingExecutor>, Subvolume) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("srv/www")).unwrap();
        let exec = Arc::new(RecordingExecutor::new());
        let sv = Subvolume::new(temp.path(), exec.clone());
        (temp, exec, sv)
    }

    #[test]
    fn test_stat_applies_to_outermost_new_dir() {
        let (temp, exec, sv) = setup();
        MakeDirsItem::new("t", "/srv", "www/static/css").build(&sv, None).unwrap();

        let root = temp.path().display();
        assert_eq!(
            exec.rendered(),
            vec![
                format!("mkdir --parents {}/srv/www/static/css", root),
                format!("chmod --recursive 0755 {}/srv/www/static", root),
                format!("chown --no-dereference --recursive root:root {}/srv/www/static", root),
            ]
        );
    }

    #[test]
    fn test_existing_chain_is_untouched() {
        let (_temp, exec, sv) = setup();
        MakeDirsItem::new("t", "/", "srv/www").build(&sv, None).unwrap();
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_custom_stat() {
        let (temp, exec, sv) = setup();
        MakeDirsItem::new("t", "/srv", "cache")
            .with_stat(StatOptions::new(0o700, "nobody:nobody"))
            .build(&sv, None)
            .unwrap();
        let rendered = exec.rendered();
        assert!(rendered.contains(&format!("chmod --recursive 0700 {}/srv/cache", temp.path().display())));
        assert!(rendered.iter().any(|c| c.contains("nobody:nobody")));
    }

    #[test]
    fn test_rejects_file_in_chain_and_bad_paths() {
        let (temp, exec, sv) = setup();
        fs::write(temp.path().join("srv/file"), "x").unwrap();

        let err = MakeDirsItem::new("t", "/srv", "file/sub").build(&sv, None).unwrap_err();
        assert!(matches!(err, Error::InvalidItem(_)));
        assert!(MakeDirsItem::new("t", "/srv", "../etc").validate().is_err());
        assert!(MakeDirsItem::new("t", "/srv", "/etc").validate().is_err());
        assert!(MakeDirsItem::new("t", "/missing", "x").build(&sv, None).is_err());
        assert!(exec.calls().is_empty());
    }
}
