// src/artifacts_dir.rs

//! Per-repository artifacts directory
//!
//! Image builds keep their volume, logs and `clean.sh` under
//! `<repo>/buck-image-out`. The directory is a per-repo singleton that
//! concurrent builds may race to create, so every step here is
//! create-or-verify: an existing, consistent result is accepted, an
//! inconsistent one is reported and never overwritten.

use crate::error::{Error, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Marker file at the root of a repository
pub const REPO_MARKER: &str = ".buckconfig";

/// Artifacts directory name, both in the repo and in scratch space
pub const ARTIFACTS_DIR_NAME: &str = "buck-image-out";

const CLEAN_SH_PREAMBLE: &str = r#"#!/bin/bash
set -ue -o pipefail
buck clean
sudo umount -l buck-image-out/volume || true
rm -f buck-image-out/image.btrfs
"#;

/// Drop empty source checkouts; a checkout still holding files is reported
const CHECKOUT_CLEANUP: &str = r#"REPOS="buck-image-out/eden/repos"
mkdir -p "$REPOS"
find "$REPOS" -maxdepth 2 -depth -type d -print0 | xargs -0 rmdir 2>/dev/null || true
if [ -d "$REPOS" ]; then
    echo "Checkouts remain in $REPOS and were not cleaned up"
else
    rm -rf buck-image-out/eden
fi
"#;

fn clean_sh() -> String {
    format!("{}{}", CLEAN_SH_PREAMBLE, CHECKOUT_CLEANUP)
}

/// Walk up from `path_in_repo` to the directory holding [`REPO_MARKER`]
pub fn find_repo_root(path_in_repo: &Path) -> Result<PathBuf> {
    let start = std::path::absolute(path_in_repo)?;
    let mut candidate = start.as_path();
    loop {
        if candidate.join(REPO_MARKER).exists() {
            return Ok(candidate.to_path_buf());
        }
        candidate = candidate.parent().ok_or_else(|| {
            Error::ArtifactsDir(format!(
                "could not find {} in any ancestor of {}",
                REPO_MARKER,
                path_in_repo.display()
            ))
        })?;
    }
}

/// Make `link` a symlink to `target`, tolerating a concurrent creator
///
/// Anything already at `link` must be exactly that symlink.
pub fn ensure_symlink(link: &Path, target: &Path) -> Result<()> {
    match std::os::unix::fs::symlink(target, link) {
        Ok(()) => debug!("Linked {} -> {}", link.display(), target.display()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    let meta = fs::symlink_metadata(link)?;
    if !meta.file_type().is_symlink() {
        return Err(Error::ArtifactsDir(format!(
            "{} is not a symlink; clean up whatever is there and try again",
            link.display()
        )));
    }
    let actual = fs::read_link(link)?;
    if actual != target {
        return Err(Error::ArtifactsDir(format!(
            "{} points at {}, but should point at {}; clean this up and try again",
            link.display(),
            actual.display(),
            target.display()
        )));
    }
    Ok(())
}

/// Ensure `<repo>/buck-image-out` exists, returning its path
///
/// When the `mkscratch` tool is installed, the in-repo path becomes a
/// symlink to a scratch location and the real directory lives there.
/// Defaults to the current directory when `path_in_repo` is `None`.
pub fn ensure_per_repo_artifacts_dir_exists(path_in_repo: Option<&Path>) -> Result<PathBuf> {
    let start = match path_in_repo {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let repo = find_repo_root(&start)?;
    let scratch = scratch_location(&repo)?;
    provision(&repo, scratch.as_deref())
}

fn scratch_location(repo: &Path) -> Result<Option<PathBuf>> {
    let Ok(mkscratch) = which::which("mkscratch") else {
        return Ok(None);
    };
    let command = format!("{} path --subdir {} {}", mkscratch.display(), ARTIFACTS_DIR_NAME, repo.display());
    let output = Command::new(&mkscratch)
        .args(["path", "--subdir", ARTIFACTS_DIR_NAME])
        .arg(repo)
        .output()
        .map_err(|source| Error::Spawn {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(Error::Command {
            command,
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let path = stdout.trim_end_matches('\n');
    if path.is_empty() {
        return Err(Error::ArtifactsDir("mkscratch printed no path".to_string()));
    }
    Ok(Some(PathBuf::from(path)))
}

fn provision(repo: &Path, scratch: Option<&Path>) -> Result<PathBuf> {
    let artifacts_dir = repo.join(ARTIFACTS_DIR_NAME);
    let real_dir = match scratch {
        Some(target) => {
            ensure_symlink(&artifacts_dir, target)?;
            target.to_path_buf()
        }
        None => artifacts_dir.clone(),
    };

    match fs::create_dir(&real_dir) {
        Ok(()) => info!("Created artifacts directory {}", real_dir.display()),
        // Another build got there first
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    ensure_clean_sh_exists(&artifacts_dir)?;
    Ok(artifacts_dir)
}

/// (Re)write `clean.sh` atomically and make it executable
pub fn ensure_clean_sh_exists(artifacts_dir: &Path) -> Result<()> {
    let path = artifacts_dir.join("clean.sh");
    let mut temp = tempfile::NamedTempFile::new_in(artifacts_dir)?;
    temp.write_all(clean_sh().as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(&path).map_err(|e| e.error)?;

    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(&path, perms)?;
    Ok(())
}
