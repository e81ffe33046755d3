// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata::{RecordingExecutor, Subvolume};
use tempfile::TempDir;

/// A scratch "volume" holding a parent layer and a build target
///
/// Keep the struct alive for the duration of the test.
pub struct Volume {
    pub temp: TempDir,
    pub exec: Arc<RecordingExecutor>,
}

impl Volume {
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().unwrap(),
            exec: Arc::new(RecordingExecutor::new()),
        }
    }

    /// A parent layer directory containing the given directories
    pub fn parent(&self, dirs: &[&str]) -> PathBuf {
        let base = self.temp.path().join("base");
        make_tree(&base, dirs);
        base
    }

    /// The build target, pre-populated as if the snapshot had happened
    pub fn target(&self, name: &str, dirs: &[&str]) -> Subvolume {
        let root = self.temp.path().join(name);
        make_tree(&root, dirs);
        Subvolume::new(root, self.exec.clone())
    }

    pub fn rendered(&self) -> Vec<String> {
        self.exec.rendered()
    }
}

fn make_tree(root: &Path, dirs: &[&str]) {
    fs::create_dir_all(root).unwrap();
    for dir in dirs {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
}

/// `uid:gid` of the test process, for unprivileged chown
pub fn own_user_group() -> String {
    format!("{}:{}", nix::unistd::getuid(), nix::unistd::getgid())
}
