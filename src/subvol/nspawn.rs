// src/subvol/nspawn.rs

//! `systemd-nspawn` argv construction
//!
//! Commands that must observe an image as `/` (foreign layer commands,
//! tools inside the build appliance) are run as a non-booted nspawn
//! container. This module only builds the argv; execution goes through
//! the subvolume's executor like every other privileged command.

use crate::exec::{BindMount, CommandSpec};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `PATH` for the container command, matching the nspawn default
pub const DEFAULT_PATH: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// Builder for a single non-booted nspawn invocation
#[derive(Debug, Clone)]
pub struct Nspawn {
    directory: PathBuf,
    read_only: bool,
    binds: Vec<BindMount>,
    user: Option<String>,
    chdir: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Nspawn {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            read_only: false,
            binds: Vec::new(),
            user: None,
            chdir: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Mount the container root read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn bind(mut self, mount: BindMount) -> Self {
        self.binds.push(mount);
        self
    }

    pub fn binds(mut self, mounts: impl IntoIterator<Item = BindMount>) -> Self {
        self.binds.extend(mounts);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn chdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chdir = Some(dir.into());
        self
    }

    pub fn setenv(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Complete argv for running `cmd` inside the container
    pub fn argv<I, S>(&self, cmd: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![
            "systemd-nspawn".to_string(),
            "--quiet".to_string(),
            "--register=no".to_string(),
            "--keep-unit".to_string(),
            format!("--directory={}", self.directory.display()),
        ];
        if self.read_only {
            argv.push("--read-only".to_string());
        }
        for bm in &self.binds {
            let flag = if bm.writable { "--bind" } else { "--bind-ro" };
            argv.push(format!(
                "{}={}:{}",
                flag,
                bm.source.display(),
                bm.target.display()
            ));
        }
        if let Some(user) = &self.user {
            argv.push(format!("--user={}", user));
        }
        if let Some(dir) = &self.chdir {
            argv.push(format!("--chdir={}", dir.display()));
        }
        argv.push(format!("--setenv=PATH={}", DEFAULT_PATH.join(":")));
        for (key, value) in &self.env {
            argv.push(format!("--setenv={}={}", key, value));
        }
        argv.push("--".to_string());
        argv.extend(cmd.into_iter().map(Into::into));
        argv
    }

    /// Wrap `cmd` as a [`CommandSpec`] for a privileged executor
    pub fn command<I, S>(&self, cmd: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(self.argv(cmd)).with_timeout(self.timeout)
    }
}
