// src/subvol/appliance.rs

//! Build appliance execution context
//!
//! The image under construction may be minimal, partially built, or
//! untrusted, so its own binaries and identity databases are not used to
//! mutate it. Instead commands run inside a separate, trusted appliance
//! image, with the target subvolume mounted at [`TARGET_MOUNT`]. The
//! appliance root is entered read-only and never becomes part of the
//! layer being built.

use super::{Nspawn, Subvolume};
use crate::error::Result;
use crate::exec::{BindMount, CommandOutput};
use std::path::{Path, PathBuf};

/// Where the target subvolume appears inside the appliance
pub const TARGET_MOUNT: &str = "/__strata_target__";

/// Host identity databases, for resolving `user:group` names consistently
pub fn identity_binds() -> Vec<BindMount> {
    vec![
        BindMount::readonly("/etc/passwd", "/etc/passwd"),
        BindMount::readonly("/etc/group", "/etc/group"),
    ]
}

/// A target subvolume paired with the appliance used to operate on it
pub struct BuildAppliance<'a> {
    subvol: &'a Subvolume,
    appliance_root: PathBuf,
}

impl<'a> BuildAppliance<'a> {
    pub fn new(subvol: &'a Subvolume, appliance_root: impl Into<PathBuf>) -> Self {
        Self {
            subvol,
            appliance_root: appliance_root.into(),
        }
    }

    pub fn subvol(&self) -> &Subvolume {
        self.subvol
    }

    pub fn appliance_root(&self) -> &Path {
        &self.appliance_root
    }

    /// Translate a logical image path to the appliance's view of it
    ///
    /// The path is confined to the target subvolume first, so escapes are
    /// rejected exactly as [`Subvolume::path`] rejects them.
    pub fn path(&self, logical: impl AsRef<Path>) -> Result<PathBuf> {
        let host = self.subvol.path(logical)?;
        let rel = self.subvol.relative(host)?;
        Ok(Path::new(TARGET_MOUNT).join(rel))
    }

    /// Base invocation: appliance root read-only, target mounted read-write
    pub fn nspawn(&self) -> Nspawn {
        Nspawn::new(&self.appliance_root)
            .read_only(true)
            .bind(BindMount::writable(self.subvol.root(), TARGET_MOUNT))
    }

    /// Run `argv` inside the appliance
    ///
    /// Path arguments must already be translated with [`BuildAppliance::path`].
    pub fn run<I, S>(&self, argv: I, bindmount_ro: &[BindMount]) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self
            .nspawn()
            .binds(bindmount_ro.iter().cloned())
            .command(argv);
        self.subvol.run_command(&spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::exec::RecordingExecutor;
    use std::sync::Arc;

    #[test]
    fn test_path_translation() {
        let sv = Subvolume::new("/vol/img", Arc::new(RecordingExecutor::new()));
        let ba = BuildAppliance::new(&sv, "/vol/ba");
        assert_eq!(ba.path("/etc/passwd").unwrap(), PathBuf::from("/__strata_target__/etc/passwd"));
        assert_eq!(ba.path("/").unwrap(), PathBuf::from("/__strata_target__"));
        assert!(matches!(ba.path("/../etc"), Err(Error::PathEscape { .. })));
    }

    #[test]
    fn test_run_mounts_target_and_identity() {
        let exec = Arc::new(RecordingExecutor::new());
        let sv = Subvolume::new("/vol/img", exec.clone());
        let ba = BuildAppliance::new(&sv, "/vol/ba");

        let target = ba.path("/srv").unwrap();
        ba.run(
            ["chown".to_string(), "root:root".into(), target.display().to_string()],
            &identity_binds(),
        )
        .unwrap();

        let argv = &exec.argvs()[0];
        assert!(argv.contains(&"--directory=/vol/ba".to_string()));
        assert!(argv.contains(&"--read-only".to_string()));
        assert!(argv.contains(&"--bind=/vol/img:/__strata_target__".to_string()));
        assert!(argv.contains(&"--bind-ro=/etc/passwd:/etc/passwd".to_string()));
        assert!(argv.contains(&"--bind-ro=/etc/group:/etc/group".to_string()));
        assert_eq!(argv.last().unwrap(), "/__strata_target__/srv");
    }

    #[test]
    fn test_run_failure_is_command_error() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.fail_when("chmod", 1, "bad mode");
        let sv = Subvolume::new("/vol/img", exec);
        let ba = BuildAppliance::new(&sv, "/vol/ba");
        let err = ba.run(["chmod", "9999", "/__strata_target__/x"], &[]).unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }
}
