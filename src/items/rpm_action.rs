// src/items/rpm_action.rs

//! Package install and removal through the build appliance's installer
//!
//! All `rpm_action` items of one phase are batched into a single installer
//! invocation, so dependency resolution sees the whole request at once.
//! Package semantics belong to the installer; this module only drives it.

use super::{PhaseBuilder, PhaseOrder};
use crate::config::LayerOpts;
use crate::error::{Error, Result, ResultExt};
use crate::subvol::appliance::TARGET_MOUNT;
use crate::subvol::{BuildAppliance, Subvolume};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpmAction {
    Install,
    Remove,
}

impl RpmAction {
    /// Removals run before generic mutations, installs after
    pub fn phase(self) -> PhaseOrder {
        match self {
            Self::Install => PhaseOrder::RpmInstall,
            Self::Remove => PhaseOrder::RpmRemove,
        }
    }

    fn subcommand(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove => "remove-n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmActionItem {
    pub from_target: String,
    pub name: String,
    pub action: RpmAction,
}

impl RpmActionItem {
    pub fn new(from_target: impl Into<String>, name: impl Into<String>, action: RpmAction) -> Self {
        Self {
            from_target: from_target.into(),
            name: name.into(),
            action,
        }
    }

    pub fn phase(&self) -> PhaseOrder {
        self.action.phase()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.starts_with('-') || self.name.contains(char::is_whitespace) {
            return Err(Error::InvalidItem(format!("'{}' is not a package name", self.name)));
        }
        Ok(())
    }
}

pub(super) fn get_phase_builder(
    phase: PhaseOrder,
    items: Vec<RpmActionItem>,
    opts: &LayerOpts,
) -> Result<PhaseBuilder<'_>> {
    let provenance = joined_provenance(&items);
    let action = match phase {
        PhaseOrder::RpmInstall => RpmAction::Install,
        PhaseOrder::RpmRemove => RpmAction::Remove,
        other => {
            return Err(Error::InvalidItem(format!("{} is not a package phase", other)))
                .with_provenance(&provenance, other);
        }
    };
    let Some(appliance_root) = opts.build_appliance.as_ref() else {
        return Err(Error::InvalidItem(
            "rpm_action items need a build_appliance".to_string(),
        ))
        .with_provenance(&provenance, phase);
    };

    let mut names: Vec<String> = Vec::new();
    for item in &items {
        if !names.contains(&item.name) {
            names.push(item.name.clone());
        }
    }

    Ok(Box::new(move |subvol: &Subvolume| {
        if names.is_empty() {
            return Ok(());
        }
        info!("{} {} package(s): {}", action.subcommand(), names.len(), names.join(" "));
        let ba = BuildAppliance::new(subvol, appliance_root);
        let mut argv = vec![
            opts.rpm_installer.clone(),
            format!("--installroot={}", TARGET_MOUNT),
            "--assumeyes".to_string(),
            action.subcommand().to_string(),
        ];
        argv.extend(names.iter().cloned());
        ba.run(argv, &[]).map(|_| ()).with_provenance(&provenance, phase)
    }))
}

fn joined_provenance(items: &[RpmActionItem]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for item in items {
        if !seen.contains(&item.from_target.as_str()) {
            seen.push(&item.from_target);
        }
    }
    seen.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RecordingExecutor;
    use std::sync::Arc;

    fn rpm(target: &str, name: &str, action: RpmAction) -> RpmActionItem {
        RpmActionItem::new(target, name, action)
    }

    #[test]
    fn test_action_decides_phase() {
        assert_eq!(rpm("t", "a", RpmAction::Install).phase(), PhaseOrder::RpmInstall);
        assert_eq!(rpm("t", "a", RpmAction::Remove).phase(), PhaseOrder::RpmRemove);
    }

    #[test]
    fn test_batched_install_in_appliance() {
        let opts = LayerOpts::new("//web").with_build_appliance("/vol/ba");
        let exec = Arc::new(RecordingExecutor::new());
        let sv = Subvolume::new("/vol/img", exec.clone());

        let items = vec![
            rpm("//web", "nginx", RpmAction::Install),
            rpm("//web", "curl", RpmAction::Install),
            rpm("//other", "nginx", RpmAction::Install),
        ];
        get_phase_builder(PhaseOrder::RpmInstall, items, &opts).unwrap()(&sv).unwrap();

        let argvs = exec.argvs();
        assert_eq!(argvs.len(), 1);
        let argv = &argvs[0];
        assert!(argv.contains(&"--directory=/vol/ba".to_string()));
        assert!(argv.ends_with(&[
            "dnf".to_string(),
            "--installroot=/__strata_target__".to_string(),
            "--assumeyes".to_string(),
            "install".to_string(),
            "nginx".to_string(),
            "curl".to_string(),
        ]));
    }

    #[test]
    fn test_remove_uses_remove_n() {
        let opts = LayerOpts::new("//web").with_build_appliance("/vol/ba");
        let exec = Arc::new(RecordingExecutor::new());
        let sv = Subvolume::new("/vol/img", exec.clone());
        get_phase_builder(PhaseOrder::RpmRemove, vec![rpm("//web", "sendmail", RpmAction::Remove)], &opts)
            .unwrap()(&sv)
        .unwrap();
        assert!(exec.rendered()[0].ends_with("--assumeyes remove-n sendmail"));
    }

    #[test]
    fn test_requires_appliance() {
        let opts = LayerOpts::new("//web");
        let err = get_phase_builder(PhaseOrder::RpmInstall, vec![rpm("//web", "x", RpmAction::Install)], &opts)
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("//web: RpmInstall phase failed"));
        assert!(matches!(err.root_cause(), Error::InvalidItem(_)));
    }

    #[test]
    fn test_installer_failure_attributed_to_all_declarers() {
        let opts = LayerOpts::new("//web").with_build_appliance("/vol/ba");
        let exec = Arc::new(RecordingExecutor::new());
        exec.fail_when("--assumeyes", 1, "No match for argument: nope");
        let sv = Subvolume::new("/vol/img", exec);
        let items = vec![rpm("//a", "nope", RpmAction::Install), rpm("//b", "ok", RpmAction::Install)];

        let err = get_phase_builder(PhaseOrder::RpmInstall, items, &opts).unwrap()(&sv).unwrap_err();
        assert!(err.to_string().starts_with("//a, //b: RpmInstall phase failed"));
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_validate_names() {
        assert!(rpm("t", "glibc-devel", RpmAction::Install).validate().is_ok());
        assert!(rpm("t", "", RpmAction::Install).validate().is_err());
        assert!(rpm("t", "--nogpgcheck", RpmAction::Install).validate().is_err());
        assert!(rpm("t", "a b", RpmAction::Install).validate().is_err());
    }
}
