// src/items/mod.rs

//! Declarative image items
//!
//! An item is one declared mutation of the image: seed from a parent
//! layer, create a directory, install a file, run a foreign command, and
//! so on. Items describe WHAT should happen; each item type supplies the
//! phase it belongs to and a builder that applies a whole phase's worth
//! of items to a subvolume.
//!
//! The set of item types is closed ([`Item`] is a tagged union), so phase
//! assignment is checked exhaustively at compile time.

pub mod foreign_layer;
pub mod install_file;
pub mod make_dirs;
pub mod make_subvol;
pub mod phase_order;
pub mod remove_path;
pub mod rpm_action;
pub mod stat_options;
pub mod symlink;

pub use foreign_layer::ForeignLayerItem;
pub use install_file::InstallFileItem;
pub use make_dirs::MakeDirsItem;
pub use make_subvol::{FilesystemRootItem, ParentLayerItem};
pub use phase_order::PhaseOrder;
pub use remove_path::RemovePathItem;
pub use rpm_action::{RpmAction, RpmActionItem};
pub use stat_options::{Mode, StatOptions};
pub use symlink::SymlinkItem;

use crate::config::LayerOpts;
use crate::error::{Error, Result, ResultExt};
use crate::subvol::{BuildAppliance, Subvolume};
use serde::{Deserialize, Serialize};

/// Executable builder for one phase, invoked once against the subvolume
pub type PhaseBuilder<'a> = Box<dyn FnOnce(&Subvolume) -> Result<()> + 'a>;

/// Every item type the compiler understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    ParentLayer(ParentLayerItem),
    FilesystemRoot(FilesystemRootItem),
    RpmAction(RpmActionItem),
    MakeDirs(MakeDirsItem),
    InstallFile(InstallFileItem),
    Symlink(SymlinkItem),
    RemovePath(RemovePathItem),
    ForeignLayer(ForeignLayerItem),
}

impl Item {
    /// The phase this item runs in; depends only on its declaration
    pub fn phase(&self) -> PhaseOrder {
        match self {
            Self::ParentLayer(_) | Self::FilesystemRoot(_) => PhaseOrder::ParentLayer,
            Self::RpmAction(item) => item.phase(),
            Self::MakeDirs(_) | Self::InstallFile(_) | Self::Symlink(_) | Self::RemovePath(_) => {
                PhaseOrder::GenericMutations
            }
            Self::ForeignLayer(item) => item.phase(),
        }
    }

    /// Where the item was declared, for diagnostics only
    pub fn provenance(&self) -> &str {
        match self {
            Self::ParentLayer(item) => &item.from_target,
            Self::FilesystemRoot(item) => &item.from_target,
            Self::RpmAction(item) => &item.from_target,
            Self::MakeDirs(item) => &item.from_target,
            Self::InstallFile(item) => &item.from_target,
            Self::Symlink(item) => &item.from_target,
            Self::RemovePath(item) => &item.from_target,
            Self::ForeignLayer(item) => &item.from_target,
        }
    }

    /// Static checks that do not touch the filesystem
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ParentLayer(_) | Self::FilesystemRoot(_) => Ok(()),
            Self::RpmAction(item) => item.validate(),
            Self::MakeDirs(item) => item.validate(),
            Self::InstallFile(item) => item.stat.validate(),
            Self::Symlink(_) | Self::RemovePath(_) => Ok(()),
            Self::ForeignLayer(item) => item.validate(),
        }
    }
}

/// Builder for `phase`, given all of that phase's items in declaration order
pub fn get_phase_builder<'a>(
    phase: PhaseOrder,
    items: Vec<Item>,
    opts: &'a LayerOpts,
) -> Result<PhaseBuilder<'a>> {
    if let Some(stray) = items.iter().find(|item| item.phase() != phase) {
        return Err(Error::InvalidItem(format!(
            "{}: {} item handed to the {} phase builder",
            stray.provenance(),
            stray.phase(),
            phase
        )));
    }

    match phase {
        PhaseOrder::ParentLayer => make_subvol::get_phase_builder(items),
        PhaseOrder::RpmRemove | PhaseOrder::RpmInstall => {
            let rpms = items
                .into_iter()
                .filter_map(|item| match item {
                    Item::RpmAction(rpm) => Some(rpm),
                    _ => None,
                })
                .collect();
            rpm_action::get_phase_builder(phase, rpms, opts)
        }
        PhaseOrder::GenericMutations => Ok(generic_phase_builder(items, opts)),
        PhaseOrder::ForeignLayer => {
            let foreign = items
                .into_iter()
                .filter_map(|item| match item {
                    Item::ForeignLayer(f) => Some(f),
                    _ => None,
                })
                .collect();
            Ok(foreign_layer::get_phase_builder(foreign, opts))
        }
    }
}

/// Generic mutations run one at a time, in declaration order
fn generic_phase_builder(items: Vec<Item>, opts: &LayerOpts) -> PhaseBuilder<'_> {
    Box::new(move |subvol: &Subvolume| {
        let appliance = opts
            .build_appliance
            .as_ref()
            .map(|root| BuildAppliance::new(subvol, root));
        for item in &items {
            let result = match item {
                Item::MakeDirs(i) => i.build(subvol, appliance.as_ref()),
                Item::InstallFile(i) => i.build(subvol, appliance.as_ref()),
                Item::Symlink(i) => i.build(subvol, appliance.as_ref()),
                Item::RemovePath(i) => i.build(subvol),
                other => Err(Error::InvalidItem(format!(
                    "{} is not a generic mutation",
                    other.provenance()
                ))),
            };
            result.with_provenance(item.provenance(), PhaseOrder::GenericMutations)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign(cmd: &[&str]) -> Item {
        Item::ForeignLayer(ForeignLayerItem::new("t", cmd.iter().copied()))
    }

    #[test]
    fn test_phase_is_pure() {
        let items = vec![
            Item::ParentLayer(ParentLayerItem::new("t", "/vol/base")),
            Item::FilesystemRoot(FilesystemRootItem::new("t")),
            Item::RpmAction(RpmActionItem::new("t", "nginx", RpmAction::Install)),
            Item::RpmAction(RpmActionItem::new("t", "sendmail", RpmAction::Remove)),
            Item::MakeDirs(MakeDirsItem::new("t", "/", "srv")),
            foreign(&["/bin/true"]),
        ];
        for item in &items {
            assert_eq!(item.phase(), item.clone().phase());
            assert_eq!(item.phase(), item.phase());
        }
        assert_eq!(items[0].phase(), PhaseOrder::ParentLayer);
        assert_eq!(items[1].phase(), PhaseOrder::ParentLayer);
        assert_eq!(items[2].phase(), PhaseOrder::RpmInstall);
        assert_eq!(items[3].phase(), PhaseOrder::RpmRemove);
        assert_eq!(items[4].phase(), PhaseOrder::GenericMutations);
        assert_eq!(items[5].phase(), PhaseOrder::ForeignLayer);
    }

    #[test]
    fn test_provenance() {
        let item = Item::MakeDirs(MakeDirsItem::new("//images:web", "/", "srv"));
        assert_eq!(item.provenance(), "//images:web");
    }

    #[test]
    fn test_builder_rejects_items_from_other_phase() {
        let opts = LayerOpts::default();
        let err = get_phase_builder(PhaseOrder::ForeignLayer, vec![Item::MakeDirs(MakeDirsItem::new("x", "/", "a"))], &opts)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidItem(msg) if msg.contains("GenericMutations")));
    }
}
