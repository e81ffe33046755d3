// src/items/make_subvol.rs

//! Items that materialize the subvolume itself
//!
//! Exactly one of these seeds every build: either a copy-on-write
//! snapshot of a parent layer, or an empty filesystem root.

use super::stat_options::{StatOptions, build_stat_options};
use super::{Item, PhaseBuilder, PhaseOrder};
use crate::error::{Error, Result, ResultExt};
use crate::subvol::Subvolume;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Seed the subvolume from a previously built parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLayerItem {
    pub from_target: String,
    /// Host path of the parent layer's subvolume
    pub subvol: PathBuf,
}

impl ParentLayerItem {
    pub fn new(from_target: impl Into<String>, subvol: impl Into<PathBuf>) -> Self {
        Self {
            from_target: from_target.into(),
            subvol: subvol.into(),
        }
    }

    fn build(&self, subvol: &Subvolume) -> Result<()> {
        let parent = Subvolume::new(&self.subvol, subvol.executor().clone());
        if !parent.is_dir("/")? {
            return Err(Error::InvalidItem(format!(
                "parent layer {} does not exist",
                self.subvol.display()
            )));
        }
        subvol.snapshot_from(&parent)
    }
}

/// Start from an empty tree whose root is `0755 root:root`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemRootItem {
    pub from_target: String,
}

impl FilesystemRootItem {
    pub fn new(from_target: impl Into<String>) -> Self {
        Self {
            from_target: from_target.into(),
        }
    }

    fn build(&self, subvol: &Subvolume) -> Result<()> {
        subvol.create()?;
        build_stat_options(
            &StatOptions::new(0o755, "root:root"),
            subvol,
            subvol.root(),
            None,
            false,
        )
    }
}

pub(super) fn get_phase_builder<'a>(items: Vec<Item>) -> Result<PhaseBuilder<'a>> {
    let mut items = items.into_iter();
    let (Some(item), None) = (items.next(), items.next()) else {
        return Err(Error::InvalidItem(
            "a layer needs exactly one parent_layer or filesystem_root item".to_string(),
        ));
    };

    Ok(Box::new(move |subvol: &Subvolume| {
        let result = match &item {
            Item::ParentLayer(parent) => parent.build(subvol),
            Item::FilesystemRoot(root) => root.build(subvol),
            other => Err(Error::InvalidItem(format!(
                "{} cannot seed a subvolume",
                other.provenance()
            ))),
        };
        result.with_provenance(item.provenance(), PhaseOrder::ParentLayer)
    }))
}
