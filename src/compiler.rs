// src/compiler.rs

//! Layer compiler
//!
//! Sequences a layer's items into phases and applies them to one
//! subvolume. Items are grouped by [`PhaseOrder`] without reordering
//! within a group; phases then run strictly one after another in
//! ascending order. The first failure aborts everything after it and
//! leaves the subvolume as-is for the caller to discard.

use crate::config::LayerOpts;
use crate::error::{Error, Result};
use crate::items::{self, Item, PhaseOrder};
use crate::subvol::Subvolume;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::{error, info};

/// Progress of one layer build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Unordered,
    PhaseGrouped,
    Executing(PhaseOrder),
    Built,
    Failed(PhaseOrder),
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unordered => write!(f, "unordered"),
            Self::PhaseGrouped => write!(f, "phase-grouped"),
            Self::Executing(phase) => write!(f, "executing {}", phase),
            Self::Built => write!(f, "built"),
            Self::Failed(phase) => write!(f, "failed in {}", phase),
        }
    }
}

/// Bucket items by phase, keeping declaration order inside each bucket
pub fn group_by_phase(items: Vec<Item>) -> BTreeMap<PhaseOrder, Vec<Item>> {
    let mut groups: BTreeMap<PhaseOrder, Vec<Item>> = BTreeMap::new();
    for item in items {
        groups.entry(item.phase()).or_default().push(item);
    }
    groups
}

/// Apply `items` to `subvol`, phase by phase
///
/// Without a ParentLayer item the subvolume must already exist. Building
/// into a read-only subvolume is refused up front.
pub fn compile_items(items: Vec<Item>, opts: &LayerOpts, subvol: &Subvolume) -> Result<()> {
    let layer = if opts.layer_target.is_empty() {
        "<layer>"
    } else {
        opts.layer_target.as_str()
    };
    if subvol.is_read_only() {
        return Err(Error::InvalidItem(format!(
            "{} is read-only",
            subvol.root().display()
        )));
    }

    let mut state = BuildState::Unordered;
    info!("[{}] {} item(s), state {}", layer, items.len(), state);

    let groups = group_by_phase(items);
    state = BuildState::PhaseGrouped;
    info!("[{}] {} phase(s), state {}", layer, groups.len(), state);

    let started = Instant::now();
    for (phase, group) in groups {
        state = BuildState::Executing(phase);
        info!("[{}] {} with {} item(s)", layer, state, group.len());

        let result = items::get_phase_builder(phase, group, opts).and_then(|builder| builder(subvol));
        if let Err(e) = result {
            state = BuildState::Failed(phase);
            error!("[{}] {}: {}", layer, state, e);
            return Err(attribute(e, layer, phase));
        }
    }

    state = BuildState::Built;
    info!("[{}] {} in {:.1}s", layer, state, started.elapsed().as_secs_f64());
    Ok(())
}

/// Errors the phase builders did not already tie to an item are
/// attributed to the layer as a whole
fn attribute(err: Error, layer: &str, phase: PhaseOrder) -> Error {
    match err {
        err @ Error::Item { .. } => err,
        other => Error::Item {
            provenance: layer.to_string(),
            phase,
            source: Box::new(other),
        },
    }
}
