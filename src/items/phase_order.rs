// src/items/phase_order.rs

//! Build phase ordering

use serde::{Deserialize, Serialize};
use std::fmt;

/// Build phases, in execution order
///
/// `ParentLayer` materializes the tree and must come first; `ForeignLayer`
/// runs arbitrary commands that may assume a fully built image, so it is
/// last. Within one phase, items keep their declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PhaseOrder {
    /// Seed the subvolume from a parent snapshot (or create it empty).
    ParentLayer = 1,
    /// Remove packages through the package installer.
    RpmRemove = 2,
    /// Declarative file and directory mutations.
    GenericMutations = 3,
    /// Install packages through the package installer.
    RpmInstall = 4,
    /// Arbitrary commands against the nearly-final image.
    ForeignLayer = 5,
}

impl PhaseOrder {
    /// All phases in order
    pub fn all() -> &'static [PhaseOrder] {
        &[
            Self::ParentLayer,
            Self::RpmRemove,
            Self::GenericMutations,
            Self::RpmInstall,
            Self::ForeignLayer,
        ]
    }
}

impl fmt::Display for PhaseOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentLayer => write!(f, "ParentLayer"),
            Self::RpmRemove => write!(f, "RpmRemove"),
            Self::GenericMutations => write!(f, "GenericMutations"),
            Self::RpmInstall => write!(f, "RpmInstall"),
            Self::ForeignLayer => write!(f, "ForeignLayer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(PhaseOrder::ParentLayer < PhaseOrder::RpmRemove);
        assert!(PhaseOrder::RpmRemove < PhaseOrder::GenericMutations);
        assert!(PhaseOrder::GenericMutations < PhaseOrder::RpmInstall);
        assert!(PhaseOrder::RpmInstall < PhaseOrder::ForeignLayer);
    }

    #[test]
    fn test_all_is_sorted_and_bounded() {
        let all = PhaseOrder::all();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(all.first(), Some(&PhaseOrder::ParentLayer));
        assert_eq!(all.last(), Some(&PhaseOrder::ForeignLayer));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(PhaseOrder::ParentLayer.to_string(), "ParentLayer");
        assert_eq!(PhaseOrder::GenericMutations.to_string(), "GenericMutations");
        assert_eq!(PhaseOrder::ForeignLayer.to_string(), "ForeignLayer");
    }
}
