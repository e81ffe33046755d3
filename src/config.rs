// src/config.rs

//! Layer configuration
//!
//! A layer is declared in TOML: a `[layer]` table of shared options
//! followed by `[[item]]` tables, one per item, in declaration order.
//!
//! ```toml
//! [layer]
//! target = "//images:web"
//! build_appliance = "/var/lib/strata/appliances/fedora"
//!
//! [[item]]
//! type = "parent_layer"
//! from_target = "//images:base"
//! subvol = "/var/lib/strata/volume/base"
//!
//! [[item]]
//! type = "make_dirs"
//! from_target = "//images:web"
//! into_dir = "/srv"
//! path_to_make = "www/static"
//! mode = 0o755
//!
//! [[item]]
//! type = "foreign_layer"
//! from_target = "//images:web"
//! cmd = ["/bin/sh", "-c", "echo ready > /srv/www/READY"]
//! ```

use crate::error::Result;
use crate::items::Item;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reserved metadata paths protected from foreign commands by default
pub const DEFAULT_PROTECTED_PATHS: &[&str] = &["/meta", "/__strata__"];

/// Default package installer run inside the build appliance
pub const DEFAULT_RPM_INSTALLER: &str = "dnf";

fn default_protected_paths() -> Vec<String> {
    DEFAULT_PROTECTED_PATHS.iter().map(|p| p.to_string()).collect()
}

fn default_rpm_installer() -> String {
    DEFAULT_RPM_INSTALLER.to_string()
}

/// Options shared by every phase builder of one layer build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerOpts {
    /// Name of the layer being built, for diagnostics
    #[serde(rename = "target", default)]
    pub layer_target: String,

    /// Trusted image used to run privileged tools against the target
    #[serde(default)]
    pub build_appliance: Option<PathBuf>,

    /// Paths foreign commands must not be able to modify
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,

    /// Installer binary inside the appliance for `rpm_action` items
    #[serde(default = "default_rpm_installer")]
    pub rpm_installer: String,
}

impl Default for LayerOpts {
    fn default() -> Self {
        Self {
            layer_target: String::new(),
            build_appliance: None,
            protected_paths: default_protected_paths(),
            rpm_installer: default_rpm_installer(),
        }
    }
}

impl LayerOpts {
    pub fn new(layer_target: impl Into<String>) -> Self {
        Self {
            layer_target: layer_target.into(),
            ..Self::default()
        }
    }

    pub fn with_build_appliance(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_appliance = Some(path.into());
        self
    }

    pub fn with_protected_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.protected_paths = paths.into_iter().map(Into::into).collect();
        self
    }
}

/// A parsed layer file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub layer: LayerOpts,
    #[serde(default, rename = "item")]
    pub items: Vec<Item>,
}

impl LayerConfig {
    /// Parse and validate a layer file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate layer TOML
    pub fn parse(content: &str) -> Result<Self> {
        let config: LayerConfig = toml::from_str(content)?;
        for item in &config.items {
            item.validate()?;
        }
        Ok(config)
    }
}
