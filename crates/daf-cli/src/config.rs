//! Cluster and application files
//!
//! The CLI is driven by one TOML topology file naming the cluster's nodes,
//! cluster-level queues and tasks, and runtime tunables, plus any number of
//! application definition files referenced from it. Application paths are
//! resolved relative to the topology file so a cluster directory can be
//! moved as a whole.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use daf_core::{ApplicationDef, ClusterDef, RuntimeConfig};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Cluster File
// ----------------------------------------------------------------------------

/// Everything the `daf` binary needs to run or address one cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFile {
    /// Node, queue and task topology
    pub cluster: ClusterDef,

    /// Runtime tunables shared by every node started from this file
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Application definition files, relative to this file
    #[serde(default)]
    pub applications: Vec<PathBuf>,
}

impl ClusterFile {
    /// Load and parse a topology file, resolving application paths
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read cluster file {}: {}", path.display(), e))
        })?;
        let mut file: ClusterFile = toml::from_str(&text)?;
        file.cluster.validate().map_err(daf_core::DafError::from)?;

        if let Some(dir) = path.parent() {
            for app in &mut file.applications {
                if app.is_relative() {
                    *app = dir.join(&*app);
                }
            }
        }
        Ok(file)
    }

    /// Load every application definition the topology references
    pub fn load_applications(&self) -> Result<Vec<ApplicationDef>> {
        self.applications
            .iter()
            .map(|path| load_application(path))
            .collect()
    }
}

/// Load and parse one application definition file
pub fn load_application(path: &Path) -> Result<ApplicationDef> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::Config(format!(
            "cannot read application file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(toml::from_str(&text)?)
}
