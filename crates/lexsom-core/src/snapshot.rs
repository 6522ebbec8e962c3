//! Serializable point-in-time view of an engine, for debugging and for adapters that
//! persist cluster membership elsewhere.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub width: usize,
    pub height: usize,
    pub node_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub config: EngineConfig,
    pub grid: GridShape,
    pub clusters: Vec<Cluster>,
    pub document_count: usize,
    /// Milliseconds since the Unix epoch.
    pub exported_at: i64,
}

impl Snapshot {
    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(SnapshotError::Serialize)
    }

    /// Writes the snapshot as pretty JSON to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        let s = self.to_json_pretty()?;
        std::fs::write(path, s).map_err(SnapshotError::Write)
    }

    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let s = std::fs::read_to_string(path).map_err(SnapshotError::Read)?;
        serde_json::from_str(&s).map_err(SnapshotError::Parse)
    }
}


#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to write snapshot: {0}")]
    Write(std::io::Error),
    #[error("failed to read snapshot: {0}")]
    Read(std::io::Error),
    #[error("failed to parse snapshot: {0}")]
    Parse(serde_json::Error),
}
