//! Self-organizing map clustering and retrieval over document embeddings,
//! independent of how it is driven (CLI or an embedding service).
//!
//! Embeddings are produced elsewhere. The engine learns a codebook grid from them,
//! partitions it with k-means, tags each partition with a boolean descriptor and
//! answers similarity queries. Only config and snapshots touch disk (see [app_data]).

pub mod app_data;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod corpus;
pub mod descriptor;
pub mod document;
pub mod engine;
pub mod grid;
pub mod partition;
pub mod retrieval;
pub mod snapshot;
pub mod trainer;
pub mod vector;

pub use app_data::{app_data_dir, snapshot_dir};
pub use clock::{Clock, FixedClock, SystemClock};
pub use cluster::{Cluster, ClusterMetadata};
pub use config::{load_config, load_config_from, save_config, save_config_to, ConfigError, EngineConfig};
pub use corpus::{scan_corpus, CorpusError};
pub use descriptor::BooleanPattern;
pub use document::{DocumentMetadata, EmbeddingVector, EvidenceType};
pub use engine::{Engine, EngineError, SharedEngine, TrainReport};
pub use grid::{CodebookGrid, GridNode, LegalContext};
pub use retrieval::{legal_context_boost, RankedDocument};
pub use snapshot::{GridShape, Snapshot, SnapshotError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "lexsom-core ready"
}
