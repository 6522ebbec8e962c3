//! Cluster records produced by partitioning the trained codebook.

use serde::{Deserialize, Serialize};

use crate::descriptor::BooleanPattern;
use crate::document::EvidenceType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    /// Number of member documents.
    pub size: usize,
    /// Mean confidence of member nodes holding documents.
    pub avg_confidence: f32,
    /// Most frequent evidence type across member nodes; first seen wins ties.
    pub dominant_evidence_type: Option<EvidenceType>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// `cluster_<index>`.
    pub id: String,
    pub centroid: Vec<f32>,
    /// Ids of the grid nodes assigned to this cluster.
    pub node_ids: Vec<String>,
    /// Documents attached to member nodes, in node order.
    pub document_ids: Vec<String>,
    pub boolean_pattern: BooleanPattern,
    pub metadata: ClusterMetadata,
}

impl Cluster {
    pub fn id_for(index: usize) -> String {
        format!("cluster_{index}")
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.document_ids.iter().any(|d| d == document_id)
    }

    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }
}
