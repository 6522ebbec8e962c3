//! Semantic search over the trained grid.
//!
//! The query's nearest grid nodes supply the candidate documents; each candidate is
//! scored by fusing embedding similarity, its cluster's descriptor and its own legal
//! metadata.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::clock::MILLIS_PER_DAY;
use crate::cluster::Cluster;
use crate::document::{DocumentMetadata, EmbeddingVector};
use crate::grid::CodebookGrid;
use crate::vector::cosine_similarity;

/// At most this many nearest nodes contribute candidates.
pub const SEARCH_NODE_CAP: usize = 20;

pub const SIMILARITY_WEIGHT: f32 = 0.6;
pub const DESCRIPTOR_WEIGHT: f32 = 0.2;
pub const LEGAL_CONTEXT_WEIGHT: f32 = 0.2;

const CONFIDENCE_WEIGHT: f32 = 0.3;
const RECENCY_WEIGHT: f32 = 0.2;
const RECENCY_HORIZON_DAYS: f32 = 30.0;

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDocument {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Fused ranking score.
    pub score: f32,
    /// Cosine similarity between query and document embedding.
    pub similarity: f32,
    /// Grid node the document was found on.
    pub node_id: String,
    pub cluster_id: Option<String>,
}

/// Evidence weight + `confidence * 0.3` + a linear recency bonus over the last 30 days,
/// clamped to `[0, 1]`.
pub fn legal_context_boost(metadata: &DocumentMetadata, now_millis: i64) -> f32 {
    let mut boost = metadata.evidence().map_or(0.0, |e| e.search_weight());
    boost += metadata.confidence * CONFIDENCE_WEIGHT;
    let age_days = now_millis.saturating_sub(metadata.timestamp).max(0) as f32 / MILLIS_PER_DAY as f32;
    if age_days < RECENCY_HORIZON_DAYS {
        boost += (RECENCY_HORIZON_DAYS - age_days) / RECENCY_HORIZON_DAYS * RECENCY_WEIGHT;
    }
    boost.clamp(0.0, 1.0)
}

/// Ranks documents attached to the nodes nearest `query`. The caller has already
/// checked the query's dimensionality.
pub(crate) fn search(
    grid: &CodebookGrid,
    clusters: &[Cluster],
    documents: &HashMap<String, EmbeddingVector>,
    query: &[f32],
    limit: usize,
    now_millis: i64,
) -> Vec<RankedDocument> {
    if grid.is_empty() || documents.is_empty() || limit == 0 {
        return Vec::new();
    }

    let distances = grid.distances(query);
    let mut nearest: Vec<usize> = (0..distances.len()).collect();
    nearest.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]).then(a.cmp(&b)));
    nearest.truncate(SEARCH_NODE_CAP.min(grid.len()));

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for &index in &nearest {
        let node = &grid.nodes()[index];
        let descriptor_boost = node
            .cluster
            .and_then(|c| clusters.get(c))
            .map_or(0.0, |c| c.boolean_pattern.boost());
        let cluster_id = node.cluster.map(Cluster::id_for);

        for id in &node.document_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(document) = documents.get(id) else {
                continue;
            };
            let similarity = cosine_similarity(query, &document.embedding);
            let score = SIMILARITY_WEIGHT * similarity
                + DESCRIPTOR_WEIGHT * descriptor_boost
                + LEGAL_CONTEXT_WEIGHT * legal_context_boost(&document.metadata, now_millis);
            results.push(RankedDocument {
                id: document.id.clone(),
                content: document.content.clone(),
                metadata: document.metadata.clone(),
                score,
                similarity,
                node_id: node.id.clone(),
                cluster_id: cluster_id.clone(),
            });
        }
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    results
}
