//! The codebook grid: a fixed `width x height` array of nodes, each holding a unit-length
//! weight vector plus the documents that last matched it.
//!
//! Nodes live in one row-major `Vec` (index `y * width + x`) for the lifetime of the grid.

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::document::{DocumentMetadata, EmbeddingVector, EvidenceType};
use crate::vector::{euclidean_distance, normalize_in_place, random_unit_vector};

/// Aggregated legal metadata of the documents attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegalContext {
    /// Most recently seen evidence type.
    pub evidence_type: Option<EvidenceType>,
    /// Most recently seen legal category.
    pub case_category: Option<String>,
    /// Running mean confidence over every attachment this node has seen. A document
    /// trained repeatedly (once per epoch, or across `train` calls) counts each time it
    /// lands here, so longer-resident documents weigh more.
    pub confidence: f32,
    /// Highest evidence priority seen; 0 until the first attachment.
    pub priority: u8,
    /// Number of attachments folded into `confidence`.
    pub attachments: u32,
}

impl LegalContext {
    fn record(&mut self, metadata: &DocumentMetadata) {
        let n = self.attachments as f32;
        self.confidence = (self.confidence * n + metadata.confidence) / (n + 1.0);
        self.attachments += 1;

        let priority = metadata.evidence().map_or(1, EvidenceType::priority);
        self.priority = self.priority.max(priority);
        if let Some(evidence) = metadata.evidence() {
            self.evidence_type = Some(evidence.clone());
        }
        if let Some(category) = metadata.category() {
            self.case_category = Some(category.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridNode {
    pub id: String,
    /// Codebook vector, always unit length.
    pub weights: Vec<f32>,
    /// `(x, y)` grid coordinates.
    pub position: (usize, usize),
    /// Index of the k-means cluster this node belongs to, once partitioned.
    pub cluster: Option<usize>,
    /// `1 / (1 + distance)` from the last time this node was a BMU.
    pub activation: f32,
    /// Attached document ids in attachment order, without duplicates.
    pub document_ids: Vec<String>,
    pub legal_context: LegalContext,
}

impl GridNode {
    pub fn contains(&self, id: &str) -> bool {
        self.document_ids.iter().any(|d| d == id)
    }
}

#[derive(Debug, Clone)]
pub struct CodebookGrid {
    width: usize,
    height: usize,
    dimensions: usize,
    nodes: Vec<GridNode>,
}

impl CodebookGrid {
    /// Allocates `width * height` nodes with random unit weights.
    pub fn new<R: Rng + ?Sized>(width: usize, height: usize, dimensions: usize, rng: &mut R) -> Self {
        let mut nodes = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                nodes.push(GridNode {
                    id: format!("node_{x}_{y}"),
                    weights: random_unit_vector(dimensions, rng),
                    position: (x, y),
                    cluster: None,
                    activation: 0.0,
                    document_ids: Vec::new(),
                    legal_context: LegalContext::default(),
                });
            }
        }
        Self {
            width,
            height,
            dimensions,
            nodes,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GridNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [GridNode] {
        &mut self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&GridNode> {
        self.nodes.get(index)
    }

    /// Node at grid coordinates.
    pub fn node_at(&self, x: usize, y: usize) -> Option<&GridNode> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.nodes.get(y * self.width + x)
    }

    /// Distance from `embedding` to every node, in node order. Computed in parallel.
    pub fn distances(&self, embedding: &[f32]) -> Vec<f32> {
        self.nodes
            .par_iter()
            .map(|n| euclidean_distance(&n.weights, embedding))
            .collect()
    }

    /// Index and distance of the node closest to `embedding`. Ties go to the node
    /// that comes first in row-major order.
    pub fn best_matching_unit(&self, embedding: &[f32]) -> Option<(usize, f32)> {
        self.nodes
            .par_iter()
            .enumerate()
            .map(|(i, n)| (i, euclidean_distance(&n.weights, embedding)))
            .reduce_with(|a, b| {
                if b.1 < a.1 || (b.1 == a.1 && b.0 < a.0) {
                    b
                } else {
                    a
                }
            })
    }

    /// Records the BMU activation for a match at `distance`.
    pub(crate) fn activate(&mut self, bmu: usize, distance: f32) {
        if let Some(node) = self.nodes.get_mut(bmu) {
            node.activation = 1.0 / (1.0 + distance);
        }
    }

    /// Pulls every node within Manhattan distance `radius` of `bmu` towards `embedding`
    /// with Gaussian falloff, then renormalizes it. Returns the number of nodes touched.
    pub(crate) fn update_neighborhood(
        &mut self,
        bmu: usize,
        embedding: &[f32],
        learning_rate: f32,
        radius: f32,
    ) -> usize {
        let Some((bx, by)) = self.nodes.get(bmu).map(|n| n.position) else {
            return 0;
        };
        let reach = radius.max(0.0).floor() as usize;
        let two_r_sq = 2.0 * radius * radius;
        let x_range = bx.saturating_sub(reach)..=bx.saturating_add(reach).min(self.width - 1);
        let y_range = by.saturating_sub(reach)..=by.saturating_add(reach).min(self.height - 1);

        let mut scratch = vec![0.0f32; self.dimensions];
        let mut touched = 0;
        for y in y_range {
            for x in x_range.clone() {
                let dist = (bx.abs_diff(x) + by.abs_diff(y)) as f32;
                if dist > radius {
                    continue;
                }
                let influence = (-(dist * dist) / two_r_sq).exp();
                let step = learning_rate * influence;
                let node = &mut self.nodes[y * self.width + x];
                for ((s, &w), &e) in scratch.iter_mut().zip(&node.weights).zip(embedding) {
                    *s = w + step * (e - w);
                }
                // A step that lands on the origin keeps the previous weights.
                if normalize_in_place(&mut scratch) {
                    node.weights.copy_from_slice(&scratch);
                }
                touched += 1;
            }
        }
        touched
    }

    /// Attaches `document` to node `index` and folds its metadata into the node's context.
    pub(crate) fn attach(&mut self, index: usize, document: &EmbeddingVector) {
        let Some(node) = self.nodes.get_mut(index) else {
            return;
        };
        if !node.contains(&document.id) {
            node.document_ids.push(document.id.clone());
        }
        node.legal_context.record(&document.metadata);
    }

    /// Removes `id` from node `index`. Returns whether it was present.
    pub(crate) fn detach(&mut self, index: usize, id: &str) -> bool {
        let Some(node) = self.nodes.get_mut(index) else {
            return false;
        };
        let before = node.document_ids.len();
        node.document_ids.retain(|d| d != id);
        node.document_ids.len() != before
    }
}
