//! k-means over the trained codebook vectors, producing a fixed number of clusters.

use std::collections::HashMap;

use rand::Rng;

use crate::cluster::{Cluster, ClusterMetadata};
use crate::descriptor::BooleanPattern;
use crate::document::{EmbeddingVector, EvidenceType};
use crate::grid::CodebookGrid;
use crate::vector::{euclidean_distance, mean_vector};

/// Result of one partitioning run.
#[derive(Debug, Clone)]
pub struct Partition {
    pub clusters: Vec<Cluster>,
    /// Assignment passes performed.
    pub iterations: usize,
    /// Whether a pass finished without any node changing cluster.
    pub converged: bool,
}

/// Partitions the grid's nodes into `cluster_count` clusters, writes each node's
/// cluster index, and builds cluster records with descriptors.
///
/// Initial centroids are the weights of `cluster_count` nodes sampled without
/// replacement. When there are fewer nodes than clusters, every node is sampled and
/// the remaining centroids repeat earlier ones; ties go to the lower cluster index so
/// those extras stay empty.
pub fn partition<R: Rng + ?Sized>(
    grid: &mut CodebookGrid,
    documents: &HashMap<String, EmbeddingVector>,
    cluster_count: usize,
    max_iterations: usize,
    rng: &mut R,
    now_millis: i64,
) -> Partition {
    let dimensions = grid.dimensions();
    let node_count = grid.len();
    if node_count == 0 || cluster_count == 0 {
        return Partition {
            clusters: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let sampled = rand::seq::index::sample(rng, node_count, cluster_count.min(node_count));
    let mut centroids: Vec<Vec<f32>> = (0..cluster_count)
        .map(|c| grid.nodes()[sampled.index(c % sampled.len())].weights.clone())
        .collect();

    let mut assignments = vec![usize::MAX; node_count];
    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        iterations += 1;
        let mut changed = false;
        for (node, slot) in grid.nodes().iter().zip(assignments.iter_mut()) {
            let nearest = nearest_centroid(&node.weights, &centroids);
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&[f32]> = grid
                .nodes()
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == c)
                .map(|(n, _)| n.weights.as_slice())
                .collect();
            if !members.is_empty() {
                *centroid = mean_vector(&members, dimensions);
            }
        }
    }

    for (node, &a) in grid.nodes_mut().iter_mut().zip(&assignments) {
        node.cluster = Some(a);
    }

    let clusters = centroids
        .into_iter()
        .enumerate()
        .map(|(c, centroid)| build_cluster(grid, documents, c, centroid, now_millis))
        .collect();

    Partition {
        clusters,
        iterations,
        converged,
    }
}

/// Index of the closest centroid; lowest index wins ties.
fn nearest_centroid(weights: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = euclidean_distance(weights, c);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

fn build_cluster(
    grid: &CodebookGrid,
    documents: &HashMap<String, EmbeddingVector>,
    index: usize,
    centroid: Vec<f32>,
    now_millis: i64,
) -> Cluster {
    let mut node_ids = Vec::new();
    let mut document_ids = Vec::new();
    let mut confidence_sum = 0.0f32;
    let mut populated = 0usize;
    let mut evidence_counts: Vec<(&EvidenceType, usize)> = Vec::new();

    for node in grid.nodes().iter().filter(|n| n.cluster == Some(index)) {
        node_ids.push(node.id.clone());
        if node.document_ids.is_empty() {
            continue;
        }
        document_ids.extend(node.document_ids.iter().cloned());
        confidence_sum += node.legal_context.confidence;
        populated += 1;
        if let Some(evidence) = &node.legal_context.evidence_type {
            match evidence_counts.iter_mut().find(|(e, _)| *e == evidence) {
                Some((_, count)) => *count += 1,
                None => evidence_counts.push((evidence, 1)),
            }
        }
    }

    let mut dominant: Option<(&EvidenceType, usize)> = None;
    for &(evidence, count) in &evidence_counts {
        if dominant.map_or(true, |(_, best)| count > best) {
            dominant = Some((evidence, count));
        }
    }

    let metadata = ClusterMetadata {
        size: document_ids.len(),
        avg_confidence: if populated == 0 {
            0.0
        } else {
            confidence_sum / populated as f32
        },
        dominant_evidence_type: dominant.map(|(e, _)| e.clone()),
        created_at: now_millis,
    };
    let timestamps = document_ids
        .iter()
        .filter_map(|id| documents.get(id))
        .map(|d| d.metadata.timestamp);
    let boolean_pattern = BooleanPattern::derive(&metadata, timestamps, now_millis);

    Cluster {
        id: Cluster::id_for(index),
        centroid,
        node_ids,
        document_ids,
        boolean_pattern,
        metadata,
    }
}
