//! The engine owns the codebook grid, the cluster list and the document store, and is
//! the only thing that mutates them.
//!
//! All randomness flows through one injectable RNG so a seeded engine is fully
//! reproducible. Use [`SharedEngine`] to share an engine between threads: writers
//! (training, removal, re-partitioning) take an exclusive lock, searches share it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::cluster::Cluster;
use crate::config::{ConfigError, EngineConfig};
use crate::document::EmbeddingVector;
use crate::grid::CodebookGrid;
use crate::partition::partition;
use crate::retrieval::{self, RankedDocument};
use crate::snapshot::{GridShape, Snapshot};
use crate::trainer::{self, Schedule};

type EngineRng = Box<dyn RngCore + Send + Sync>;

/// Outcome of a batch `train` call.
#[derive(Debug, Default)]
pub struct TrainReport {
    /// Documents stored and trained on.
    pub accepted: usize,
    /// One error per document that was skipped.
    pub rejected: Vec<EngineError>,
    pub epochs_completed: usize,
    pub cancelled: bool,
}

pub struct Engine {
    config: EngineConfig,
    schedule: Schedule,
    grid: CodebookGrid,
    clusters: Vec<Cluster>,
    documents: HashMap<String, EmbeddingVector>,
    /// Document id -> index of the node it is attached to.
    locations: HashMap<String, usize>,
    rng: EngineRng,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("clusters", &self.clusters.len())
            .field("documents", &self.documents.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Builds an engine with a fresh random grid. Seeds from `config.seed` when set,
    /// otherwise from OS entropy.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// Builds an engine drawing all randomness from `rng`.
    pub fn with_rng(
        config: EngineConfig,
        rng: impl RngCore + Send + Sync + 'static,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let mut rng: EngineRng = Box::new(rng);
        let grid = CodebookGrid::new(config.width, config.height, config.dimensions, rng.as_mut());
        info!(
            width = config.width,
            height = config.height,
            dimensions = config.dimensions,
            "initialized codebook grid"
        );
        Ok(Self {
            schedule: Schedule::from_config(&config),
            config,
            grid,
            clusters: Vec::new(),
            documents: HashMap::new(),
            locations: HashMap::new(),
            rng,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source used for recency checks.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn grid(&self) -> &CodebookGrid {
        &self.grid
    }

    /// Clusters from the most recent partitioning; empty before the first one.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn document(&self, id: &str) -> Option<&EmbeddingVector> {
        self.documents.get(id)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Index of the grid node `id` is attached to.
    pub fn node_of(&self, id: &str) -> Option<usize> {
        self.locations.get(id).copied()
    }

    /// Trains on `documents` for the configured number of epochs, then re-partitions.
    /// Documents with a wrong-sized or non-finite embedding are skipped and reported.
    pub fn train(&mut self, documents: Vec<EmbeddingVector>) -> TrainReport {
        self.train_inner(documents, None)
    }

    /// Like [`Engine::train`], but stops after the current epoch once `cancel` is set.
    /// Partitioning still runs over whatever the grid learned.
    pub fn train_with_cancel(
        &mut self,
        documents: Vec<EmbeddingVector>,
        cancel: &AtomicBool,
    ) -> TrainReport {
        self.train_inner(documents, Some(cancel))
    }

    fn train_inner(
        &mut self,
        documents: Vec<EmbeddingVector>,
        cancel: Option<&AtomicBool>,
    ) -> TrainReport {
        let mut rejected = Vec::new();
        let mut batch_ids = Vec::with_capacity(documents.len());
        for document in documents {
            if let Err(e) = self.check_embedding(Some(document.id.as_str()), &document.embedding) {
                warn!(id = %document.id, error = %e, "skipping document");
                rejected.push(e);
                continue;
            }
            batch_ids.push(document.id.clone());
            self.documents.insert(document.id.clone(), document.sanitized());
        }

        // Repeated ids train once, on the copy stored last.
        let mut seen = HashSet::new();
        batch_ids.retain(|id| seen.insert(id.clone()));

        let batch: Vec<&EmbeddingVector> = batch_ids
            .iter()
            .filter_map(|id| self.documents.get(id))
            .collect();
        let run = trainer::run_epochs(
            &mut self.grid,
            &mut self.locations,
            &batch,
            &self.schedule,
            self.rng.as_mut(),
            cancel,
        );
        info!(
            accepted = batch.len(),
            rejected = rejected.len(),
            epochs = run.epochs_completed,
            cancelled = run.cancelled,
            "training finished"
        );
        let accepted = batch.len();

        self.repartition();
        TrainReport {
            accepted,
            rejected,
            epochs_completed: run.epochs_completed,
            cancelled: run.cancelled,
        }
    }

    /// Trains a single document at a reduced learning rate and small fixed radius.
    /// Clusters are left as they are; call [`Engine::optimize_clusters`] to refresh them.
    pub fn train_incremental(&mut self, document: EmbeddingVector) -> Result<(), EngineError> {
        self.check_embedding(Some(document.id.as_str()), &document.embedding)?;
        let document = document.sanitized();
        let (learning_rate, radius) = self.schedule.incremental();
        let bmu = trainer::train_step(
            &mut self.grid,
            &mut self.locations,
            &document,
            learning_rate,
            radius,
        );
        debug!(id = %document.id, ?bmu, "incremental insert");
        self.documents.insert(document.id.clone(), document);
        Ok(())
    }

    /// Forgets a document everywhere. Returns whether it was known. Cluster statistics
    /// are not recomputed.
    pub fn remove_document(&mut self, id: &str) -> bool {
        let mut removed = self.documents.remove(id).is_some();
        if let Some(node) = self.locations.remove(id) {
            removed |= self.grid.detach(node, id);
        }
        for cluster in &mut self.clusters {
            let before = cluster.document_ids.len();
            cluster.document_ids.retain(|d| d != id);
            removed |= cluster.document_ids.len() != before;
        }
        if removed {
            debug!(id, "removed document");
        }
        removed
    }

    /// Re-partitions the current grid without touching its weights.
    pub fn optimize_clusters(&mut self) {
        self.repartition();
    }

    fn repartition(&mut self) {
        let result = partition(
            &mut self.grid,
            &self.documents,
            self.config.cluster_count,
            self.config.kmeans_max_iterations,
            self.rng.as_mut(),
            self.clock.now_millis(),
        );
        info!(
            clusters = result.clusters.len(),
            iterations = result.iterations,
            converged = result.converged,
            "partitioned codebook"
        );
        self.clusters = result.clusters;
    }

    /// Top `limit` documents for `query`, best first. An untrained engine yields no hits.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<RankedDocument>, EngineError> {
        self.check_embedding(None, query)?;
        Ok(retrieval::search(
            &self.grid,
            &self.clusters,
            &self.documents,
            query,
            limit,
            self.clock.now_millis(),
        ))
    }

    /// Point-in-time snapshot of config, grid shape and clusters.
    pub fn export(&self) -> Snapshot {
        Snapshot {
            config: self.config.clone(),
            grid: GridShape {
                width: self.grid.width(),
                height: self.grid.height(),
                node_count: self.grid.len(),
            },
            clusters: self.clusters.clone(),
            document_count: self.documents.len(),
            exported_at: self.clock.now_millis(),
        }
    }

    fn check_embedding(&self, id: Option<&str>, embedding: &[f32]) -> Result<(), EngineError> {
        if embedding.len() != self.config.dimensions {
            return Err(EngineError::InvalidEmbeddingDimension {
                id: id.map(str::to_string),
                expected: self.config.dimensions,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(EngineError::NonFiniteEmbedding {
                id: id.map(str::to_string),
            });
        }
        Ok(())
    }
}

/// An [`Engine`] behind a readers-writer lock.
#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<RwLock<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    pub fn train(&self, documents: Vec<EmbeddingVector>) -> TrainReport {
        self.inner.write().train(documents)
    }

    pub fn train_with_cancel(
        &self,
        documents: Vec<EmbeddingVector>,
        cancel: &AtomicBool,
    ) -> TrainReport {
        self.inner.write().train_with_cancel(documents, cancel)
    }

    pub fn train_incremental(&self, document: EmbeddingVector) -> Result<(), EngineError> {
        self.inner.write().train_incremental(document)
    }

    pub fn remove_document(&self, id: &str) -> bool {
        self.inner.write().remove_document(id)
    }

    pub fn optimize_clusters(&self) {
        self.inner.write().optimize_clusters()
    }

    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<RankedDocument>, EngineError> {
        self.inner.read().search(query, limit)
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.inner.read().clusters().to_vec()
    }

    pub fn export(&self) -> Snapshot {
        self.inner.read().export()
    }

    /// Shared read access for anything not wrapped above.
    pub fn read(&self) -> RwLockReadGuard<'_, Engine> {
        self.inner.read()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(
        "invalid embedding dimension for {}: expected {expected}, got {actual}",
        .id.as_deref().unwrap_or("query")
    )]
    InvalidEmbeddingDimension {
        id: Option<String>,
        expected: usize,
        actual: usize,
    },
    #[error("embedding for {} contains NaN or infinite values", .id.as_deref().unwrap_or("query"))]
    NonFiniteEmbedding { id: Option<String> },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, MILLIS_PER_DAY};
    use crate::descriptor::BooleanPattern;
    use crate::document::{DocumentMetadata, EvidenceType};
    use crate::vector::l2_norm;

    const NOW: i64 = 1_700_000_000_000;
    const DIM: usize = 4;

    fn config(width: usize, height: usize, cluster_count: usize) -> EngineConfig {
        EngineConfig {
            width,
            height,
            dimensions: DIM,
            learning_rate: 0.5,
            radius: 2.0,
            max_epochs: 30,
            cluster_count,
            kmeans_max_iterations: 100,
            seed: Some(42),
        }
    }

    fn engine(width: usize, height: usize, cluster_count: usize) -> Engine {
        Engine::new(config(width, height, cluster_count))
            .unwrap()
            .with_clock(FixedClock(NOW))
    }

    fn doc(id: &str, embedding: [f32; DIM], evidence: &str, confidence: f32) -> EmbeddingVector {
        EmbeddingVector::new(
            id,
            embedding.to_vec(),
            DocumentMetadata {
                case_id: Some("case-1".to_string()),
                evidence_type: Some(EvidenceType::from(evidence)),
                legal_category: Some("criminal".to_string()),
                confidence,
                timestamp: NOW - MILLIS_PER_DAY,
            },
        )
        .with_content(format!("content of {id}"))
    }

    fn corpus() -> Vec<EmbeddingVector> {
        vec![
            doc("a", [1.0, 0.1, 0.0, 0.0], "digital", 0.6),
            doc("b", [0.0, 1.0, 0.2, 0.0], "digital", 0.6),
            doc("c", [0.0, 0.0, 1.0, 0.3], "digital", 0.6),
            doc("d", [0.4, 0.0, 0.0, 1.0], "digital", 0.6),
            doc("e", [0.7, 0.7, 0.0, 0.0], "digital", 0.6),
        ]
    }

    fn assert_normalized(engine: &Engine) {
        for node in engine.grid().nodes() {
            assert!(
                (l2_norm(&node.weights) - 1.0).abs() < 1e-6,
                "{} has norm {}",
                node.id,
                l2_norm(&node.weights)
            );
        }
    }

    fn ids(results: &[RankedDocument]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Engine::new(EngineConfig {
            cluster_count: 0,
            ..config(3, 3, 1)
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::InvalidClusterCount)));
    }

    #[test]
    fn training_keeps_weights_normalized() {
        let mut e = engine(4, 4, 2);
        let report = e.train(corpus());
        assert_eq!(report.accepted, 5);
        assert!(report.rejected.is_empty());
        assert_eq!(report.epochs_completed, 30);
        assert_normalized(&e);

        e.train_incremental(doc("f", [0.0, 0.0, 0.0, 1.0], "physical", 0.2))
            .unwrap();
        assert_normalized(&e);
    }

    #[test]
    fn partition_yields_configured_cluster_count() {
        let mut e = engine(3, 3, 4);
        e.train(corpus());
        assert_eq!(e.clusters().len(), 4);
        assert!(e.grid().nodes().iter().all(|n| n.cluster.is_some_and(|c| c < 4)));
        let members: usize = e.clusters().iter().map(|c| c.document_ids.len()).sum();
        assert_eq!(members, 5);
    }

    #[test]
    fn empty_train_still_partitions() {
        let mut e = engine(3, 3, 3);
        assert!(e.clusters().is_empty());
        let report = e.train(Vec::new());
        assert_eq!(report.accepted, 0);
        assert_eq!(e.clusters().len(), 3);
        assert!(e.clusters().iter().all(Cluster::is_empty));
    }

    #[test]
    fn forensic_cluster_pattern() {
        let mut e = engine(3, 3, 1);
        e.train(vec![
            doc("f1", [1.0, 0.0, 0.0, 0.0], "forensic", 0.9),
            doc("f2", [0.0, 1.0, 0.0, 0.0], "forensic", 0.9),
            doc("f3", [0.0, 0.0, 1.0, 0.0], "forensic", 0.9),
        ]);
        let clusters = e.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].metadata.size, 3);
        assert_eq!(
            clusters[0].boolean_pattern,
            BooleanPattern([[true, true], [false, true]])
        );
    }

    #[test]
    fn exact_embedding_ranks_first() {
        let mut e = engine(4, 4, 2);
        e.train(corpus());
        let query = [0.0, 1.0, 0.2, 0.0];
        let results = e.search(&query, 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "b");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[0].content, "content of b");
    }

    #[test]
    fn search_is_idempotent() {
        let mut e = engine(4, 4, 2);
        e.train(corpus());
        let query = [0.5, 0.5, 0.1, 0.1];
        let first = e.search(&query, 5).unwrap();
        let second = e.search(&query, 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn search_on_empty_engine_returns_nothing() {
        let e = engine(3, 3, 2);
        assert!(e.search(&[1.0, 0.0, 0.0, 0.0], 10).unwrap().is_empty());
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let e = engine(3, 3, 2);
        let err = e.search(&[1.0, 0.0], 10).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidEmbeddingDimension {
                id: None,
                expected: DIM,
                actual: 2
            }
        ));
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn wrong_dimension_is_skipped_rest_trains() {
        let mut e = engine(3, 3, 2);
        let mut docs = corpus();
        docs.insert(
            2,
            EmbeddingVector::new("bad", vec![1.0, 0.0, 0.0], DocumentMetadata::default()),
        );
        let report = e.train(docs);
        assert_eq!(report.accepted, 5);
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            &report.rejected[0],
            EngineError::InvalidEmbeddingDimension { id: Some(id), expected: DIM, actual: 3 } if id == "bad"
        ));
        assert_eq!(e.document_count(), 5);
        assert!(e.document("bad").is_none());
        assert!(e.node_of("a").is_some());
    }

    #[test]
    fn duplicate_ids_in_batch_train_once() {
        let mut e = engine(3, 3, 2);
        let report = e.train(vec![
            doc("x", [1.0, 0.0, 0.0, 0.0], "digital", 0.6),
            doc("x", [0.0, 1.0, 0.0, 0.0], "digital", 0.6),
        ]);
        assert_eq!(report.accepted, 1);
        assert_eq!(e.document_count(), 1);
        assert_eq!(
            e.document("x").map(|d| d.embedding.clone()),
            Some(vec![0.0, 1.0, 0.0, 0.0])
        );
        let holders = e.grid().nodes().iter().filter(|n| n.contains("x")).count();
        assert_eq!(holders, 1);
        // One attachment per epoch for the single stored copy.
        let attachments: u32 = e
            .grid()
            .nodes()
            .iter()
            .map(|n| n.legal_context.attachments)
            .sum();
        assert_eq!(attachments as usize, report.epochs_completed);
    }

    #[test]
    fn optimize_clusters_leaves_weights_untouched() {
        let mut e = engine(4, 4, 3);
        e.train(corpus());
        e.train_incremental(doc("y", [0.1, 0.0, 1.0, 0.0], "testimony", 0.8))
            .unwrap();
        let weights_before: Vec<Vec<f32>> =
            e.grid().nodes().iter().map(|n| n.weights.clone()).collect();
        e.optimize_clusters();
        let weights_after: Vec<Vec<f32>> =
            e.grid().nodes().iter().map(|n| n.weights.clone()).collect();
        assert_eq!(weights_before, weights_after);
        assert_eq!(e.clusters().len(), 3);
    }

    #[test]
    fn non_finite_embedding_is_rejected() {
        let mut e = engine(3, 3, 2);
        let err = e
            .train_incremental(EmbeddingVector::new(
                "nan",
                vec![f32::NAN, 0.0, 0.0, 0.0],
                DocumentMetadata::default(),
            ))
            .unwrap_err();
        assert!(matches!(err, EngineError::NonFiniteEmbedding { .. }));
        assert_eq!(e.document_count(), 0);
    }

    #[test]
    fn removal_is_complete() {
        let mut e = engine(4, 4, 2);
        e.train(corpus());
        assert!(e.remove_document("b"));
        assert!(e.document("b").is_none());
        assert!(e.node_of("b").is_none());
        assert!(e.grid().nodes().iter().all(|n| !n.contains("b")));
        assert!(e.clusters().iter().all(|c| !c.contains("b")));
        let results = e.search(&[0.0, 1.0, 0.2, 0.0], 10).unwrap();
        assert!(!ids(&results).contains(&"b"));
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn removing_unknown_id_changes_nothing() {
        let mut e = engine(3, 3, 2);
        e.train(corpus());
        let before = e.export();
        let nodes_before = e.grid().nodes().to_vec();
        assert!(!e.remove_document("missing"));
        assert_eq!(e.export(), before);
        assert_eq!(e.grid().nodes(), nodes_before.as_slice());
    }

    #[test]
    fn retraining_does_not_duplicate_attachments() {
        let mut e = engine(3, 3, 2);
        e.train(corpus());
        e.train(corpus());
        for d in corpus() {
            let holders = e
                .grid()
                .nodes()
                .iter()
                .filter(|n| n.contains(&d.id))
                .count();
            assert_eq!(holders, 1, "{} attached to {} nodes", d.id, holders);
        }
        let results = e.search(&[0.5, 0.5, 0.5, 0.5], 10).unwrap();
        let unique: std::collections::HashSet<&str> = ids(&results).into_iter().collect();
        assert_eq!(unique.len(), results.len());
    }

    #[test]
    fn incremental_insert_is_searchable_after_optimize() {
        let mut e = engine(4, 4, 2);
        e.train(corpus());
        let extra = doc("x", [0.0, 0.0, 0.1, 1.0], "forensic", 0.95);
        e.train_incremental(extra).unwrap();
        assert_eq!(e.document_count(), 6);
        assert!(e.clusters().iter().all(|c| !c.contains("x")));

        e.optimize_clusters();
        assert!(e.clusters().iter().any(|c| c.contains("x")));
        let results = e.search(&[0.0, 0.0, 0.1, 1.0], 6).unwrap();
        assert!(ids(&results).contains(&"x"));
    }

    #[test]
    fn same_seed_same_state() {
        let mut a = engine(4, 4, 3);
        let mut b = engine(4, 4, 3);
        a.train(corpus());
        b.train(corpus());
        assert_eq!(a.export(), b.export());
        let q = [0.2, 0.9, 0.0, 0.1];
        assert_eq!(a.search(&q, 5).unwrap(), b.search(&q, 5).unwrap());
    }

    #[test]
    fn cancelled_training_still_partitions() {
        let mut e = engine(3, 3, 2);
        let cancel = AtomicBool::new(true);
        let report = e.train_with_cancel(corpus(), &cancel);
        assert!(report.cancelled);
        assert_eq!(report.epochs_completed, 0);
        assert_eq!(e.document_count(), 5);
        assert_eq!(e.clusters().len(), 2);
    }

    #[test]
    fn export_reflects_state() {
        let mut e = engine(3, 2, 2);
        e.train(corpus());
        let snapshot = e.export();
        assert_eq!(snapshot.grid.width, 3);
        assert_eq!(snapshot.grid.height, 2);
        assert_eq!(snapshot.grid.node_count, 6);
        assert_eq!(snapshot.document_count, 5);
        assert_eq!(snapshot.clusters.len(), 2);
        assert_eq!(snapshot.exported_at, NOW);
        assert_eq!(snapshot.config, *e.config());
    }

    #[test]
    fn shared_engine_serves_concurrent_searches() {
        let shared = SharedEngine::new(engine(4, 4, 2));
        shared.train(corpus());
        let query = [1.0, 0.1, 0.0, 0.0];
        let expected = shared.search(&query, 3).unwrap();
        std::thread::scope(|s| {
            for _ in 0..4 {
                let shared = shared.clone();
                let expected = &expected;
                s.spawn(move || {
                    assert_eq!(&shared.search(&query, 3).unwrap(), expected);
                });
            }
        });
        assert!(shared.remove_document("a"));
        shared.optimize_clusters();
        assert_eq!(shared.clusters().len(), 2);
        assert_eq!(shared.read().document_count(), 4);
    }
}
