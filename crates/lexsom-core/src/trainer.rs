//! Competitive-learning loop over the codebook grid.
//!
//! One training step finds the BMU for a document, pulls the BMU's neighborhood
//! towards it and attaches the document to the BMU. Epochs repeat the step over a
//! freshly shuffled batch with exponentially decaying learning rate and radius.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::config::EngineConfig;
use crate::document::EmbeddingVector;
use crate::grid::CodebookGrid;

/// Incremental inserts train at this fraction of the initial learning rate.
pub const INCREMENTAL_LEARNING_RATE_FACTOR: f32 = 0.1;
/// Fixed neighborhood radius for incremental inserts.
pub const INCREMENTAL_RADIUS: f32 = 2.0;

/// Decay schedule derived from the engine config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    initial_learning_rate: f32,
    initial_radius: f32,
    max_epochs: usize,
}

impl Schedule {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            initial_learning_rate: config.learning_rate,
            initial_radius: config.radius,
            max_epochs: config.max_epochs,
        }
    }

    fn decay(&self, epoch: usize) -> f32 {
        if self.max_epochs == 0 {
            return 1.0;
        }
        (-(epoch as f32) / self.max_epochs as f32).exp()
    }

    /// `lr0 * e^(-epoch / max_epochs)`.
    pub fn learning_rate(&self, epoch: usize) -> f32 {
        self.initial_learning_rate * self.decay(epoch)
    }

    /// `radius0 * e^(-epoch / max_epochs)`.
    pub fn radius(&self, epoch: usize) -> f32 {
        self.initial_radius * self.decay(epoch)
    }

    /// Learning rate and radius used for single-document inserts.
    pub fn incremental(&self) -> (f32, f32) {
        (
            self.initial_learning_rate * INCREMENTAL_LEARNING_RATE_FACTOR,
            INCREMENTAL_RADIUS,
        )
    }

    pub fn max_epochs(&self) -> usize {
        self.max_epochs
    }
}

/// How far an epoch run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochRun {
    pub epochs_completed: usize,
    pub cancelled: bool,
}

/// One BMU-find-and-update step. `locations` maps document id to the node it is
/// attached to; a document moves to its latest BMU instead of being duplicated.
/// Returns the BMU index, or `None` for an empty grid.
pub(crate) fn train_step(
    grid: &mut CodebookGrid,
    locations: &mut HashMap<String, usize>,
    document: &EmbeddingVector,
    learning_rate: f32,
    radius: f32,
) -> Option<usize> {
    let (bmu, distance) = grid.best_matching_unit(&document.embedding)?;
    grid.activate(bmu, distance);
    grid.update_neighborhood(bmu, &document.embedding, learning_rate, radius);

    if let Some(previous) = locations.insert(document.id.clone(), bmu) {
        if previous != bmu {
            grid.detach(previous, &document.id);
        }
    }
    grid.attach(bmu, document);
    Some(bmu)
}

/// Runs the full epoch schedule over `batch`. `cancel` is checked between epochs.
pub(crate) fn run_epochs<R: Rng + ?Sized>(
    grid: &mut CodebookGrid,
    locations: &mut HashMap<String, usize>,
    batch: &[&EmbeddingVector],
    schedule: &Schedule,
    rng: &mut R,
    cancel: Option<&AtomicBool>,
) -> EpochRun {
    let mut order: Vec<usize> = (0..batch.len()).collect();
    for epoch in 0..schedule.max_epochs() {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            debug!(epoch, "training cancelled");
            return EpochRun {
                epochs_completed: epoch,
                cancelled: true,
            };
        }
        let learning_rate = schedule.learning_rate(epoch);
        let radius = schedule.radius(epoch);
        order.shuffle(rng);
        for &i in &order {
            train_step(grid, locations, batch[i], learning_rate, radius);
        }
        debug!(epoch, learning_rate, radius, "epoch complete");
    }
    EpochRun {
        epochs_completed: schedule.max_epochs(),
        cancelled: false,
    }
}
