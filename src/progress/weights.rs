//! Stage-weight normalization.
//!
//! Extractors report progress per pipeline stage; subscribers want a single
//! 0-100 number per link. The normalizer folds a stage report into overall
//! progress using the configured per-scraper weight table: the weights of
//! all stages *before* the current one count as done, and the current
//! stage contributes its weight scaled by stage-local progress.

use std::collections::HashMap;

use crate::config::{ProgressConfig, StageWeight};
use crate::types::{ScraperType, Stage};

/// Ordered weight table for one scraper type
#[derive(Clone, Debug)]
pub struct StageWeights {
    ordered: Vec<(Stage, u32)>,
}

impl StageWeights {
    /// Build from a configured table (order is significant)
    pub fn new(table: &[StageWeight]) -> Self {
        Self {
            ordered: table.iter().map(|w| (w.stage, w.weight)).collect(),
        }
    }

    /// Overall progress for a stage report
    ///
    /// Terminal stages short-circuit: `completed` is 100, `pending` is 0.
    /// A stage absent from the table passes its stage-local progress
    /// through clamped — better a coarse number than a stuck one.
    pub fn overall(&self, stage: Stage, stage_progress: f64) -> f64 {
        match stage {
            Stage::Completed => return 100.0,
            Stage::Pending => return 0.0,
            _ => {}
        }

        let p = stage_progress.clamp(0.0, 100.0);

        let mut prefix = 0u32;
        for (table_stage, weight) in &self.ordered {
            if *table_stage == stage {
                return f64::from(prefix) + f64::from(*weight) * p / 100.0;
            }
            prefix += weight;
        }

        p
    }
}

/// Per-scraper-type weight tables
#[derive(Clone, Debug)]
pub struct WeightTable {
    per_type: HashMap<ScraperType, StageWeights>,
}

impl WeightTable {
    /// Build the table from progress configuration
    pub fn from_config(config: &ProgressConfig) -> Self {
        Self {
            per_type: config
                .stage_weights
                .iter()
                .map(|(scraper_type, table)| (*scraper_type, StageWeights::new(table)))
                .collect(),
        }
    }

    /// Overall progress for a stage report from one scraper type
    ///
    /// Scraper types without a configured table fall back to clamped
    /// stage-local progress.
    pub fn overall(&self, scraper_type: ScraperType, stage: Stage, stage_progress: f64) -> f64 {
        match self.per_type.get(&scraper_type) {
            Some(weights) => weights.overall(stage, stage_progress),
            None => match stage {
                Stage::Completed => 100.0,
                Stage::Pending => 0.0,
                _ => stage_progress.clamp(0.0, 100.0),
            },
        }
    }
}
