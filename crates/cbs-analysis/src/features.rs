//! Feature sets for population growth regression
//!
//! The target is the relative growth of one measure (population on
//! 1 January by default); the features are the relative growth of every
//! other measure in the same region and period.

use cbs_common::{CbsError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::debug;

use crate::growth::{GrowthPanel, GROWTH_SUFFIX};

/// Measure whose growth is predicted by default
pub const DEFAULT_TARGET: &str = "bevolking_1_januari";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub region: String,
    pub period: String,
    pub features: Vec<f64>,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub feature_names: Vec<String>,
    pub target_name: String,
    pub rows: Vec<FeatureRow>,
}

impl FeatureSet {
    /// Build from a growth panel. Rows where the target or any feature
    /// growth is missing are dropped, as are measures with no growth at all.
    /// Pass a [`GrowthPanel::normalized`] panel to keep zero-prior rows.
    pub fn from_growth(growth: &GrowthPanel, target_measure: &str) -> Result<Self> {
        let target_idx = growth.measure_index(target_measure)?;
        let feature_idx: Vec<usize> = (0..growth.measures().len())
            .filter(|&i| i != target_idx)
            .filter(|&i| growth.rows().iter().any(|r| r.growth[i].is_some()))
            .collect();

        let rows: Vec<FeatureRow> = growth
            .rows()
            .iter()
            .filter_map(|r| {
                let target = r.growth[target_idx]?;
                let features = feature_idx
                    .iter()
                    .map(|&i| r.growth[i])
                    .collect::<Option<Vec<f64>>>()?;
                Some(FeatureRow {
                    region: r.region.clone(),
                    period: r.period.clone(),
                    features,
                    target,
                })
            })
            .collect();

        debug!(
            rows = rows.len(),
            dropped = growth.rows().len() - rows.len(),
            features = feature_idx.len(),
            "Built growth feature set"
        );

        Ok(Self {
            feature_names: feature_idx
                .iter()
                .map(|&i| format!("{}{GROWTH_SUFFIX}", growth.measures()[i]))
                .collect(),
            target_name: format!("{target_measure}{GROWTH_SUFFIX}"),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Shuffle with a fixed seed and split off `ceil(len * test_fraction)`
    /// rows as the test set. Returns `(train, test)`.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> Result<(FeatureSet, FeatureSet)> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(CbsError::InvalidInput(format!(
                "test fraction must be between 0 and 1, got {test_fraction}"
            )));
        }

        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let test_len = (self.rows.len() as f64 * test_fraction).ceil() as usize;
        let (test_idx, train_idx) = order.split_at(test_len.min(order.len()));

        let subset = |idx: &[usize]| FeatureSet {
            feature_names: self.feature_names.clone(),
            target_name: self.target_name.clone(),
            rows: idx.iter().map(|&i| self.rows[i].clone()).collect(),
        };

        Ok((subset(train_idx), subset(test_idx)))
    }
}
