//! Period-over-period growth per region
//!
//! For every measure and row the previous value is the value `lag` rows
//! earlier for the same region, after sorting by region and period. Growth is
//! `(current - previous) / previous` in plain IEEE arithmetic, so a zero
//! previous value yields ±∞ (or NaN for 0/0). Those stay in the raw output;
//! [`GrowthPanel::normalized`] maps every non-finite growth to 0. Rows
//! without a previous value keep growth missing in both forms.

use cbs_common::{CbsError, Result};
use serde::Serialize;

use crate::panel::Panel;

/// Suffix of the previous-value column in [`GrowthPanel::to_panel`]
pub const PREVIOUS_SUFFIX: &str = "_previous_moment";
/// Suffix of the relative growth column in [`GrowthPanel::to_panel`]
pub const GROWTH_SUFFIX: &str = "_growth";
/// Suffix of the absolute change column in [`GrowthPanel::to_panel`]
pub const CHANGE_SUFFIX: &str = "_change";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthRow {
    pub region: String,
    pub period: String,
    pub values: Vec<Option<f64>>,
    pub previous: Vec<Option<f64>>,
    pub growth: Vec<Option<f64>>,
    pub change: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrowthPanel {
    measures: Vec<String>,
    lag: usize,
    rows: Vec<GrowthRow>,
}

/// Compute previous values, relative growth and absolute change for every
/// measure in `panel`.
pub fn growth_by_period(panel: &Panel, lag: usize) -> Result<GrowthPanel> {
    if lag == 0 {
        return Err(CbsError::InvalidInput("growth lag must be at least 1".to_string()));
    }

    let mut sorted = panel.clone();
    sorted.sort();

    let width = sorted.measures().len();
    let observations = sorted.rows();
    let mut rows = Vec::with_capacity(observations.len());
    let mut region_start = 0;

    for (i, obs) in observations.iter().enumerate() {
        if i > 0 && observations[i - 1].region != obs.region {
            region_start = i;
        }

        let prior = (i >= region_start + lag).then(|| &observations[i - lag]);
        let mut previous = Vec::with_capacity(width);
        let mut growth = Vec::with_capacity(width);
        let mut change = Vec::with_capacity(width);

        for m in 0..width {
            let prev = prior.and_then(|p| p.values[m]);
            let pair = obs.values[m].zip(prev);
            previous.push(prev);
            growth.push(pair.map(|(cur, prev)| (cur - prev) / prev));
            change.push(pair.map(|(cur, prev)| cur - prev));
        }

        rows.push(GrowthRow {
            region: obs.region.clone(),
            period: obs.period.clone(),
            values: obs.values.clone(),
            previous,
            growth,
            change,
        });
    }

    Ok(GrowthPanel {
        measures: sorted.measures().to_vec(),
        lag,
        rows,
    })
}

/// Map a raw growth rate onto the stored convention: non-finite becomes 0
pub fn normalize_growth(rate: f64) -> f64 {
    if rate.is_finite() {
        rate
    } else {
        0.0
    }
}

impl GrowthPanel {
    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn rows(&self) -> &[GrowthRow] {
        &self.rows
    }

    pub fn lag(&self) -> usize {
        self.lag
    }

    pub fn measure_index(&self, name: &str) -> Result<usize> {
        self.measures
            .iter()
            .position(|m| m == name)
            .ok_or_else(|| CbsError::missing_column(name))
    }

    /// Replace non-finite growth with 0; missing growth stays missing
    pub fn normalized(mut self) -> Self {
        for row in &mut self.rows {
            for g in row.growth.iter_mut().flatten() {
                *g = normalize_growth(*g);
            }
        }
        self
    }

    pub fn latest_period(&self) -> Option<&str> {
        self.rows.iter().map(|r| r.period.as_str()).max()
    }

    /// Flatten into a panel with `{m}`, `{m}_previous_moment`, `{m}_growth`
    /// and `{m}_change` columns per measure
    pub fn to_panel(&self) -> Result<Panel> {
        let mut names = Vec::with_capacity(self.measures.len() * 4);
        for m in &self.measures {
            names.push(m.clone());
            names.push(format!("{m}{PREVIOUS_SUFFIX}"));
            names.push(format!("{m}{GROWTH_SUFFIX}"));
            names.push(format!("{m}{CHANGE_SUFFIX}"));
        }

        let mut panel = Panel::new(names);
        for row in &self.rows {
            let values = (0..self.measures.len())
                .flat_map(|m| [row.values[m], row.previous[m], row.growth[m], row.change[m]])
                .collect();
            panel.push(row.region.clone(), row.period.clone(), values)?;
        }
        Ok(panel)
    }
}
