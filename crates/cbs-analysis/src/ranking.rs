//! Region rankings on growth at the latest period

use cbs_common::Result;
use serde::Serialize;
use std::collections::HashSet;

use crate::growth::GrowthPanel;
use crate::panel::Panel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthMetric {
    /// `(current - previous) / previous`
    Relative,
    /// `current - previous`
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRegion {
    pub region: String,
    pub period: String,
    pub value: f64,
    pub previous: f64,
    pub growth: f64,
    pub change: f64,
}

/// Regions that still report `measure` in the latest period. Municipalities
/// that were merged away stop reporting and drop out here.
pub fn active_regions(panel: &Panel, measure: &str) -> Result<HashSet<String>> {
    let idx = panel.measure_index(measure)?;
    let Some(latest) = panel.latest_period() else {
        return Ok(HashSet::new());
    };

    Ok(panel
        .rows_in_period(latest)
        .filter(|r| r.values[idx].is_some())
        .map(|r| r.region.clone())
        .collect())
}

/// The `n` regions with the highest growth of `measure` in the latest period.
/// Rows without a finite growth are left out.
pub fn top_growth(
    growth: &GrowthPanel,
    measure: &str,
    metric: GrowthMetric,
    n: usize,
) -> Result<Vec<RankedRegion>> {
    let idx = growth.measure_index(measure)?;
    let Some(latest) = growth.latest_period() else {
        return Ok(Vec::new());
    };

    let mut ranked: Vec<RankedRegion> = growth
        .rows()
        .iter()
        .filter(|r| r.period == latest)
        .filter_map(|r| {
            let value = r.values[idx]?;
            let previous = r.previous[idx]?;
            let rate = r.growth[idx].filter(|g| g.is_finite())?;
            let change = r.change[idx]?;
            Some(RankedRegion {
                region: r.region.clone(),
                period: r.period.clone(),
                value,
                previous,
                growth: rate,
                change,
            })
        })
        .collect();

    let key = |r: &RankedRegion| match metric {
        GrowthMetric::Relative => r.growth,
        GrowthMetric::Absolute => r.change,
    };
    ranked.sort_by(|a, b| key(b).total_cmp(&key(a)).then_with(|| a.region.cmp(&b.region)));
    ranked.truncate(n);

    Ok(ranked)
}
