//! Land use as a share of total area

use cbs_common::Result;
use serde::Serialize;

use crate::panel::Panel;

/// Suffix appended to measures divided by the denominator
pub const RELATIVE_SUFFIX: &str = "_relative";
/// Prefix CBS uses for the top-level land-use categories
pub const TOTALS_PREFIX: &str = "totaal_";

/// Which land-use categories a distribution covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryLevel {
    /// `totaal_*` categories, which partition the total area
    Totals,
    /// Everything below the totals
    SubCategories,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareEntry {
    pub region: String,
    pub category: String,
    pub share: f64,
}

/// Append `{m}_relative = m / denominator` for every measure that is neither
/// excluded nor the denominator itself. A missing or zero denominator gives a
/// missing share.
pub fn divide_by_measure(panel: &Panel, denominator: &str, exclude: &[&str]) -> Result<Panel> {
    let denom_idx = panel.measure_index(denominator)?;
    let targets: Vec<(usize, String)> = panel
        .measures()
        .iter()
        .enumerate()
        .filter(|(i, m)| *i != denom_idx && !exclude.contains(&m.as_str()))
        .map(|(i, m)| (i, format!("{m}{RELATIVE_SUFFIX}")))
        .collect();

    let mut out = panel.clone();
    for (idx, name) in targets {
        let shares = panel
            .rows()
            .iter()
            .map(|r| {
                let denom = r.values[denom_idx].filter(|d| *d != 0.0)?;
                r.values[idx].map(|v| v / denom)
            })
            .collect();
        out.add_measure(name, shares)?;
    }

    Ok(out)
}

/// Long-format share table for one period, taken from the `_relative`
/// columns produced by [`divide_by_measure`]
pub fn land_use_distribution(panel: &Panel, period: &str, level: CategoryLevel) -> Vec<ShareEntry> {
    let columns: Vec<(usize, &str)> = panel
        .measures()
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.strip_suffix(RELATIVE_SUFFIX).map(|base| (i, base)))
        .filter(|(_, base)| match level {
            CategoryLevel::Totals => base.starts_with(TOTALS_PREFIX),
            CategoryLevel::SubCategories => !base.starts_with(TOTALS_PREFIX),
        })
        .collect();

    panel
        .rows_in_period(period)
        .flat_map(|row| {
            columns.iter().filter_map(move |&(i, category)| {
                row.values[i].map(|share| ShareEntry {
                    region: row.region.clone(),
                    category: category.to_string(),
                    share,
                })
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn land_use() -> Panel {
        let mut panel = Panel::new(vec![
            "bevolking_1_januari".into(),
            "totale_oppervlakte".into(),
            "totaal_bebouwd_terrein".into(),
            "woonterrein".into(),
        ]);
        panel
            .push("Amsterdam", "2023", vec![Some(900_000.0), Some(200.0), Some(50.0), Some(30.0)])
            .unwrap();
        panel
            .push("Leeg", "2023", vec![Some(0.0), Some(0.0), Some(0.0), None])
            .unwrap();
        panel
    }

    #[test]
    fn test_divide_skips_excluded_and_denominator() {
        let divided = divide_by_measure(&land_use(), "totale_oppervlakte", &["bevolking_1_januari"]).unwrap();
        assert_eq!(
            &divided.measures()[4..],
            ["totaal_bebouwd_terrein_relative", "woonterrein_relative"]
        );
        assert_eq!(divided.column("totaal_bebouwd_terrein_relative").unwrap(), vec![Some(0.25), None]);
    }

    #[test]
    fn test_distribution_levels() {
        let divided = divide_by_measure(&land_use(), "totale_oppervlakte", &["bevolking_1_januari"]).unwrap();

        let totals = land_use_distribution(&divided, "2023", CategoryLevel::Totals);
        assert_eq!(
            totals,
            vec![ShareEntry {
                region: "Amsterdam".into(),
                category: "totaal_bebouwd_terrein".into(),
                share: 0.25,
            }]
        );

        let subs = land_use_distribution(&divided, "2023", CategoryLevel::SubCategories);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].category, "woonterrein");
        assert_eq!(subs[0].share, 0.15);
    }
}
