//! Region × period tables of numeric measures

use cbs_common::{CbsError, Result};
use serde::Serialize;
use std::collections::HashSet;

/// One region in one period with a value per panel measure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub region: String,
    pub period: String,
    pub values: Vec<Option<f64>>,
}

/// A long-format table: each row is a region in a period, each measure a
/// nullable numeric column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    measures: Vec<String>,
    rows: Vec<Observation>,
}

impl Panel {
    pub fn new(measures: Vec<String>) -> Self {
        Self { measures, rows: Vec::new() }
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row; `values` must line up with [`Panel::measures`]
    pub fn push(
        &mut self,
        region: impl Into<String>,
        period: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<()> {
        if values.len() != self.measures.len() {
            return Err(CbsError::ShapeMismatch {
                expected: self.measures.len(),
                actual: values.len(),
            });
        }
        self.rows.push(Observation {
            region: region.into(),
            period: period.into(),
            values,
        });
        Ok(())
    }

    pub fn measure_index(&self, name: &str) -> Result<usize> {
        self.measures
            .iter()
            .position(|m| m == name)
            .ok_or_else(|| CbsError::missing_column(name))
    }

    pub fn column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let idx = self.measure_index(name)?;
        Ok(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Append a computed measure column
    pub fn add_measure(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(CbsError::ShapeMismatch {
                expected: self.rows.len(),
                actual: values.len(),
            });
        }
        self.measures.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values.push(value);
        }
        Ok(())
    }

    /// Keep only the named measures, in the given order
    pub fn select(&self, names: &[&str]) -> Result<Panel> {
        let indices = names
            .iter()
            .map(|n| self.measure_index(n))
            .collect::<Result<Vec<_>>>()?;

        Ok(Panel {
            measures: names.iter().map(|n| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| Observation {
                    region: r.region.clone(),
                    period: r.period.clone(),
                    values: indices.iter().map(|&i| r.values[i]).collect(),
                })
                .collect(),
        })
    }

    /// Sort by region, then period ascending. Growth computations rely on
    /// this order.
    pub fn sort(&mut self) {
        self.rows
            .sort_by(|a, b| a.region.cmp(&b.region).then_with(|| a.period.cmp(&b.period)));
    }

    pub fn fill_missing(mut self, value: f64) -> Self {
        for row in &mut self.rows {
            for v in &mut row.values {
                v.get_or_insert(value);
            }
        }
        self
    }

    /// Remove measures that have no value in any row
    pub fn drop_empty_measures(self) -> Self {
        let keep: Vec<usize> = (0..self.measures.len())
            .filter(|&i| self.rows.iter().any(|r| r.values[i].is_some()))
            .collect();

        if keep.len() == self.measures.len() {
            return self;
        }

        Panel {
            measures: keep.iter().map(|&i| self.measures[i].clone()).collect(),
            rows: self
                .rows
                .into_iter()
                .map(|r| Observation {
                    values: keep.iter().map(|&i| r.values[i]).collect(),
                    region: r.region,
                    period: r.period,
                })
                .collect(),
        }
    }

    pub fn retain_regions(mut self, regions: &HashSet<String>) -> Self {
        self.rows.retain(|r| regions.contains(&r.region));
        self
    }

    pub fn latest_period(&self) -> Option<&str> {
        self.rows.iter().map(|r| r.period.as_str()).max()
    }

    pub fn rows_in_period<'a>(&'a self, period: &'a str) -> impl Iterator<Item = &'a Observation> {
        self.rows.iter().filter(move |r| r.period == period)
    }
}
