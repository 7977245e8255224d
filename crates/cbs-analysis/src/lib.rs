//! CBS Analysis Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Table transformations over region/period series read back from the CBS
//! store: period-over-period growth, land-use shares, growth rankings and
//! feature sets for regression models.
//!
//! # Example
//!
//! ```
//! use cbs_analysis::{growth::growth_by_period, Panel};
//!
//! # fn main() -> cbs_common::Result<()> {
//! let mut panel = Panel::new(vec!["bevolking_1_januari".to_string()]);
//! panel.push("Utrecht", "2022", vec![Some(100.0)])?;
//! panel.push("Utrecht", "2023", vec![Some(150.0)])?;
//!
//! let growth = growth_by_period(&panel, 1)?.normalized();
//! assert_eq!(growth.rows()[1].growth[0], Some(0.5));
//! # Ok(())
//! # }
//! ```

pub mod features;
pub mod growth;
pub mod panel;
pub mod ranking;
pub mod shares;

pub use features::{FeatureRow, FeatureSet};
pub use growth::{GrowthPanel, GrowthRow};
pub use panel::{Observation, Panel};
