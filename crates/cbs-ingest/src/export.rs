//! CSV export of feature tables

use cbs_analysis::FeatureSet;
use std::io::Write;

use crate::error::{IngestError, IngestResult};

fn csv_error(e: csv::Error) -> IngestError {
    IngestError::Io(std::io::Error::other(e))
}

/// Write `regio, jaar, <features...>, <target>` rows
pub fn write_features_csv<W: Write>(set: &FeatureSet, writer: W) -> IngestResult<()> {
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec!["regio", "jaar"];
    header.extend(set.feature_names.iter().map(String::as_str));
    header.push(set.target_name.as_str());
    csv.write_record(&header).map_err(csv_error)?;

    for row in &set.rows {
        let mut record = Vec::with_capacity(row.features.len() + 3);
        record.push(row.region.clone());
        record.push(row.period.clone());
        record.extend(row.features.iter().map(f64::to_string));
        record.push(row.target.to_string());
        csv.write_record(&record).map_err(csv_error)?;
    }

    csv.flush()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cbs_analysis::FeatureRow;

    #[test]
    fn test_csv_layout() {
        let set = FeatureSet {
            feature_names: vec!["woonterrein_growth".into()],
            target_name: "bevolking_1_januari_growth".into(),
            rows: vec![FeatureRow {
                region: "Almere".into(),
                period: "2021".into(),
                features: vec![0.25],
                target: 0.1,
            }],
        };

        let mut out = Vec::new();
        write_features_csv(&set, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "regio,jaar,woonterrein_growth,bevolking_1_januari_growth\nAlmere,2021,0.25,0.1\n"
        );
    }
}
