//! Parsers for the per-sample CSV reports written by the fusion pipeline.

use std::path::Path;

use anyhow::bail;
use anyhow::Context;

/// One row of the fusion contamination report.
#[derive(Clone, Debug)]
pub struct FusionContamination {
    /// Sample id.
    pub sample_id: String,

    /// Whether inter-sample contamination was flagged.
    pub contamination: bool,

    /// Whether contamination from the referral panel was flagged.
    pub contamination_referral: bool,
}

/// One row of the fusion alignment report.
#[derive(Clone, Debug)]
pub struct FusionAlignment {
    /// Sample id.
    pub sample_id: String,

    /// Percentage of reads aligned, as written in the file.
    pub pct_reads_aligned: String,

    /// Count of uniquely aligned reads, as written in the file.
    pub unique_reads_aligned: String,
}

/// The report writes `No` for a clear sample; anything else is treated as a
/// flag. Fail-closed: an unexpected value never reads as clean.
fn flag_from_field(field: &str) -> bool {
    field.trim() != "No"
}

fn column_index(headers: &csv::StringRecord, name: &str, src: &Path) -> anyhow::Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .with_context(|| format!("{} is missing the '{}' column", src.display(), name))
}

/// Parses a fusion contamination CSV
/// (`sample,contamination,contamination_referral`).
pub fn parse_fusion_contamination(
    src: impl AsRef<Path>,
) -> anyhow::Result<Vec<FusionContamination>> {
    let src = src.as_ref();
    let mut reader = csv::Reader::from_path(src)
        .with_context(|| format!("opening {}", src.display()))?;

    let headers = reader.headers()?.clone();
    let sample = column_index(&headers, "sample", src)?;
    let contamination = column_index(&headers, "contamination", src)?;
    let referral = column_index(&headers, "contamination_referral", src)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let sample_id = match record.get(sample) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => bail!("contamination row without a sample id in {}", src.display()),
        };

        rows.push(FusionContamination {
            sample_id,
            contamination: flag_from_field(record.get(contamination).unwrap_or_default()),
            contamination_referral: flag_from_field(record.get(referral).unwrap_or_default()),
        });
    }

    Ok(rows)
}

/// Parses a fusion alignment CSV
/// (`sample,pct_reads_aligned,unique_reads_aligned`).
pub fn parse_fusion_alignment(src: impl AsRef<Path>) -> anyhow::Result<Vec<FusionAlignment>> {
    let src = src.as_ref();
    let mut reader = csv::Reader::from_path(src)
        .with_context(|| format!("opening {}", src.display()))?;

    let headers = reader.headers()?.clone();
    let sample = column_index(&headers, "sample", src)?;
    let pct_aligned = column_index(&headers, "pct_reads_aligned", src)?;
    let unique = column_index(&headers, "unique_reads_aligned", src)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let sample_id = match record.get(sample) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => bail!("alignment row without a sample id in {}", src.display()),
        };

        rows.push(FusionAlignment {
            sample_id,
            pct_reads_aligned: record.get(pct_aligned).unwrap_or_default().to_string(),
            unique_reads_aligned: record.get(unique).unwrap_or_default().to_string(),
        });
    }

    Ok(rows)
}
