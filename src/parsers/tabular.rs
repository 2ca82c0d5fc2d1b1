//! Parsers for simple tab-delimited table formats: two-line header/value
//! files and the GATK depth-of-coverage sample summary.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;

use crate::parsers::RawMetrics;
use crate::utils::text::normalise_key;

/// Columns dropped from contamination (`.selfSM`) output. These are chip and
/// reference-panel diagnostics the QC tracker never consumes. Entries match
/// with a leading `num_` ignored, so the renamed `#SEQ_ID` column is covered
/// by `seq_id`.
const CONTAMINATION_DROPPED_COLUMNS: &[&str] = &[
    "seq_id", "rg", "chip_id", "free_rh", "free_ra", "chipmix", "chiplk1", "chiplk0", "chip_rh",
    "chip_ra", "dpref", "rdphet", "rdpalt",
];

/// Reads the first two non-empty lines of a file as tab-delimited header and
/// value rows.
fn two_lines(src: &Path) -> anyhow::Result<(Vec<String>, Vec<String>)> {
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let mut lines = BufReader::new(file)
        .lines()
        .filter(|l| l.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true));

    let headers = match lines.next() {
        Some(line) => line?,
        None => bail!("{} is empty", src.display()),
    };

    let values = match lines.next() {
        Some(line) => line?,
        None => bail!("{} has a header row but no value row", src.display()),
    };

    Ok((
        headers.split('\t').map(String::from).collect(),
        values.split('\t').map(String::from).collect(),
    ))
}

/// Parses a generic two-line QC text file: row 0 headers, row 1 values,
/// tab-delimited.
pub fn parse_qc_metrics(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    let (headers, values) = two_lines(src.as_ref())?;

    Ok(headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let value = values.get(i).cloned().unwrap_or_default();
            (normalise_key(header), value)
        })
        .collect())
}

/// Parses a VerifyBamID `.selfSM` contamination file.
///
/// Headers beginning with `#` are renamed to `num_` before normalization
/// (`#SNPS` → `num_snps`, `#READS` → `num_reads`), and the identification /
/// chip-diagnostic columns are dropped afterwards.
pub fn parse_contamination_metrics(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    let (headers, values) = two_lines(src.as_ref())?;

    let mut metrics = RawMetrics::new();
    for (i, header) in headers.iter().enumerate() {
        let key = normalise_key(&header.replace('#', "num_"));

        let bare = key.strip_prefix("num_").unwrap_or(&key);
        if CONTAMINATION_DROPPED_COLUMNS.contains(&bare) {
            continue;
        }

        let value = values.get(i).cloned().unwrap_or_default();
        metrics.insert(key, value);
    }

    Ok(metrics)
}

/// Parses a GATK-style depth-of-coverage sample summary.
///
/// The header row is the one whose first column equals `sample_id`; the
/// `Total` aggregate row is skipped; any other row is the single data row.
pub fn parse_depth_summary(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    let src = src.as_ref();
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

    let mut headers: Option<Vec<String>> = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split('\t').collect();
        match &headers {
            None => {
                if columns.first() == Some(&"sample_id") {
                    headers = Some(columns.iter().map(|c| normalise_key(c)).collect());
                }
            }
            Some(headers) => {
                if columns.first() == Some(&"Total") {
                    continue;
                }

                return Ok(headers
                    .iter()
                    .enumerate()
                    .map(|(i, header)| {
                        let value = columns.get(i).map(|c| c.to_string()).unwrap_or_default();
                        (header.clone(), value)
                    })
                    .collect());
            }
        }
    }

    bail!("no depth-of-coverage data row found in {}", src.display())
}
