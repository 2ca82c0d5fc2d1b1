//! Parsers for Picard-style section-marked metrics files.
//!
//! These files are tab-delimited and carry a preamble of `##`-prefixed
//! headers. A sentinel row whose first column equals `## METRICS CLASS` marks
//! that the *next* non-empty row is the header row, and the rows after that
//! are data. Single-record formats (hybrid-selection, duplication, insert
//! size) keep only the first data row; the alignment summary and
//! variant-calling detail formats keep every row until the first blank line.
//!
//! Reading is implemented as an explicit three-state machine rather than a
//! boolean flag mutated in a loop, so the ordering dependency between the
//! sentinel, the header and the data rows is visible in the types.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use indexmap::IndexMap;

use crate::parsers::RawMetrics;
use crate::utils::text::normalise_key;

/// First column of the row that announces a metrics table.
const METRICS_CLASS_SENTINEL: &str = "## METRICS CLASS";

/// Columns dropped from alignment summary rows. These identify the read
/// group, not the measurement.
const ALIGNMENT_DROPPED_COLUMNS: &[&str] = &["sample", "library", "read_group"];

/// Where we are while walking the file.
enum ParseState {
    /// Still looking for the `## METRICS CLASS` sentinel row.
    AwaitingSentinel,

    /// Sentinel seen; the next non-empty row is the header row.
    AwaitingHeader,

    /// Header captured; rows are data until the first blank line.
    ReadingRows,
}

/// Extracts the metrics table from a section-marked file: the normalized
/// header columns plus every data row up to the first blank line.
fn metrics_table(src: &Path) -> anyhow::Result<(Vec<String>, Vec<Vec<String>>)> {
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let reader = BufReader::new(file);

    let mut state = ParseState::AwaitingSentinel;
    let mut headers: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for line in reader.lines() {
        let line = line?;

        match state {
            ParseState::AwaitingSentinel => {
                if line.split('\t').next() == Some(METRICS_CLASS_SENTINEL) {
                    state = ParseState::AwaitingHeader;
                }
            }
            ParseState::AwaitingHeader => {
                if line.trim().is_empty() {
                    continue;
                }

                headers = line.split('\t').map(normalise_key).collect();
                state = ParseState::ReadingRows;
            }
            ParseState::ReadingRows => {
                if line.trim().is_empty() {
                    break;
                }

                rows.push(line.split('\t').map(String::from).collect());
            }
        }
    }

    if headers.is_empty() {
        bail!(
            "no '{}' section found in {}",
            METRICS_CLASS_SENTINEL,
            src.display()
        );
    }

    Ok((headers, rows))
}

/// Zips one data row against the header columns. Short rows are padded with
/// empty values — Picard omits trailing columns it did not compute, and the
/// ingestion boundary maps the empty string to null.
fn zip_row(headers: &[String], row: &[String]) -> RawMetrics {
    headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let value = row.get(i).cloned().unwrap_or_default();
            (header.clone(), value)
        })
        .collect()
}

/// Parses a section-marked file that carries exactly one meaningful data row.
fn single_record(src: &Path) -> anyhow::Result<RawMetrics> {
    let (headers, rows) = metrics_table(src)?;

    match rows.first() {
        Some(row) => Ok(zip_row(&headers, row)),
        None => bail!("metrics section in {} has no data row", src.display()),
    }
}

/// Parses a Picard hybrid-selection (HS) metrics file.
pub fn parse_hs_metrics(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    single_record(src.as_ref())
}

/// Parses a Picard MarkDuplicates metrics file.
pub fn parse_duplication_metrics(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    single_record(src.as_ref())
}

/// Parses a Picard insert size metrics file. Only the summary record is kept;
/// the histogram section that follows the blank line is ignored.
pub fn parse_insert_metrics(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    single_record(src.as_ref())
}

/// Parses a Picard alignment summary metrics file.
///
/// Every category row (e.g. `FIRST_OF_PAIR`, `SECOND_OF_PAIR`, `PAIR`)
/// becomes one mapping carrying a `category` key; the `sample`, `library` and
/// `read_group` columns are dropped.
pub fn parse_alignment_metrics(src: impl AsRef<Path>) -> anyhow::Result<Vec<RawMetrics>> {
    let (headers, rows) = metrics_table(src.as_ref())?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut record = zip_row(&headers, row);
        for dropped in ALIGNMENT_DROPPED_COLUMNS {
            record.shift_remove(*dropped);
        }

        records.push(record);
    }

    Ok(records)
}

/// Parses a Picard variant-calling detail metrics file.
///
/// Each data row is keyed by its own first column value (the sample alias)
/// into the outer mapping.
pub fn parse_variant_detail_metrics(
    src: impl AsRef<Path>,
) -> anyhow::Result<IndexMap<String, RawMetrics>> {
    let src = src.as_ref();
    let (headers, rows) = metrics_table(src)?;

    let mut by_sample = IndexMap::new();
    for row in &rows {
        let alias = match row.first() {
            Some(alias) if !alias.is_empty() => alias.clone(),
            _ => bail!("variant detail row without a sample alias in {}", src.display()),
        };

        by_sample.insert(alias, zip_row(&headers, row));
    }

    Ok(by_sample)
}
