//! Parsers for Dragen metrics CSVs.
//!
//! Dragen writes metrics as headerless comma-delimited "triples": every data
//! row carries `[section, sample_or_blank, metric_name, value]` (a fifth
//! percentage column appears on some rows and is ignored). A parser selects
//! rows by exact match on the section prefix and builds either one flat
//! mapping, or one mapping per sample id when the format carries a
//! per-sample column.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use indexmap::IndexMap;

use crate::parsers::RawMetrics;
use crate::utils::text::normalise_key;

/// Section prefix for mapping/aligning summaries.
pub const MAPPING_SECTION: &str = "MAPPING/ALIGNING SUMMARY";

/// Section prefix for coverage summaries.
pub const COVERAGE_SECTION: &str = "COVERAGE SUMMARY";

/// Section prefix for ploidy estimation.
pub const PLOIDY_SECTION: &str = "PLOIDY ESTIMATION";

/// Section prefix for the joint caller's prefilter metrics.
pub const PREFILTER_SECTION: &str = "JOINT CALLER PREFILTER";

/// Repairs for malformed key fragments in whole-genome coverage metrics.
///
/// The coverage bands Dragen ships (`[0x:1x)` … `[100x:inf)`) normalize to
/// fragments without separators; downstream column names depend on the exact
/// repaired spellings, so the list is applied verbatim and in order.
const WGS_COVERAGE_KEY_FIXUPS: &[(&str, &str)] = &[
    ("xinf", "x_inf"),
    ("0x100x", "0x_100x"),
    ("20x50x", "20x_50x"),
    ("15x20x", "15x_20x"),
    ("10x15x", "10x_15x"),
    ("3x10x", "3x_10x"),
    ("1x3x", "1x_3x"),
    ("0x1x", "0x_1x"),
];

/// One parsed triple row.
struct TripleRow {
    sample: String,
    metric: String,
    value: String,
}

/// Reads every row of `src` whose section column exactly matches `section`.
fn section_rows(src: &Path, section: &str) -> anyhow::Result<Vec<TripleRow>> {
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split(',').collect();
        if columns.len() < 4 {
            continue;
        }

        if columns[0] != section {
            continue;
        }

        rows.push(TripleRow {
            sample: columns[1].to_string(),
            metric: columns[2].to_string(),
            value: columns[3].to_string(),
        });
    }

    Ok(rows)
}

/// Parses one section of a Dragen metrics CSV into a flat mapping, ignoring
/// the sample column.
pub fn parse_section_flat(src: impl AsRef<Path>, section: &str) -> anyhow::Result<RawMetrics> {
    let src = src.as_ref();
    let rows = section_rows(src, section)?;

    if rows.is_empty() {
        bail!("no '{}' rows found in {}", section, src.display());
    }

    Ok(rows
        .into_iter()
        .map(|row| (normalise_key(&row.metric), row.value))
        .collect())
}

/// Parses one section of a Dragen metrics CSV into one mapping per sample id
/// found in the per-sample column. Rows with a blank sample column are
/// skipped.
pub fn parse_section_per_sample(
    src: impl AsRef<Path>,
    section: &str,
) -> anyhow::Result<IndexMap<String, RawMetrics>> {
    let src = src.as_ref();
    let rows = section_rows(src, section)?;

    let mut by_sample: IndexMap<String, RawMetrics> = IndexMap::new();
    for row in rows {
        if row.sample.is_empty() {
            continue;
        }

        by_sample
            .entry(row.sample)
            .or_default()
            .insert(normalise_key(&row.metric), row.value);
    }

    if by_sample.is_empty() {
        bail!(
            "no per-sample '{}' rows found in {}",
            section,
            src.display()
        );
    }

    Ok(by_sample)
}

/// Applies the whole-genome coverage key repairs to a normalized key.
fn repair_coverage_key(key: &str) -> String {
    let mut repaired = key.to_string();
    for (broken, fixed) in WGS_COVERAGE_KEY_FIXUPS {
        repaired = repaired.replace(broken, fixed);
    }

    repaired
}

/// Parses a Dragen whole-genome coverage metrics CSV, including the key
/// repairs for the coverage-band columns.
pub fn parse_wgs_coverage_metrics(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    let flat = parse_section_flat(src, COVERAGE_SECTION)?;

    Ok(flat
        .into_iter()
        .map(|(key, value)| (repair_coverage_key(&key), value))
        .collect())
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use super::*;

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    static MAPPING_METRICS: &str = "\
MAPPING/ALIGNING SUMMARY,,Total input reads,624504308,100.00
MAPPING/ALIGNING SUMMARY,,Mapped reads,623366746,99.82
MAPPING/ALIGNING PER RG,rg1,Mapped reads,623366746,99.82
";

    #[test]
    pub fn test_flat_section_filtering() {
        let file = write_fixture(MAPPING_METRICS);
        let metrics = parse_section_flat(file.path(), MAPPING_SECTION).unwrap();

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.get("total_input_reads").unwrap(), "624504308");
        assert_eq!(metrics.get("mapped_reads").unwrap(), "623366746");
    }

    #[test]
    pub fn test_missing_section_is_an_error() {
        let file = write_fixture(MAPPING_METRICS);
        assert!(parse_section_flat(file.path(), PLOIDY_SECTION).is_err());
    }

    static PREFILTER_METRICS: &str = "\
JOINT CALLER PREFILTER,S1,Total,53820
JOINT CALLER PREFILTER,S1,Biallelic,51236
JOINT CALLER PREFILTER,S2,Total,54011
JOINT CALLER PREFILTER,S2,Biallelic,51499
";

    #[test]
    pub fn test_per_sample_section() {
        let file = write_fixture(PREFILTER_METRICS);
        let by_sample = parse_section_per_sample(file.path(), PREFILTER_SECTION).unwrap();

        assert_eq!(by_sample.len(), 2);
        assert_eq!(by_sample.get("S1").unwrap().get("total").unwrap(), "53820");
        assert_eq!(by_sample.get("S2").unwrap().get("biallelic").unwrap(), "51499");
    }

    static WGS_COVERAGE: &str = "\
COVERAGE SUMMARY,,Average alignment coverage over genome,38.51
COVERAGE SUMMARY,,PCT of genome with coverage [100x:inf),0.12
COVERAGE SUMMARY,,PCT of genome with coverage [50x:100x),1.04
COVERAGE SUMMARY,,PCT of genome with coverage [20x:50x),91.38
COVERAGE SUMMARY,,PCT of genome with coverage [15x:20x),4.11
COVERAGE SUMMARY,,PCT of genome with coverage [10x:15x),1.59
COVERAGE SUMMARY,,PCT of genome with coverage [3x:10x),0.94
COVERAGE SUMMARY,,PCT of genome with coverage [1x:3x),0.31
COVERAGE SUMMARY,,PCT of genome with coverage [0x:1x),0.51
";

    #[test]
    pub fn test_wgs_coverage_band_key_repairs() {
        let file = write_fixture(WGS_COVERAGE);
        let metrics = parse_wgs_coverage_metrics(file.path()).unwrap();

        let expected = [
            "pct_of_genome_with_coverage_100x_inf",
            "pct_of_genome_with_coverage_50x_100x",
            "pct_of_genome_with_coverage_20x_50x",
            "pct_of_genome_with_coverage_15x_20x",
            "pct_of_genome_with_coverage_10x_15x",
            "pct_of_genome_with_coverage_3x_10x",
            "pct_of_genome_with_coverage_1x_3x",
            "pct_of_genome_with_coverage_0x_1x",
        ];
        for key in expected {
            assert!(metrics.contains_key(key), "missing repaired key {}", key);
        }

        assert_eq!(
            metrics.get("average_alignment_coverage_over_genome").unwrap(),
            "38.51"
        );
        assert_eq!(metrics.get("pct_of_genome_with_coverage_20x_50x").unwrap(), "91.38");
    }
}
