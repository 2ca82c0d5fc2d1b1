//! Passing-variant counting over VCF files.
//!
//! The tracker needs exactly one number per sample from a variant file: how
//! many records both carry `PASS` in their filter set and genotype the sample
//! with at least one non-reference, non-missing allele. Files may be plain
//! text or gzip-compressed; compression is detected from the extension.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;

use crate::utils::display::RecordCounter;

/// Index of the FILTER column in a VCF data row.
const FILTER_COLUMN: usize = 6;

/// Index of the FORMAT column in a VCF data row.
const FORMAT_COLUMN: usize = 8;

/// Index of the first genotype column in a VCF data row.
const FIRST_GENOTYPE_COLUMN: usize = 9;

/// Opens a variant file, transparently decompressing `.gz` sources.
fn open(src: &Path) -> anyhow::Result<BufReader<Box<dyn Read>>> {
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

    let reader: Box<dyn Read> = if src.extension().map(|ext| ext == "gz").unwrap_or(false) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };

    Ok(BufReader::new(reader))
}

/// True iff the FILTER column's semicolon-delimited set contains `PASS`.
fn filter_is_pass(filter: &str) -> bool {
    filter.split(';').any(|f| f == "PASS")
}

/// True iff a GT value calls at least one allele that is neither reference
/// (`0`) nor missing (`.`). Both phased and unphased separators are accepted.
fn genotype_is_non_ref(gt: &str) -> bool {
    gt.split(|c| c == '/' || c == '|')
        .any(|allele| allele != "0" && allele != "." && !allele.is_empty())
}

/// Counts passing, non-reference records per requested sample.
///
/// The result is dense over `samples`: every requested sample id appears in
/// the output, with `0` for samples that never qualify (including samples the
/// file does not genotype at all).
pub fn get_passing_variant_counts(
    src: impl AsRef<Path>,
    samples: &[String],
) -> anyhow::Result<IndexMap<String, u64>> {
    let src = src.as_ref();
    let reader = open(src)?;

    let mut counts: IndexMap<String, u64> = samples.iter().map(|s| (s.clone(), 0)).collect();

    // Column index within the record for each requested sample, filled in
    // once the #CHROM header line is seen.
    let mut sample_columns: Vec<(String, usize)> = Vec::new();
    let mut saw_header = false;

    let mut counter = RecordCounter::new(Some(1_000_000));

    for line in reader.lines() {
        let line = line?;

        if line.starts_with("##") || line.trim().is_empty() {
            continue;
        }

        if line.starts_with('#') {
            let columns: Vec<&str> = line.trim_start_matches('#').split('\t').collect();
            for (i, column) in columns.iter().enumerate().skip(FIRST_GENOTYPE_COLUMN) {
                if samples.iter().any(|s| s == column) {
                    sample_columns.push((column.to_string(), i));
                }
            }

            saw_header = true;
            continue;
        }

        if !saw_header {
            bail!("{} has data rows before the #CHROM header", src.display());
        }

        counter.inc();

        let fields: Vec<&str> = line.split('\t').collect();
        let filter = match fields.get(FILTER_COLUMN) {
            Some(filter) => filter,
            None => bail!("truncated VCF record in {}", src.display()),
        };

        if !filter_is_pass(filter) {
            continue;
        }

        let gt_index = match fields.get(FORMAT_COLUMN) {
            Some(format) => match format.split(':').position(|key| key == "GT") {
                Some(index) => index,
                None => continue,
            },
            None => continue,
        };

        for (sample, column) in &sample_columns {
            let call = match fields.get(*column) {
                Some(value) => value.split(':').nth(gt_index).unwrap_or("."),
                None => continue,
            };

            if genotype_is_non_ref(call) {
                *counts.get_mut(sample).expect("sample preloaded into counts") += 1;
            }
        }
    }

    if !saw_header {
        bail!("{} has no #CHROM header", src.display());
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use super::*;

    static VCF: &str = "\
##fileformat=VCFv4.2
##FILTER=<ID=LowQual,Description=\"Low quality\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tA\tB
1\t100\t.\tG\tA\t50\tPASS\t.\tGT:DP\t0/1:30\t0/0:28
1\t200\t.\tT\tC\t50\tPASS\t.\tGT:DP\t1/1:31\t./.:0
1\t300\t.\tC\tG\t50\tLowQual\t.\tGT:DP\t0/1:12\t0/1:15
1\t400\t.\tA\tT\t50\tPASS;LowQual\t.\tGT:DP\t0|1:40\t0/0:33
";

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".vcf").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    pub fn test_counts_are_dense_over_requested_samples() {
        let file = write_fixture(VCF);
        let samples = vec![String::from("A"), String::from("B")];
        let counts = get_passing_variant_counts(file.path(), &samples).unwrap();

        assert_eq!(counts.get("A").copied(), Some(3));
        assert_eq!(counts.get("B").copied(), Some(0));
    }

    #[test]
    pub fn test_sample_missing_from_file_counts_zero() {
        let file = write_fixture(VCF);
        let samples = vec![String::from("A"), String::from("Z")];
        let counts = get_passing_variant_counts(file.path(), &samples).unwrap();

        assert_eq!(counts.get("Z").copied(), Some(0));
    }

    #[test]
    pub fn test_genotype_classification() {
        assert!(genotype_is_non_ref("0/1"));
        assert!(genotype_is_non_ref("1|1"));
        assert!(genotype_is_non_ref("2/0"));
        assert!(!genotype_is_non_ref("0/0"));
        assert!(!genotype_is_non_ref("./."));
        assert!(!genotype_is_non_ref("0|0"));
    }

    #[test]
    pub fn test_filter_set_membership() {
        assert!(filter_is_pass("PASS"));
        assert!(filter_is_pass("PASS;LowQual"));
        assert!(!filter_is_pass("LowQual"));
        assert!(!filter_is_pass("."));
    }

    #[test]
    pub fn test_gzipped_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.vcf.gz");

        let file = File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(VCF.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let samples = vec![String::from("A")];
        let counts = get_passing_variant_counts(&path, &samples).unwrap();
        assert_eq!(counts.get("A").copied(), Some(3));
    }

    #[test]
    pub fn test_headerless_file_is_an_error() {
        let file = write_fixture("1\t100\t.\tG\tA\t50\tPASS\t.\tGT\t0/1\n");
        let samples = vec![String::from("A")];
        assert!(get_passing_variant_counts(file.path(), &samples).is_err());
    }
}
