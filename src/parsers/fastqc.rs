//! Parser for the FastQC module-status summary file.
//!
//! The file carries one `status<TAB>module name<TAB>filename` row per FastQC
//! module per fastq file. The parser groups rows by filename, recovers the
//! sample id, lane and read number from the filename using a
//! pipeline-specific naming convention, and reports each module's
//! `PASS`/`WARN`/`FAIL` status under a canonical key.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use indexmap::IndexMap;

use crate::utils::text::normalise_key;

/// Canonical keys for the eleven FastQC modules every pipeline reports.
pub const FASTQC_MODULES: &[&str] = &[
    "basic_statistics",
    "per_base_sequencing_quality",
    "per_tile_sequence_quality",
    "per_sequence_quality_scores",
    "per_base_sequence_content",
    "per_sequence_gc_content",
    "per_base_n_content",
    "sequence_length_distribution",
    "sequence_duplication_levels",
    "overrepresented_sequences",
    "adapter_content",
];

/// Twelfth module, reported by the germline enrichment pipeline only.
pub const KMER_MODULE: &str = "kmer_content";

/// How fastq filenames encode sample / lane / read for a given pipeline
/// family. The split indices differ between dialect generations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastqcNaming {
    /// `<sample>_S<idx>_L00<lane>_R<read>_001`: lane is the third field from
    /// the end, read the second from the end, sample everything before the
    /// `S<idx>` field.
    Legacy,

    /// `<sample>_S<idx>_L00<lane>_R<read>` (no trailing segment): lane is the
    /// second field from the end, read the last.
    Tso500,

    /// `<pair>_<sample>_S<idx>_L00<lane>_R<read>_001`: the leading field is
    /// the pairing identifier and belongs to the sample id.
    Cruk,
}

/// Identity and module statuses for one fastq file.
#[derive(Clone, Debug)]
pub struct FastqcSummary {
    /// Sample id recovered from the filename.
    pub sample_id: String,

    /// Lane number (e.g. `L001` → 1).
    pub lane: u32,

    /// Read number (e.g. `R2` → 2).
    pub read_number: u32,

    /// Module key → `PASS`/`WARN`/`FAIL`. Modules absent from the file are
    /// absent here; the caller decides what a missing module means.
    pub statuses: IndexMap<String, String>,
}

/// Maps a raw FastQC module name onto its canonical key. The quality module
/// is reported by FastQC as "Per base sequence quality" but has always been
/// tracked under `per_base_sequencing_quality`.
fn canonical_module(raw: &str) -> String {
    let key = normalise_key(raw);

    if key == "per_base_sequence_quality" {
        String::from("per_base_sequencing_quality")
    } else {
        key
    }
}

/// Strips fastq/archive extensions from a filename column value.
fn stem(filename: &str) -> &str {
    filename
        .trim_end_matches(".gz")
        .trim_end_matches(".fastq")
        .trim_end_matches(".fq")
}

fn parse_lane(field: &str) -> anyhow::Result<u32> {
    field
        .strip_prefix('L')
        .and_then(|rest| rest.parse::<u32>().ok())
        .with_context(|| format!("bad lane field: {}", field))
}

fn parse_read(field: &str) -> anyhow::Result<u32> {
    field
        .strip_prefix('R')
        .and_then(|rest| rest.parse::<u32>().ok())
        .with_context(|| format!("bad read field: {}", field))
}

impl FastqcNaming {
    /// Recovers `(sample, lane, read)` from a fastq filename.
    pub fn split(&self, filename: &str) -> anyhow::Result<(String, u32, u32)> {
        let fields: Vec<&str> = stem(filename).split('_').collect();

        match self {
            FastqcNaming::Legacy | FastqcNaming::Cruk => {
                if fields.len() < 5 {
                    bail!("fastq filename has too few fields: {}", filename);
                }

                let lane = parse_lane(fields[fields.len() - 3])?;
                let read = parse_read(fields[fields.len() - 2])?;
                let sample = fields[..fields.len() - 4].join("_");
                Ok((sample, lane, read))
            }
            FastqcNaming::Tso500 => {
                if fields.len() < 4 {
                    bail!("fastq filename has too few fields: {}", filename);
                }

                let lane = parse_lane(fields[fields.len() - 2])?;
                let read = parse_read(fields[fields.len() - 1])?;
                let sample = fields[..fields.len() - 3].join("_");
                Ok((sample, lane, read))
            }
        }
    }
}

/// Parses a FastQC module-status file into one summary per fastq file, in
/// order of first appearance.
pub fn parse_fastqc_status(
    src: impl AsRef<Path>,
    naming: FastqcNaming,
) -> anyhow::Result<Vec<FastqcSummary>> {
    let src = src.as_ref();
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

    let mut by_file: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let mut columns = line.split('\t');
        let (status, module, filename) = match (columns.next(), columns.next(), columns.next()) {
            (Some(s), Some(m), Some(f)) => (s, m, f),
            _ => bail!("malformed FastQC status row in {}: {}", src.display(), line),
        };

        by_file
            .entry(filename.to_string())
            .or_default()
            .insert(canonical_module(module), status.to_string());
    }

    let mut summaries = Vec::with_capacity(by_file.len());
    for (filename, statuses) in by_file {
        let (sample_id, lane, read_number) = naming.split(&filename)?;
        summaries.push(FastqcSummary {
            sample_id,
            lane,
            read_number,
            statuses,
        });
    }

    Ok(summaries)
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use super::*;

    #[test]
    pub fn test_legacy_split() {
        let (sample, lane, read) = FastqcNaming::Legacy
            .split("Sample1_S1_L001_R1_001.fastq.gz")
            .unwrap();
        assert_eq!(sample, "Sample1");
        assert_eq!(lane, 1);
        assert_eq!(read, 1);

        // Sample ids may themselves contain underscores.
        let (sample, lane, read) = FastqcNaming::Legacy
            .split("19M01234_a_S12_L002_R2_001.fastq.gz")
            .unwrap();
        assert_eq!(sample, "19M01234_a");
        assert_eq!(lane, 2);
        assert_eq!(read, 2);
    }

    #[test]
    pub fn test_tso500_split() {
        let (sample, lane, read) = FastqcNaming::Tso500
            .split("Sample1_S1_L001_R2.fastq.gz")
            .unwrap();
        assert_eq!(sample, "Sample1");
        assert_eq!(lane, 1);
        assert_eq!(read, 2);
    }

    #[test]
    pub fn test_cruk_split_keeps_pairing_field() {
        let (sample, lane, read) = FastqcNaming::Cruk
            .split("P1_Sample1_S3_L001_R1_001.fastq.gz")
            .unwrap();
        assert_eq!(sample, "P1_Sample1");
        assert_eq!(lane, 1);
        assert_eq!(read, 1);
    }

    #[test]
    pub fn test_bad_filename_is_an_error() {
        assert!(FastqcNaming::Legacy.split("oops.fastq.gz").is_err());
    }

    #[test]
    pub fn test_canonical_module_keys() {
        assert_eq!(FASTQC_MODULES.len(), 11);
        assert!(!FASTQC_MODULES.contains(&KMER_MODULE));

        // Every canonical key is reachable from the FastQC display names.
        assert_eq!(
            canonical_module("Per base sequence quality"),
            "per_base_sequencing_quality"
        );
        for (raw, key) in [
            ("Basic Statistics", "basic_statistics"),
            ("Per tile sequence quality", "per_tile_sequence_quality"),
            ("Overrepresented sequences", "overrepresented_sequences"),
            ("Kmer Content", KMER_MODULE),
        ] {
            assert_eq!(canonical_module(raw), key);
        }
        for module in FASTQC_MODULES {
            assert!(!module.contains(' '));
        }
    }

    static STATUS_FILE: &str = "\
PASS\tBasic Statistics\tS1_S1_L001_R1_001.fastq.gz
FAIL\tPer base sequence quality\tS1_S1_L001_R1_001.fastq.gz
WARN\tAdapter Content\tS1_S1_L001_R1_001.fastq.gz
PASS\tBasic Statistics\tS1_S1_L001_R2_001.fastq.gz
PASS\tPer base sequence quality\tS1_S1_L001_R2_001.fastq.gz
";

    #[test]
    pub fn test_grouping_and_canonical_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(STATUS_FILE.as_bytes()).unwrap();

        let summaries = parse_fastqc_status(file.path(), FastqcNaming::Legacy).unwrap();
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.sample_id, "S1");
        assert_eq!(first.read_number, 1);
        assert_eq!(
            first.statuses.get("per_base_sequencing_quality").unwrap(),
            "FAIL"
        );
        assert_eq!(first.statuses.get("adapter_content").unwrap(), "WARN");

        let second = &summaries[1];
        assert_eq!(second.read_number, 2);
        assert_eq!(
            second.statuses.get("per_base_sequencing_quality").unwrap(),
            "PASS"
        );
    }
}
