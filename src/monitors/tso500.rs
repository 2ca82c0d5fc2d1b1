//! Monitor for the TSO500 DNA, RNA and ctDNA dialects.
//!
//! TSO500 differs from the glob-driven dialects in three ways: a no-template
//! control is complete by definition, sample completion is a *count* of
//! output files rather than one marker, and the dialect computes NTC
//! contamination ratios from read counts. DNA and RNA read their counts from
//! two per-sample file families (Dragen mapping metrics for aligned reads,
//! coverage metrics for on-target reads); ctDNA reads one combined TSV and
//! looks mapped-read counts up by an exact sample-string match.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use indexmap::IndexMap;
use tracing::debug;

use crate::model::MetricKind;
use crate::monitors::generic::fastqc_harvest;
use crate::monitors::generic::marker_satisfied;
use crate::monitors::layouts::DialectLayout;
use crate::monitors::Dialect;
use crate::monitors::Harvested;
use crate::monitors::PipelineMonitor;
use crate::parsers;
use crate::utils::globs;
use crate::utils::num::metric_as_u64;
use crate::utils::num::percent_rounded_down;
use crate::utils::text::is_ntc;
use crate::utils::text::normalise_key;

/// Relative path of the combined metrics TSV read by the ctDNA dialect.
const CTDNA_COMBINED_TSV: &str = "Results/MetricsOutput.tsv";

/// Read counts for one sample, by file family.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadCounts {
    /// Aligned reads from the mapping metrics family.
    pub mapped: Option<u64>,

    /// On-target reads from the coverage metrics family.
    pub on_target: Option<u64>,
}

/// Monitor for the three TSO500 dialects.
pub struct Tso500Monitor {
    run_id: String,
    results_root: PathBuf,
    samples: Vec<String>,
    layout: DialectLayout,
}

impl Tso500Monitor {
    /// Creates a monitor over a results directory.
    pub fn new(
        run_id: &str,
        results_dir: PathBuf,
        samples: Vec<String>,
        layout: DialectLayout,
    ) -> Self {
        let results_root = match &layout.results_subdir {
            Some(subdir) => results_dir.join(subdir),
            None => results_dir,
        };

        Tso500Monitor {
            run_id: run_id.to_string(),
            results_root,
            samples,
            layout,
        }
    }

    fn expand(&self, pattern: &str, sample: Option<&str>) -> String {
        globs::expand(pattern, sample, Some(&self.run_id))
    }

    /// A sample's directory under the results root.
    pub fn sample_dir(&self, sample: &str) -> PathBuf {
        self.results_root
            .join(self.expand(&self.layout.sample_dir, Some(sample)))
    }

    /// The first NTC on the sample list, if any.
    pub fn ntc_sample(&self) -> Option<&String> {
        self.samples.iter().find(|s| is_ntc(s))
    }

    /// Reads one count out of a per-sample Dragen metrics file. A missing
    /// file for an NTC reads as zero (an NTC with no output has no reads);
    /// for a real sample the count is simply not available yet.
    fn family_count(
        &self,
        sample: &str,
        pattern: &str,
        section: &str,
        key: &str,
    ) -> anyhow::Result<Option<u64>> {
        let dir = self.sample_dir(sample);
        let expanded = self.expand(pattern, Some(sample));

        let path = match globs::first_match(&dir, &expanded)? {
            Some(path) => path,
            None if is_ntc(sample) => {
                debug!("no {} for NTC {}; counting zero reads", expanded, sample);
                return Ok(Some(0));
            }
            None => {
                debug!("{}: no {} to read counts from", sample, expanded);
                return Ok(None);
            }
        };

        let metrics = parsers::dragen::parse_section_flat(path, section)?;
        Ok(metric_as_u64(metrics.get(key)))
    }

    /// Read counts for one sample from the dialect's file families.
    pub fn read_counts(&self, sample: &str) -> anyhow::Result<ReadCounts> {
        if self.layout.dialect == Dialect::Tso500Ctdna {
            let path = self.results_root.join(CTDNA_COMBINED_TSV);
            let counts = combined_tsv_counts(&path, &self.samples)?;
            return Ok(ReadCounts {
                mapped: counts.get(sample).copied().or_else(|| {
                    if is_ntc(sample) {
                        Some(0)
                    } else {
                        None
                    }
                }),
                on_target: None,
            });
        }

        let mapped = match &self.layout.metric_files.dragen_mapping {
            Some(pattern) => self.family_count(
                sample,
                pattern,
                parsers::dragen::MAPPING_SECTION,
                "mapped_reads",
            )?,
            None => None,
        };

        let on_target = match &self.layout.metric_files.dragen_wgs_coverage {
            Some(pattern) => self.family_count(
                sample,
                pattern,
                parsers::dragen::COVERAGE_SECTION,
                "aligned_reads_in_region",
            )?,
            None => None,
        };

        Ok(ReadCounts { mapped, on_target })
    }

    /// The NTC contamination percentage for one pair of counts: NTC reads
    /// over sample reads, rounded down to a whole percent. A sample with
    /// zero reads reports 100 — the worst case — rather than dividing by
    /// zero.
    pub fn ntc_contamination_pct(ntc_reads: u64, sample_reads: u64) -> u64 {
        percent_rounded_down(ntc_reads, sample_reads)
    }
}

/// Looks mapped-read counts up in the combined metrics TSV by exact
/// sample-string match: a header row names the sample columns, and the
/// `Mapped Reads` row carries one count per column.
pub fn combined_tsv_counts(
    src: &Path,
    samples: &[String],
) -> anyhow::Result<IndexMap<String, u64>> {
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

    let mut columns: Vec<(String, usize)> = Vec::new();
    let mut counts: IndexMap<String, u64> = IndexMap::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();

        if columns.is_empty() {
            // The header row is the first row naming any requested sample.
            for sample in samples {
                if let Some(index) = fields.iter().position(|f| f == sample) {
                    columns.push((sample.clone(), index));
                }
            }
            continue;
        }

        let label = match fields.first() {
            Some(label) => normalise_key(label),
            None => continue,
        };

        if label.starts_with("mapped_reads") {
            for (sample, index) in &columns {
                if let Some(count) = fields.get(*index).and_then(|v| {
                    let owned = v.to_string();
                    metric_as_u64(Some(&owned))
                }) {
                    counts.insert(sample.clone(), count);
                }
            }
            break;
        }
    }

    if columns.is_empty() {
        anyhow::bail!("{} names none of the requested samples", src.display());
    }

    Ok(counts)
}

impl PipelineMonitor for Tso500Monitor {
    fn dialect(&self) -> Dialect {
        self.layout.dialect
    }

    fn samples(&self) -> &[String] {
        &self.samples
    }

    /// A no-template control is complete by definition; for any other sample
    /// the matches across the completed-file globs are counted against the
    /// dialect's minimum.
    fn sample_is_complete(&self, sample: &str) -> anyhow::Result<bool> {
        if is_ntc(sample) {
            return Ok(true);
        }

        let dir = self.sample_dir(sample);
        let mut count = 0;
        for pattern in self.layout.sample_completed_files.value() {
            count += globs::matches_in(&dir, &self.expand(pattern, Some(sample)))?.len();
        }

        Ok(count >= self.layout.min_completed_files.max(1))
    }

    fn sample_is_valid(&self, sample: &str) -> anyhow::Result<bool> {
        if is_ntc(sample) {
            return Ok(true);
        }

        let dir = self.sample_dir(sample);

        for pattern in self.layout.sample_expected_files.value() {
            if !globs::exactly_one(&dir, &self.expand(pattern, Some(sample)))? {
                return Ok(false);
            }
        }

        for pattern in self.layout.sample_not_expected_files.value() {
            if globs::at_least_one(&dir, &self.expand(pattern, Some(sample)))? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn run_is_complete(&self) -> anyhow::Result<bool> {
        for pattern in self.layout.run_completed_files.value() {
            if !globs::at_least_one(&self.results_root, &self.expand(pattern, None))? {
                return Ok(false);
            }
        }

        if let Some(sniff) = &self.layout.run_marker {
            if !marker_satisfied(&self.results_root, sniff)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn run_is_valid(&self) -> anyhow::Result<bool> {
        for pattern in self.layout.run_expected_files.value() {
            if !globs::exactly_one(&self.results_root, &self.expand(pattern, None))? {
                return Ok(false);
            }
        }

        for pattern in self.layout.run_not_expected_files.value() {
            if globs::at_least_one(&self.results_root, &self.expand(pattern, None))? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn harvest_sample(&self, sample: &str) -> anyhow::Result<Vec<Harvested>> {
        let mut harvested = Vec::new();

        if let Some(pattern) = &self.layout.metric_files.fastqc_status {
            let dir = self.sample_dir(sample);
            let expanded = self.expand(pattern, Some(sample));
            if let Some(path) = globs::first_match(&dir, &expanded)? {
                let summaries =
                    parsers::fastqc::parse_fastqc_status(path, self.layout.fastqc_naming)?;
                harvested.extend(fastqc_harvest(sample, summaries));
            }
        }

        Ok(harvested)
    }

    /// One read-count record per non-NTC sample, each carrying the NTC
    /// contamination percentages against the run's NTC.
    fn harvest_run(&self) -> anyhow::Result<Vec<Harvested>> {
        let ntc_counts = match self.ntc_sample() {
            Some(ntc) => self.read_counts(ntc)?,
            None => ReadCounts::default(),
        };

        let mut harvested = Vec::new();
        for sample in &self.samples {
            if is_ntc(sample) {
                continue;
            }

            let counts = self.read_counts(sample)?;
            let mut values = IndexMap::new();

            if let Some(mapped) = counts.mapped {
                values.insert(String::from("mapped_reads"), Some(mapped.to_string()));
                let pct =
                    Self::ntc_contamination_pct(ntc_counts.mapped.unwrap_or(0), mapped);
                values.insert(
                    String::from("ntc_contamination_mapped_pct"),
                    Some(pct.to_string()),
                );
            }

            if let Some(on_target) = counts.on_target {
                values.insert(String::from("on_target_reads"), Some(on_target.to_string()));
                let pct =
                    Self::ntc_contamination_pct(ntc_counts.on_target.unwrap_or(0), on_target);
                values.insert(
                    String::from("ntc_contamination_on_target_pct"),
                    Some(pct.to_string()),
                );
            }

            if values.is_empty() {
                continue;
            }

            harvested.push(Harvested {
                kind: MetricKind::Tso500Reads,
                sample_id: Some(sample.clone()),
                instance: String::new(),
                values,
            });
        }

        Ok(harvested)
    }
}

#[cfg(test)]
mod tests {

    use std::fs;

    use super::*;
    use crate::config::Setting;
    use crate::monitors::layouts;

    fn layout_with_completed(globs: &[&str]) -> DialectLayout {
        let mut layout = layouts::layout(Dialect::Tso500Dna);
        layout.sample_completed_files =
            Setting::Configured(globs.iter().map(|s| s.to_string()).collect());
        layout.min_completed_files = globs.len();
        layout
    }

    fn monitor(root: &Path, samples: &[&str], layout: DialectLayout) -> Tso500Monitor {
        Tso500Monitor::new(
            "run1",
            root.to_path_buf(),
            samples.iter().map(|s| s.to_string()).collect(),
            layout,
        )
    }

    #[test]
    pub fn test_completed_file_counting_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("Results");

        // Sample 1 has both completed files, samples 2 and 3 have none, and
        // the NTC has none either.
        let s1 = results.join("S1");
        fs::create_dir_all(&s1).unwrap();
        fs::write(s1.join("S1_variants.tsv"), "").unwrap();
        fs::write(s1.join("S1_coverage.json"), "").unwrap();
        fs::create_dir_all(results.join("S2")).unwrap();

        let monitor = monitor(
            dir.path(),
            &["S1", "S2", "S3", "NTC-1"],
            layout_with_completed(&["*variants.tsv", "*_coverage.json"]),
        );

        assert!(monitor.sample_is_complete("S1").unwrap());
        assert!(!monitor.sample_is_complete("S2").unwrap());
        assert!(!monitor.sample_is_complete("S3").unwrap());
        assert!(monitor.sample_is_complete("NTC-1").unwrap());
    }

    #[test]
    pub fn test_ntc_short_circuit_ignores_marker_presence() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor(
            dir.path(),
            &["NTC-anything"],
            layout_with_completed(&["*variants.tsv"]),
        );

        assert!(monitor.sample_is_complete("NTC-anything").unwrap());
        assert!(monitor.sample_is_valid("NTC-anything").unwrap());
    }

    #[test]
    pub fn test_run_marker_needs_success_token() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layouts::layout(Dialect::Tso500Dna);
        let monitor = monitor(dir.path(), &["S1"], layout);

        assert!(!monitor.run_is_complete().unwrap());

        fs::write(
            dir.path().join("post_processing_finished.txt"),
            "demultiplex ok\npost processing finished with success\n",
        )
        .unwrap();
        assert!(monitor.run_is_complete().unwrap());

        fs::write(
            dir.path().join("post_processing_finished.txt"),
            "post processing crashed\n",
        )
        .unwrap();
        assert!(!monitor.run_is_complete().unwrap());
    }

    fn write_count_files(sample_dir: &Path, sample: &str, mapped: u64, on_target: u64) {
        fs::create_dir_all(sample_dir).unwrap();
        fs::write(
            sample_dir.join(format!("{}_mapping_metrics.csv", sample)),
            format!("MAPPING/ALIGNING SUMMARY,,Mapped reads,{}\n", mapped),
        )
        .unwrap();
        fs::write(
            sample_dir.join(format!("{}_coverage_metrics.csv", sample)),
            format!("COVERAGE SUMMARY,,Aligned reads in region,{}\n", on_target),
        )
        .unwrap();
    }

    #[test]
    pub fn test_ntc_contamination_rounding() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("Results");
        write_count_files(&results.join("S1"), "S1", 574, 574);
        write_count_files(&results.join("NTC-1"), "NTC-1", 11, 11);

        let layout = layouts::layout(Dialect::Tso500Dna);
        let monitor = monitor(dir.path(), &["S1", "NTC-1"], layout);

        let harvested = monitor.harvest_run().unwrap();
        assert_eq!(harvested.len(), 1);
        let record = &harvested[0];
        assert_eq!(record.sample_id.as_deref(), Some("S1"));
        assert_eq!(
            record.values.get("ntc_contamination_mapped_pct").unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(
            record.values.get("mapped_reads").unwrap().as_deref(),
            Some("574")
        );
    }

    #[test]
    pub fn test_zero_sample_reads_is_worst_case() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("Results");
        write_count_files(&results.join("S1"), "S1", 0, 0);
        write_count_files(&results.join("NTC-1"), "NTC-1", 11, 11);

        let layout = layouts::layout(Dialect::Tso500Dna);
        let monitor = monitor(dir.path(), &["S1", "NTC-1"], layout);

        let harvested = monitor.harvest_run().unwrap();
        assert_eq!(
            harvested[0]
                .values
                .get("ntc_contamination_mapped_pct")
                .unwrap()
                .as_deref(),
            Some("100")
        );
    }

    #[test]
    pub fn test_missing_ntc_files_count_zero_reads() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("Results");
        write_count_files(&results.join("S1"), "S1", 1000, 900);

        let layout = layouts::layout(Dialect::Tso500Dna);
        let monitor = monitor(dir.path(), &["S1", "NTC-1"], layout);

        let harvested = monitor.harvest_run().unwrap();
        assert_eq!(
            harvested[0]
                .values
                .get("ntc_contamination_mapped_pct")
                .unwrap()
                .as_deref(),
            Some("0")
        );
    }

    #[test]
    pub fn test_ctdna_combined_tsv_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("Results");
        fs::create_dir_all(&results).unwrap();
        fs::write(
            results.join("MetricsOutput.tsv"),
            "[ctDNA Library QC Metrics]\n\
             Metric (unit)\tLSL\tUSL\tS1\tS10\tNTC-1\n\
             Total PF Reads (count)\tNA\tNA\t9000000\t8000000\t100\n\
             Mapped Reads (count)\tNA\tNA\t8500000\t7900000\t42\n",
        )
        .unwrap();

        let mut layout = layouts::layout(Dialect::Tso500Ctdna);
        layout.metric_files.fastqc_status = None;
        let monitor = monitor(dir.path(), &["S1", "S10", "NTC-1"], layout);

        // Exact string matching: `S1` must not match the `S10` column.
        let counts = monitor.read_counts("S1").unwrap();
        assert_eq!(counts.mapped, Some(8_500_000));
        assert_eq!(counts.on_target, None);

        let ntc = monitor.read_counts("NTC-1").unwrap();
        assert_eq!(ntc.mapped, Some(42));
    }
}
