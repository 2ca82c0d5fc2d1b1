//! The glob-driven monitor that covers every dialect whose completion and
//! validity rules are pure configuration.
//!
//! A [`GlobMonitor`] wraps a results root, a sample list and a
//! [`DialectLayout`][crate::monitors::layouts::DialectLayout]. Completion asks
//! whether every completed-file glob matches at least once; validity demands
//! that every expected glob resolve to *exactly one* file (zero means
//! incomplete, two or more means an ambiguous rerun) and that no not-expected
//! glob matches anything. The metric getters take the first glob match —
//! validity is a precondition there, and a missing file is a precondition
//! violation rather than a validity verdict.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use indexmap::IndexMap;
use tracing::debug;

use crate::model::MetricKind;
use crate::monitors::layouts::DialectLayout;
use crate::monitors::layouts::MarkerRule;
use crate::monitors::layouts::MarkerSniff;
use crate::monitors::Dialect;
use crate::monitors::Harvested;
use crate::monitors::PipelineMonitor;
use crate::parsers;
use crate::parsers::fastqc::FastqcSummary;
use crate::parsers::RawMetrics;
use crate::utils::globs;
use crate::utils::text::sanitize_map;

/// Monitor for the dialects whose rules are entirely described by a layout.
pub struct GlobMonitor {
    run_id: String,
    results_root: PathBuf,
    samples: Vec<String>,
    layout: DialectLayout,
}

/// Whether a marker file's content satisfies its sniff rule. A missing marker
/// is simply "not complete yet", never an error.
pub(crate) fn marker_satisfied(dir: &Path, sniff: &MarkerSniff) -> anyhow::Result<bool> {
    let path = match globs::first_match(dir, &sniff.glob)? {
        Some(path) => path,
        None => return Ok(false),
    };

    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let mut last_line = None;
    let mut last_non_blank = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last_non_blank = Some(line.clone());
        }
        last_line = Some(line);
    }

    Ok(match &sniff.rule {
        MarkerRule::LastLineContains(token) => last_non_blank
            .map(|line| line.contains(token))
            .unwrap_or(false),
        MarkerRule::LastLineEquals(expected) => last_line
            .map(|line| line.trim_end() == *expected)
            .unwrap_or(false),
    })
}

impl GlobMonitor {
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

        GlobMonitor {
            run_id: run_id.to_string(),
            results_root,
            samples,
            layout,
        }
    }

    /// The results root, with the dialect's subdirectory applied.
    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    /// The layout driving this monitor.
    pub fn layout(&self) -> &DialectLayout {
        &self.layout
    }

    /// A sample's directory under the results root.
    pub fn sample_dir(&self, sample: &str) -> PathBuf {
        self.results_root
            .join(globs::expand(&self.layout.sample_dir, Some(sample), Some(&self.run_id)))
    }

    fn expand(&self, pattern: &str, sample: Option<&str>) -> String {
        globs::expand(pattern, sample, Some(&self.run_id))
    }

    /// The first file matching a per-sample metric pattern. Validity is a
    /// precondition; a missing file is reported as an error.
    fn sample_metric_file(&self, sample: &str, pattern: &str) -> anyhow::Result<PathBuf> {
        let dir = self.sample_dir(sample);
        let expanded = self.expand(pattern, Some(sample));

        globs::first_match(&dir, &expanded)?.with_context(|| {
            format!(
                "no file matching {} under {} — metric getters require a valid sample",
                expanded,
                dir.display()
            )
        })
    }

    /// The first file matching a run-level metric pattern.
    fn run_metric_file(&self, pattern: &str) -> anyhow::Result<PathBuf> {
        let expanded = self.expand(pattern, None);

        globs::first_match(&self.results_root, &expanded)?.with_context(|| {
            format!(
                "no file matching {} under {} — metric getters require a valid run",
                expanded,
                self.results_root.display()
            )
        })
    }

    /// Like [`sample_metric_file`][Self::sample_metric_file], but for the
    /// harvest path: a family the run never produced is skipped, not an
    /// error, since validity is confirmed against the expected-file globs
    /// rather than the metric catalogue.
    fn optional_sample_file(
        &self,
        sample: &str,
        pattern: Option<&String>,
    ) -> anyhow::Result<Option<PathBuf>> {
        let pattern = match pattern {
            Some(pattern) => pattern,
            None => return Ok(None),
        };

        let dir = self.sample_dir(sample);
        let expanded = self.expand(pattern, Some(sample));
        let found = globs::first_match(&dir, &expanded)?;
        if found.is_none() {
            debug!("{}: no {} to harvest", sample, expanded);
        }

        Ok(found)
    }

    /// Run-level counterpart of
    /// [`optional_sample_file`][Self::optional_sample_file].
    fn optional_run_file(&self, pattern: Option<&String>) -> anyhow::Result<Option<PathBuf>> {
        let pattern = match pattern {
            Some(pattern) => pattern,
            None => return Ok(None),
        };

        let expanded = self.expand(pattern, None);
        let found = globs::first_match(&self.results_root, &expanded)?;
        if found.is_none() {
            debug!("no {} to harvest", expanded);
        }

        Ok(found)
    }

    //================//
    // Metric getters //
    //================//

    fn sample_metric(
        &self,
        sample: &str,
        pattern: &Option<String>,
        parse: impl Fn(&Path) -> anyhow::Result<RawMetrics>,
    ) -> anyhow::Result<Option<RawMetrics>> {
        match pattern {
            Some(pattern) => {
                let path = self.sample_metric_file(sample, pattern)?;
                parse(&path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Picard hybrid-selection metrics for one sample.
    pub fn get_hs_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(sample, &self.layout.metric_files.hs_metrics.clone(), |p| {
            parsers::picard::parse_hs_metrics(p)
        })
    }

    /// Picard duplication metrics for one sample.
    pub fn get_duplication_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(
            sample,
            &self.layout.metric_files.duplication_metrics.clone(),
            |p| parsers::picard::parse_duplication_metrics(p),
        )
    }

    /// Depth-of-coverage summary for one sample.
    pub fn get_depth_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(sample, &self.layout.metric_files.depth_summary.clone(), |p| {
            parsers::tabular::parse_depth_summary(p)
        })
    }

    /// Contamination estimates for one sample.
    pub fn get_contamination(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(sample, &self.layout.metric_files.contamination.clone(), |p| {
            parsers::tabular::parse_contamination_metrics(p)
        })
    }

    /// The generic QC text for one sample, which carries the calculated sex.
    pub fn get_qc_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(sample, &self.layout.metric_files.qc_text.clone(), |p| {
            parsers::tabular::parse_qc_metrics(p)
        })
    }

    /// The calculated sex for one sample, as reported by the pipeline's QC
    /// step or, for whole-genome dialects, by ploidy estimation.
    pub fn get_calculated_sex(&self, sample: &str) -> anyhow::Result<Option<String>> {
        if self.layout.metric_files.qc_text.is_some() {
            let qc = self.get_qc_metrics(sample)?;
            return Ok(qc.and_then(|m| m.get("calculated_sex").cloned()));
        }

        if self.layout.metric_files.dragen_ploidy.is_some() {
            let ploidy = self.get_ploidy_metrics(sample)?;
            return Ok(ploidy
                .and_then(|m| m.get("predicted_sex_chromosome_ploidy").cloned())
                .map(|karyotype| match karyotype.as_str() {
                    "XX" => String::from("female"),
                    "XY" => String::from("male"),
                    _ => String::from("unknown"),
                }));
        }

        Ok(None)
    }

    /// Picard alignment summary metrics for one sample, one record per
    /// category row.
    pub fn get_alignment_metrics(&self, sample: &str) -> anyhow::Result<Option<Vec<RawMetrics>>> {
        match &self.layout.metric_files.alignment_metrics {
            Some(pattern) => {
                let path = self.sample_metric_file(sample, pattern)?;
                parsers::picard::parse_alignment_metrics(path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Picard insert size metrics for one sample.
    pub fn get_insert_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(sample, &self.layout.metric_files.insert_metrics.clone(), |p| {
            parsers::picard::parse_insert_metrics(p)
        })
    }

    /// FastQC module statuses for one sample, one summary per fastq file.
    pub fn get_fastqc_data(&self, sample: &str) -> anyhow::Result<Option<Vec<FastqcSummary>>> {
        match &self.layout.metric_files.fastqc_status {
            Some(pattern) => {
                let path = self.sample_metric_file(sample, pattern)?;
                parsers::fastqc::parse_fastqc_status(path, self.layout.fastqc_naming).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Dragen mapping/aligning metrics for one sample.
    pub fn get_wgs_mapping_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(sample, &self.layout.metric_files.dragen_mapping.clone(), |p| {
            parsers::dragen::parse_section_flat(p, parsers::dragen::MAPPING_SECTION)
        })
    }

    /// Dragen whole-genome coverage metrics for one sample, with the
    /// coverage-band key repairs applied.
    pub fn get_wgs_coverage_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(
            sample,
            &self.layout.metric_files.dragen_wgs_coverage.clone(),
            |p| parsers::dragen::parse_wgs_coverage_metrics(p),
        )
    }

    /// Dragen ploidy estimation metrics for one sample.
    pub fn get_ploidy_metrics(&self, sample: &str) -> anyhow::Result<Option<RawMetrics>> {
        self.sample_metric(sample, &self.layout.metric_files.dragen_ploidy.clone(), |p| {
            parsers::dragen::parse_section_flat(p, parsers::dragen::PLOIDY_SECTION)
        })
    }

    /// Picard variant-calling detail metrics, keyed per sample alias, read
    /// from the run-level file.
    pub fn get_variant_calling_metrics(
        &self,
    ) -> anyhow::Result<Option<IndexMap<String, RawMetrics>>> {
        match &self.layout.metric_files.variant_detail_metrics {
            Some(pattern) => {
                let path = self.run_metric_file(pattern)?;
                parsers::picard::parse_variant_detail_metrics(path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Dragen joint-caller prefilter metrics, keyed per sample.
    pub fn get_prefilter_metrics(&self) -> anyhow::Result<Option<IndexMap<String, RawMetrics>>> {
        match &self.layout.metric_files.dragen_prefilter {
            Some(pattern) => {
                let path = self.run_metric_file(pattern)?;
                parsers::dragen::parse_section_per_sample(
                    path,
                    parsers::dragen::PREFILTER_SECTION,
                )
                .map(Some)
            }
            None => Ok(None),
        }
    }

    /// Passing-variant counts per sample from the run-level VCF, dense over
    /// the configured sample list.
    pub fn get_variant_count_metrics(&self) -> anyhow::Result<Option<IndexMap<String, u64>>> {
        match &self.layout.metric_files.variants_vcf {
            Some(pattern) => {
                let path = self.run_metric_file(pattern)?;
                parsers::vcf::get_passing_variant_counts(path, &self.samples).map(Some)
            }
            None => Ok(None),
        }
    }

    /// The run-level sensitivity estimate.
    pub fn get_sensitivity(&self) -> anyhow::Result<Option<RawMetrics>> {
        match &self.layout.metric_files.sensitivity_report {
            Some(pattern) => {
                let path = self.run_metric_file(pattern)?;
                parsers::sensitivity::parse_sensitivity_report(path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// The run-level fusion contamination report.
    pub fn get_fusion_contamination(
        &self,
    ) -> anyhow::Result<Option<Vec<parsers::fusion::FusionContamination>>> {
        match &self.layout.metric_files.fusion_contamination {
            Some(pattern) => {
                let path = self.run_metric_file(pattern)?;
                parsers::fusion::parse_fusion_contamination(path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// The run-level fusion alignment report.
    pub fn get_fusion_alignment(
        &self,
    ) -> anyhow::Result<Option<Vec<parsers::fusion::FusionAlignment>>> {
        match &self.layout.metric_files.fusion_alignment {
            Some(pattern) => {
                let path = self.run_metric_file(pattern)?;
                parsers::fusion::parse_fusion_alignment(path).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Builds the harvest record for a FastQC summary: one record per fastq file,
/// keyed by lane and read.
pub(crate) fn fastqc_harvest(sample: &str, summaries: Vec<FastqcSummary>) -> Vec<Harvested> {
    summaries
        .into_iter()
        .map(|summary| Harvested {
            kind: MetricKind::Fastqc,
            sample_id: Some(sample.to_string()),
            instance: format!("L{:03}_R{}", summary.lane, summary.read_number),
            values: summary
                .statuses
                .into_iter()
                .map(|(module, status)| (module, Some(status)))
                .collect(),
        })
        .collect()
}

impl PipelineMonitor for GlobMonitor {
    fn dialect(&self) -> Dialect {
        self.layout.dialect
    }

    fn samples(&self) -> &[String] {
        &self.samples
    }

    fn sample_is_complete(&self, sample: &str) -> anyhow::Result<bool> {
        let dir = self.sample_dir(sample);

        for pattern in self.layout.sample_completed_files.value() {
            if !globs::at_least_one(&dir, &self.expand(pattern, Some(sample)))? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn sample_is_valid(&self, sample: &str) -> anyhow::Result<bool> {
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
        let files = &self.layout.metric_files;

        let single = |kind: MetricKind, raw: RawMetrics| Harvested {
            kind,
            sample_id: Some(sample.to_string()),
            instance: String::new(),
            values: sanitize_map(raw),
        };

        if let Some(path) = self.optional_sample_file(sample, files.hs_metrics.as_ref())? {
            harvested.push(single(MetricKind::HsMetrics, parsers::picard::parse_hs_metrics(path)?));
        }

        if let Some(path) = self.optional_sample_file(sample, files.duplication_metrics.as_ref())? {
            harvested.push(single(
                MetricKind::DuplicationMetrics,
                parsers::picard::parse_duplication_metrics(path)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.depth_summary.as_ref())? {
            harvested.push(single(
                MetricKind::DepthOfCoverage,
                parsers::tabular::parse_depth_summary(path)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.contamination.as_ref())? {
            harvested.push(single(
                MetricKind::ContaminationMetrics,
                parsers::tabular::parse_contamination_metrics(path)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.qc_text.as_ref())? {
            harvested.push(single(
                MetricKind::QcMetrics,
                parsers::tabular::parse_qc_metrics(path)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.insert_metrics.as_ref())? {
            harvested.push(single(
                MetricKind::InsertMetrics,
                parsers::picard::parse_insert_metrics(path)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.dragen_mapping.as_ref())? {
            harvested.push(single(
                MetricKind::DragenAlignmentMetrics,
                parsers::dragen::parse_section_flat(path, parsers::dragen::MAPPING_SECTION)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.dragen_ploidy.as_ref())? {
            harvested.push(single(
                MetricKind::DragenPloidyMetrics,
                parsers::dragen::parse_section_flat(path, parsers::dragen::PLOIDY_SECTION)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.dragen_wgs_coverage.as_ref())? {
            harvested.push(single(
                MetricKind::DragenWgsCoverageMetrics,
                parsers::dragen::parse_wgs_coverage_metrics(path)?,
            ));
        }

        if let Some(path) = self.optional_sample_file(sample, files.alignment_metrics.as_ref())? {
            for record in parsers::picard::parse_alignment_metrics(path)? {
                let category = record.get("category").cloned().unwrap_or_default();
                harvested.push(Harvested {
                    kind: MetricKind::AlignmentMetrics,
                    sample_id: Some(sample.to_string()),
                    instance: category,
                    values: sanitize_map(record),
                });
            }
        }

        if let Some(path) = self.optional_sample_file(sample, files.fastqc_status.as_ref())? {
            let summaries = parsers::fastqc::parse_fastqc_status(path, self.layout.fastqc_naming)?;
            harvested.extend(fastqc_harvest(sample, summaries));
        }

        Ok(harvested)
    }

    fn harvest_run(&self) -> anyhow::Result<Vec<Harvested>> {
        let mut harvested = Vec::new();
        let files = &self.layout.metric_files;

        if let Some(path) = self.optional_run_file(files.variant_detail_metrics.as_ref())? {
            for (sample, raw) in parsers::picard::parse_variant_detail_metrics(path)? {
                harvested.push(Harvested {
                    kind: MetricKind::VariantCallingMetrics,
                    sample_id: Some(sample),
                    instance: String::new(),
                    values: sanitize_map(raw),
                });
            }
        }

        if let Some(path) = self.optional_run_file(files.dragen_prefilter.as_ref())? {
            let by_sample = parsers::dragen::parse_section_per_sample(
                path,
                parsers::dragen::PREFILTER_SECTION,
            )?;
            for (sample, raw) in by_sample {
                harvested.push(Harvested {
                    kind: MetricKind::DragenVariantMetrics,
                    sample_id: Some(sample),
                    instance: String::new(),
                    values: sanitize_map(raw),
                });
            }
        }

        if let Some(path) = self.optional_run_file(files.variants_vcf.as_ref())? {
            for (sample, count) in parsers::vcf::get_passing_variant_counts(path, &self.samples)? {
                let mut values = IndexMap::new();
                values.insert(String::from("passing_variants"), Some(count.to_string()));
                harvested.push(Harvested {
                    kind: MetricKind::VariantCount,
                    sample_id: Some(sample),
                    instance: String::new(),
                    values,
                });
            }
        }

        if let Some(path) = self.optional_run_file(files.sensitivity_report.as_ref())? {
            harvested.push(Harvested {
                kind: MetricKind::Sensitivity,
                sample_id: None,
                instance: String::new(),
                values: sanitize_map(parsers::sensitivity::parse_sensitivity_report(path)?),
            });
        }

        if let Some(path) = self.optional_run_file(files.fusion_contamination.as_ref())? {
            for row in parsers::fusion::parse_fusion_contamination(path)? {
                let mut values = IndexMap::new();
                values.insert(
                    String::from("contamination"),
                    Some(row.contamination.to_string()),
                );
                values.insert(
                    String::from("contamination_referral"),
                    Some(row.contamination_referral.to_string()),
                );
                harvested.push(Harvested {
                    kind: MetricKind::FusionContamination,
                    sample_id: Some(row.sample_id),
                    instance: String::new(),
                    values,
                });
            }
        }

        if let Some(path) = self.optional_run_file(files.fusion_alignment.as_ref())? {
            for row in parsers::fusion::parse_fusion_alignment(path)? {
                let mut values = IndexMap::new();
                values.insert(
                    String::from("pct_reads_aligned"),
                    Some(row.pct_reads_aligned),
                );
                values.insert(
                    String::from("unique_reads_aligned"),
                    Some(row.unique_reads_aligned),
                );
                harvested.push(Harvested {
                    kind: MetricKind::FusionAlignment,
                    sample_id: Some(row.sample_id),
                    instance: String::new(),
                    values,
                });
            }
        }

        Ok(harvested)
    }

    fn relatedness_inputs(&self) -> anyhow::Result<Option<(PathBuf, PathBuf)>> {
        let (ped_pattern, matrix_pattern) = match (
            &self.layout.metric_files.pedigree,
            &self.layout.metric_files.relatedness_matrix,
        ) {
            (Some(ped), Some(matrix)) => (ped, matrix),
            _ => return Ok(None),
        };

        let ped = globs::first_match(&self.results_root, &self.expand(ped_pattern, None))?;
        let matrix = globs::first_match(&self.results_root, &self.expand(matrix_pattern, None))?;

        Ok(match (ped, matrix) {
            (Some(ped), Some(matrix)) => Some((ped, matrix)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {

    use std::fs;

    use super::*;
    use crate::config::Setting;
    use crate::monitors::layouts::MetricFiles;

    fn layout() -> DialectLayout {
        DialectLayout {
            dialect: Dialect::GermlineEnrichment,
            results_subdir: None,
            sample_dir: String::from("{sample}"),
            sample_completed_files: Setting::Default(vec![String::from("1_Pipeline.sh.e*")]),
            sample_expected_files: Setting::Default(vec![
                String::from("{sample}*HsMetrics.txt"),
                String::from("{sample}_QC.txt"),
            ]),
            sample_not_expected_files: Setting::Default(vec![String::from("*.temp")]),
            run_completed_files: Setting::Default(vec![String::from("2_Pipeline.sh.e*")]),
            run_expected_files: Setting::Default(vec![String::from("{run}_sensitivity.txt")]),
            run_not_expected_files: Setting::Default(vec![String::from("*.temp")]),
            min_completed_files: 0,
            run_marker: None,
            log_file: None,
            fastqc_naming: crate::parsers::fastqc::FastqcNaming::Legacy,
            metric_files: MetricFiles {
                qc_text: Some(String::from("{sample}_QC.txt")),
                sensitivity_report: Some(String::from("{run}_sensitivity.txt")),
                ..MetricFiles::default()
            },
        }
    }

    fn monitor(root: &Path) -> GlobMonitor {
        GlobMonitor::new(
            "run1",
            root.to_path_buf(),
            vec![String::from("S1")],
            layout(),
        )
    }

    fn seed_valid_sample(root: &Path) {
        let dir = root.join("S1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("1_Pipeline.sh.e100"), "").unwrap();
        fs::write(dir.join("S1_HsMetrics.txt"), "").unwrap();
        fs::write(
            dir.join("S1_QC.txt"),
            "sample\tcalculated_sex\nS1\tfemale\n",
        )
        .unwrap();
    }

    #[test]
    pub fn test_complete_and_valid_sample() {
        let dir = tempfile::tempdir().unwrap();
        seed_valid_sample(dir.path());
        let monitor = monitor(dir.path());

        assert!(monitor.sample_is_complete("S1").unwrap());
        assert!(monitor.sample_is_valid("S1").unwrap());
    }

    #[test]
    pub fn test_zero_matches_fail_validity() {
        let dir = tempfile::tempdir().unwrap();
        seed_valid_sample(dir.path());
        fs::remove_file(dir.path().join("S1/S1_HsMetrics.txt")).unwrap();
        let monitor = monitor(dir.path());

        assert!(!monitor.sample_is_valid("S1").unwrap());
    }

    #[test]
    pub fn test_two_matches_fail_validity() {
        let dir = tempfile::tempdir().unwrap();
        seed_valid_sample(dir.path());
        // A second match for the same glob marks an ambiguous rerun.
        fs::write(dir.path().join("S1/S1_old_HsMetrics.txt"), "").unwrap();
        let monitor = monitor(dir.path());

        assert!(!monitor.sample_is_valid("S1").unwrap());
    }

    #[test]
    pub fn test_not_expected_file_fails_validity() {
        let dir = tempfile::tempdir().unwrap();
        seed_valid_sample(dir.path());
        fs::write(dir.path().join("S1/leftover.temp"), "").unwrap();
        let monitor = monitor(dir.path());

        assert!(!monitor.sample_is_valid("S1").unwrap());
    }

    #[test]
    pub fn test_incomplete_sample_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        seed_valid_sample(dir.path());
        fs::remove_file(dir.path().join("S1/1_Pipeline.sh.e100")).unwrap();
        let monitor = monitor(dir.path());

        assert!(!monitor.sample_is_complete("S1").unwrap());
        // Validity is independent of the completion marker.
        assert!(monitor.sample_is_valid("S1").unwrap());
    }

    #[test]
    pub fn test_run_predicates_and_conjunction() {
        let dir = tempfile::tempdir().unwrap();
        seed_valid_sample(dir.path());
        fs::write(dir.path().join("2_Pipeline.sh.e200"), "").unwrap();
        fs::write(dir.path().join("run1_sensitivity.txt"), "[1] \"est\" 0.95 0.90-0.99\n").unwrap();
        let monitor = monitor(dir.path());

        assert!(monitor.run_is_complete().unwrap());
        assert!(monitor.run_is_valid().unwrap());
        assert!(monitor.run_and_samples_complete().unwrap());
        assert!(monitor.run_and_samples_valid().unwrap());
    }

    #[test]
    pub fn test_marker_sniff_rules() {
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join("marker.txt"), "step one\nfinished with success\n\n").unwrap();
        let sniff = MarkerSniff {
            glob: String::from("marker.txt"),
            rule: MarkerRule::LastLineContains("success"),
        };
        assert!(marker_satisfied(dir.path(), &sniff).unwrap());

        fs::write(dir.path().join("marker.txt"), "finished with failure\n").unwrap();
        assert!(!marker_satisfied(dir.path(), &sniff).unwrap());

        let exact = MarkerSniff {
            glob: String::from("marker.txt"),
            rule: MarkerRule::LastLineEquals("CRUK workflow completed"),
        };
        fs::write(dir.path().join("marker.txt"), "starting\nCRUK workflow completed\n").unwrap();
        assert!(marker_satisfied(dir.path(), &exact).unwrap());

        fs::write(
            dir.path().join("marker.txt"),
            "CRUK workflow completed\ntrailing line\n",
        )
        .unwrap();
        assert!(!marker_satisfied(dir.path(), &exact).unwrap());
    }

    #[test]
    pub fn test_missing_marker_is_not_complete() {
        let dir = tempfile::tempdir().unwrap();
        let sniff = MarkerSniff {
            glob: String::from("absent.txt"),
            rule: MarkerRule::LastLineContains("success"),
        };

        assert!(!marker_satisfied(dir.path(), &sniff).unwrap());
    }

    #[test]
    pub fn test_getter_on_missing_file_is_a_precondition_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("S1")).unwrap();
        let monitor = monitor(dir.path());

        assert!(monitor.get_qc_metrics("S1").is_err());
    }

    #[test]
    pub fn test_harvest_collects_configured_families() {
        let dir = tempfile::tempdir().unwrap();
        seed_valid_sample(dir.path());
        fs::write(
            dir.path().join("run1_sensitivity.txt"),
            "[1] \"est\" 0.95 0.90-0.99\n",
        )
        .unwrap();
        let monitor = monitor(dir.path());

        let sample = monitor.harvest_sample("S1").unwrap();
        assert_eq!(sample.len(), 1);
        assert_eq!(sample[0].kind, MetricKind::QcMetrics);
        assert_eq!(
            sample[0].values.get("calculated_sex").unwrap().as_deref(),
            Some("female")
        );

        let run = monitor.harvest_run().unwrap();
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].kind, MetricKind::Sensitivity);
        assert_eq!(run[0].sample_id, None);
    }

    #[test]
    pub fn test_calculated_sex_from_ploidy_karyotype() {
        let dir = tempfile::tempdir().unwrap();
        let sample_dir = dir.path().join("S1");
        fs::create_dir_all(&sample_dir).unwrap();
        fs::write(
            sample_dir.join("S1.ploidy_estimation_metrics.csv"),
            "PLOIDY ESTIMATION,,Predicted sex chromosome ploidy,XY\n",
        )
        .unwrap();

        let mut layout = layout();
        layout.metric_files.qc_text = None;
        layout.metric_files.dragen_ploidy =
            Some(String::from("{sample}.ploidy_estimation_metrics.csv"));
        let monitor = GlobMonitor::new(
            "run1",
            dir.path().to_path_buf(),
            vec![String::from("S1")],
            layout,
        );

        assert_eq!(monitor.get_calculated_sex("S1").unwrap().as_deref(), Some("male"));
    }
}
