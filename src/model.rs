//! Core entities tracked by the store: runs, samples, the run/sample
//! analysis units, and the metric records parsed out of result files.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// One sequencing read as described by `RunInfo.xml`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRead {
    /// One-based read number.
    pub number: u32,

    /// Number of cycles in the read.
    pub num_cycles: u32,

    /// Whether the read is an index read.
    pub is_indexed: bool,
}

/// One sequencer run. Created when a run directory first appears; the
/// sequencing metadata captured here is immutable afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier (the run directory name).
    pub run_id: String,

    /// Instrument id from `RunInfo.xml`.
    pub instrument: Option<String>,

    /// Flowcell id from `RunInfo.xml`.
    pub flowcell: Option<String>,

    /// Number of lanes on the flowcell.
    pub lanes: u32,

    /// Read/index configuration in read order.
    pub reads: Vec<RunRead>,
}

/// A biological/library sample. Long-lived and reused across runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sample {
    /// Sample identifier.
    pub sample_id: String,
}

/// Natural key for "a run analyzed by a pipeline with an analysis type".
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunAnalysisKey {
    /// Run identifier.
    pub run_id: String,

    /// Pipeline name and version, e.g. `GermlineEnrichment-2.5.3`.
    pub pipeline: String,

    /// Analysis type (panel) name.
    pub analysis_type: String,
}

impl std::fmt::Display for RunAnalysisKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.run_id, self.pipeline, self.analysis_type)
    }
}

/// Natural key for "a sample within one run analysis".
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SampleAnalysisKey {
    /// The owning run analysis.
    pub run_analysis: RunAnalysisKey,

    /// Sample identifier.
    pub sample_id: String,

    /// Worksheet id the sample was booked on.
    pub worksheet: String,
}

/// Threshold fields referenced by the auto-QC checks. A threshold is only
/// meaningful when its check's name appears in the configured check list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum Q30 fraction for the run (compared ×100 against interop rows).
    pub min_q30_score: Option<f64>,

    /// Minimum passing variant count per sample.
    pub min_variants: Option<u64>,

    /// Maximum passing variant count per sample.
    pub max_variants: Option<u64>,

    /// Minimum lower confidence bound for run sensitivity.
    pub min_sensitivity: Option<f64>,

    /// Minimum Ti/Tv ratio per sample.
    pub min_titv: Option<f64>,

    /// Maximum Ti/Tv ratio per sample.
    pub max_titv: Option<f64>,

    /// Minimum percentage of bases covered at 20x.
    pub min_coverage: Option<f64>,

    /// Maximum NTC contamination percentage (TSO500 dialects).
    pub max_ntc_contamination: Option<f64>,

    /// Minimum on-target read count (TSO500 dialects).
    pub min_on_target_reads: Option<u64>,

    /// Minimum uniquely aligned read count (fusion dialect).
    pub min_fusion_aligned_reads_unique: Option<u64>,

    /// Lower bound for parent-child relatedness.
    pub min_relatedness_parents: Option<f64>,

    /// Upper bound for parent-child relatedness.
    pub max_child_parent_relatedness: Option<f64>,

    /// Upper bound for unrelated-pair relatedness.
    pub max_relatedness_unrelated: Option<f64>,

    /// Upper bound for relatedness between a sample's parents.
    pub max_relatedness_between_parents: Option<f64>,
}

/// State of one run × pipeline × analysis-type combination.
///
/// The four flags are monotonic: they move false→true as the monitors
/// re-observe the filesystem and only an explicit reset returns them to
/// pending.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunAnalysis {
    /// Natural key.
    pub key: RunAnalysisKey,

    /// Whether demultiplexing has completed.
    pub demultiplexing_completed: bool,

    /// Whether demultiplexing output passed validity checks.
    pub demultiplexing_valid: bool,

    /// Whether pipeline results have completed.
    pub results_completed: bool,

    /// Whether pipeline results passed validity checks.
    pub results_valid: bool,

    /// Comma-joined list of configured auto-QC check names.
    pub auto_qc_checks: Option<String>,

    /// Threshold values for the configured checks.
    pub thresholds: Thresholds,
}

impl RunAnalysis {
    /// Creates a pending analysis for a key.
    pub fn pending(key: RunAnalysisKey) -> Self {
        RunAnalysis {
            key,
            demultiplexing_completed: false,
            demultiplexing_valid: false,
            results_completed: false,
            results_valid: false,
            auto_qc_checks: None,
            thresholds: Thresholds::default(),
        }
    }

    /// The configured check names, split out of the comma-joined field.
    pub fn check_names(&self) -> Vec<String> {
        self.auto_qc_checks
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// State of one sample within one run analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleAnalysis {
    /// Natural key.
    pub key: SampleAnalysisKey,

    /// Whether this sample's results have completed.
    pub results_completed: bool,

    /// Whether this sample's results passed validity checks.
    pub results_valid: bool,

    /// Declared sex from the sample sheet, if any.
    pub sex: Option<String>,

    /// Maximum tolerated contamination estimate (freemix).
    pub contamination_cutoff: Option<f64>,

    /// Multiplier for the legacy NTC contamination test.
    pub ntc_contamination_cutoff: Option<f64>,
}

impl SampleAnalysis {
    /// Creates a pending sample analysis for a key.
    pub fn pending(key: SampleAnalysisKey) -> Self {
        SampleAnalysis {
            key,
            results_completed: false,
            results_valid: false,
            sex: None,
            contamination_cutoff: None,
            ntc_contamination_cutoff: None,
        }
    }

    /// Whether the sample is a no-template control.
    pub fn is_ntc(&self) -> bool {
        crate::utils::text::is_ntc(&self.key.sample_id)
    }
}

/// The metric record families the parsers produce.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Picard hybrid-selection metrics.
    HsMetrics,

    /// Picard duplication metrics.
    DuplicationMetrics,

    /// GATK depth-of-coverage summary.
    DepthOfCoverage,

    /// VerifyBamID contamination estimates.
    ContaminationMetrics,

    /// Picard alignment summary metrics (one record per category).
    AlignmentMetrics,

    /// Picard variant-calling detail metrics.
    VariantCallingMetrics,

    /// Picard insert size metrics.
    InsertMetrics,

    /// Generic two-line QC text (carries the calculated sex).
    QcMetrics,

    /// FastQC module statuses (one record per fastq file).
    Fastqc,

    /// Dragen mapping/aligning summary.
    DragenAlignmentMetrics,

    /// Dragen joint-caller prefilter metrics.
    DragenVariantMetrics,

    /// Dragen whole-genome coverage summary.
    DragenWgsCoverageMetrics,

    /// Dragen ploidy estimation.
    DragenPloidyMetrics,

    /// Fusion contamination flags.
    FusionContamination,

    /// Fusion alignment statistics.
    FusionAlignment,

    /// TSO500 read counts and NTC contamination percentages.
    Tso500Reads,

    /// Passing variant counts per sample.
    VariantCount,

    /// Interop run quality (one record per read/lane pair).
    InteropRunQuality,

    /// Run-level sensitivity estimate.
    Sensitivity,

    /// Run-level relatedness verdict.
    RelatednessVerdict,
}

/// Which analysis a metric record belongs to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MetricOwner {
    /// A run-level metric.
    Run(RunAnalysisKey),

    /// A sample-level metric.
    Sample(SampleAnalysisKey),
}

/// One write-once metric record. Records are only ever inserted when no
/// record exists for the same `(kind, owner, instance)` key, which is what
/// makes repeated scans idempotent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricRecord {
    /// The metric family.
    pub kind: MetricKind,

    /// The owning analysis.
    pub owner: MetricOwner,

    /// Disambiguator for families with several records per owner (alignment
    /// category, fastq lane/read, interop read/lane). Empty for singletons.
    pub instance: String,

    /// Sanitized key→value payload.
    pub values: IndexMap<String, Option<String>>,
}

impl MetricRecord {
    /// Convenience accessor for a payload value.
    pub fn value(&self, key: &str) -> Option<&String> {
        self.values.get(key).and_then(|v| v.as_ref())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    pub fn test_check_names_splitting() {
        let mut analysis = RunAnalysis::pending(RunAnalysisKey {
            run_id: String::from("run1"),
            pipeline: String::from("GermlineEnrichment-2.5.3"),
            analysis_type: String::from("IlluminaTruSightOne"),
        });

        assert!(analysis.check_names().is_empty());

        analysis.auto_qc_checks = Some(String::from("q30, contamination,sex_match"));
        assert_eq!(
            analysis.check_names(),
            vec!["q30", "contamination", "sex_match"]
        );
    }

    #[test]
    pub fn test_ntc_detection_on_sample_analysis() {
        let key = SampleAnalysisKey {
            run_analysis: RunAnalysisKey {
                run_id: String::from("run1"),
                pipeline: String::from("TSO500-1.0"),
                analysis_type: String::from("DNA"),
            },
            sample_id: String::from("NTC-18-123"),
            worksheet: String::from("ws1"),
        };

        assert!(SampleAnalysis::pending(key).is_ntc());
    }
}
