//! YAML configuration for the scan and check subcommands.
//!
//! Configuration is keyed by `<pipeline>-<analysis type>` and supplies, per
//! combination: the monitor dialect, where that pipeline writes its results,
//! the configured auto-QC check list, every threshold the checks reference,
//! and optional overrides for the dialect's built-in glob lists.
//!
//! Overridable values are surfaced through [`Setting`], which keeps the
//! distinction between "explicitly configured" and "deliberate default"
//! visible to callers and logs instead of silently falling through.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::model::Thresholds;

/// Default minimum per-file FASTQ size in bytes for demultiplexing validity.
pub const DEFAULT_FASTQ_MIN_SIZE: u64 = 1_000_000;

/// A value that is either explicitly configured or a deliberate default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Setting<T> {
    /// The value came from the configuration file.
    Configured(T),

    /// The value is the built-in default.
    Default(T),
}

impl<T> Setting<T> {
    /// The underlying value, whichever side it came from.
    pub fn value(&self) -> &T {
        match self {
            Setting::Configured(v) | Setting::Default(v) => v,
        }
    }

    /// Consumes the setting and returns the value.
    pub fn into_value(self) -> T {
        match self {
            Setting::Configured(v) | Setting::Default(v) => v,
        }
    }

    /// Whether the value was explicitly configured.
    pub fn is_configured(&self) -> bool {
        matches!(self, Setting::Configured(_))
    }
}

/// Configuration for one pipeline × analysis-type combination.
#[derive(Clone, Debug, Deserialize)]
pub struct AnalysisConfig {
    /// Monitor dialect name (e.g. `germline_enrichment`, `tso500_dna`).
    pub dialect: String,

    /// Results directory template; `{run}` expands to the run id.
    pub results_dir: String,

    /// Configured auto-QC check names. Absent means "no configuration",
    /// which the evaluator reports as an immediate failure.
    #[serde(default)]
    pub qc_checks: Option<Vec<String>>,

    /// Threshold values referenced by the configured checks.
    #[serde(flatten)]
    pub thresholds: Thresholds,

    /// Per-sample contamination cutoff.
    #[serde(default)]
    pub contamination_cutoff: Option<f64>,

    /// Per-sample legacy NTC contamination cutoff.
    #[serde(default)]
    pub ntc_contamination_cutoff: Option<f64>,

    /// Override for the dialect's per-sample completion marker globs.
    #[serde(default)]
    pub sample_completed_files: Option<Vec<String>>,

    /// Override for the dialect's per-sample expected-file globs.
    #[serde(default)]
    pub sample_expected_files: Option<Vec<String>>,

    /// Override for the dialect's per-sample not-expected-file globs.
    #[serde(default)]
    pub sample_not_expected_files: Option<Vec<String>>,

    /// Override for the dialect's run-level completion marker globs.
    #[serde(default)]
    pub run_completed_files: Option<Vec<String>>,

    /// Override for the dialect's run-level expected-file globs.
    #[serde(default)]
    pub run_expected_files: Option<Vec<String>>,

    /// Override for the dialect's run-level not-expected-file globs.
    #[serde(default)]
    pub run_not_expected_files: Option<Vec<String>>,

    /// Override for the dialect's results subdirectory (e.g.
    /// `post_processing/results`).
    #[serde(default)]
    pub results_subdir: Option<String>,
}

impl AnalysisConfig {
    /// The results directory for a run.
    pub fn results_dir_for(&self, run_id: &str) -> PathBuf {
        PathBuf::from(self.results_dir.replace("{run}", run_id))
    }
}

/// The whole configuration file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Where the JSON state store lives.
    pub state_file: PathBuf,

    /// Minimum FASTQ size in bytes for demultiplexing validity.
    #[serde(default)]
    pub fastq_min_size: Option<u64>,

    /// Per `<pipeline>-<analysis type>` configuration.
    pub analyses: IndexMap<String, AnalysisConfig>,
}

impl Config {
    /// Loads and deserializes a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing configuration {}", path.display()))?;

        Ok(config)
    }

    /// The configuration for a pipeline/analysis-type key, if present.
    pub fn analysis(&self, pipeline: &str, analysis_type: &str) -> Option<&AnalysisConfig> {
        self.analyses.get(&format!("{}-{}", pipeline, analysis_type))
    }

    /// The FASTQ minimum size as a tagged setting.
    pub fn fastq_min_size(&self) -> Setting<u64> {
        match self.fastq_min_size {
            Some(size) => Setting::Configured(size),
            None => Setting::Default(DEFAULT_FASTQ_MIN_SIZE),
        }
    }
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use super::*;

    static CONFIG: &str = "\
state_file: /var/lib/runqc/state.json
analyses:
  GermlineEnrichment-2.5.3-IlluminaTruSightOne:
    dialect: germline_enrichment
    results_dir: /data/results/{run}/IlluminaTruSightOne
    qc_checks: [q30, contamination, sex_match, relatedness]
    min_q30_score: 0.8
    min_relatedness_parents: 0.2
    max_child_parent_relatedness: 0.3
    max_relatedness_unrelated: 0.06
    max_relatedness_between_parents: 0.06
    contamination_cutoff: 0.025
  TSO500-2.2-DNA:
    dialect: tso500_dna
    results_dir: /data/results/{run}/TSO500
    qc_checks: [tso500_ntc_contamination]
    max_ntc_contamination: 10
    sample_completed_files:
      - '*variants.tsv'
      - '*_coverage.json'
";

    fn load_fixture() -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        Config::load(file.path()).unwrap()
    }

    #[test]
    pub fn test_analysis_lookup() {
        let config = load_fixture();

        let analysis = config
            .analysis("GermlineEnrichment-2.5.3", "IlluminaTruSightOne")
            .unwrap();
        assert_eq!(analysis.dialect, "germline_enrichment");
        assert_eq!(analysis.thresholds.min_q30_score, Some(0.8));
        assert_eq!(analysis.contamination_cutoff, Some(0.025));
        assert_eq!(
            analysis.qc_checks.as_deref().unwrap(),
            ["q30", "contamination", "sex_match", "relatedness"]
        );

        assert!(config.analysis("GermlineEnrichment-2.5.3", "RochePanCancer").is_none());
    }

    #[test]
    pub fn test_results_dir_template() {
        let config = load_fixture();
        let analysis = config.analysis("TSO500-2.2", "DNA").unwrap();

        assert_eq!(
            analysis.results_dir_for("200110_NB551319_0123_AHXXX"),
            PathBuf::from("/data/results/200110_NB551319_0123_AHXXX/TSO500")
        );
    }

    #[test]
    pub fn test_setting_tagging() {
        let config = load_fixture();
        let analysis = config.analysis("TSO500-2.2", "DNA").unwrap();

        assert_eq!(
            analysis.sample_completed_files.as_deref().unwrap(),
            ["*variants.tsv", "*_coverage.json"]
        );
        assert!(analysis.sample_expected_files.is_none());

        let configured = Setting::Configured(vec![String::from("a")]);
        assert!(configured.is_configured());
        assert_eq!(configured.value().as_slice(), ["a"]);
        assert!(!Setting::Default(0u64).is_configured());
    }

    #[test]
    pub fn test_fastq_min_size_default() {
        let config = load_fixture();
        let size = config.fastq_min_size();

        assert!(!size.is_configured());
        assert_eq!(*size.value(), DEFAULT_FASTQ_MIN_SIZE);
    }
}
