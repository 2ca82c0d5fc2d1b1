//! Pipeline monitors: per-dialect completion and validity detection over a
//! results directory tree.
//!
//! Every dialect answers the same four questions — is this sample complete,
//! is it valid, is the run complete, is the run valid — through the
//! [`PipelineMonitor`] trait. Where dialects differ only in *data* (which
//! globs mark completion, which files are expected), one generic
//! [`GlobMonitor`][generic::GlobMonitor] is driven by a per-dialect
//! [`DialectLayout`][layouts::DialectLayout]. Genuinely different algorithms
//! (TSO500's NTC-contamination math, CRUK's appsession log scan, the
//! demultiplexing FASTQ size checks) are distinct strategies behind the same
//! trait.

pub mod cruk;
pub mod demultiplex;
pub mod generic;
pub mod layouts;
pub mod tso500;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;
use indexmap::IndexMap;

use crate::config::AnalysisConfig;
use crate::model::MetricKind;
use crate::samplesheet::SampleSheet;

/// One metric parsed out of the results tree, not yet keyed to a persisted
/// analysis. `sample_id` is `None` for run-level metrics; the scan job maps
/// ids onto sample analysis keys before insertion.
#[derive(Clone, Debug)]
pub struct Harvested {
    /// The metric family.
    pub kind: MetricKind,

    /// Owning sample, or `None` for a run-level metric.
    pub sample_id: Option<String>,

    /// Disambiguator for families with several records per owner.
    pub instance: String,

    /// Sanitized key→value payload.
    pub values: IndexMap<String, Option<String>>,
}

/// The pipeline dialects the tracker understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Legacy germline enrichment (shell pipeline).
    GermlineEnrichment,

    /// Legacy somatic enrichment.
    SomaticEnrichment,

    /// Legacy somatic amplicon.
    SomaticAmplicon,

    /// Somatic RNA fusion.
    SomaticFusion,

    /// Dragen germline enrichment.
    DragenGe,

    /// Dragen whole-genome sequencing.
    DragenWgs,

    /// Nextflow-based germline variant pipeline.
    NextflowGermline,

    /// TSO500 DNA.
    Tso500Dna,

    /// TSO500 RNA.
    Tso500Rna,

    /// TSO500 circulating tumour DNA.
    Tso500Ctdna,

    /// CRUK / BaseSpace workflow.
    Cruk,
}

impl Dialect {
    /// Every dialect, for listings.
    pub fn all() -> &'static [Dialect] {
        &[
            Dialect::GermlineEnrichment,
            Dialect::SomaticEnrichment,
            Dialect::SomaticAmplicon,
            Dialect::SomaticFusion,
            Dialect::DragenGe,
            Dialect::DragenWgs,
            Dialect::NextflowGermline,
            Dialect::Tso500Dna,
            Dialect::Tso500Rna,
            Dialect::Tso500Ctdna,
            Dialect::Cruk,
        ]
    }

    /// The configuration name of the dialect.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::GermlineEnrichment => "germline_enrichment",
            Dialect::SomaticEnrichment => "somatic_enrichment",
            Dialect::SomaticAmplicon => "somatic_amplicon",
            Dialect::SomaticFusion => "somatic_fusion",
            Dialect::DragenGe => "dragen_ge",
            Dialect::DragenWgs => "dragen_wgs",
            Dialect::NextflowGermline => "nextflow_germline",
            Dialect::Tso500Dna => "tso500_dna",
            Dialect::Tso500Rna => "tso500_rna",
            Dialect::Tso500Ctdna => "tso500_ctdna",
            Dialect::Cruk => "cruk",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for dialect in Dialect::all() {
            if dialect.name() == s {
                return Ok(*dialect);
            }
        }

        bail!("unknown pipeline dialect: {}", s)
    }
}

/// Completion and validity predicates shared by every dialect.
///
/// The conjunction methods short-circuit on the first failing sample, so a
/// run with one incomplete sample never pays for globbing the rest.
pub trait PipelineMonitor {
    /// The dialect this monitor implements.
    fn dialect(&self) -> Dialect;

    /// The configured sample names.
    fn samples(&self) -> &[String];

    /// Whether the sample's dialect-specific completion marker is present.
    fn sample_is_complete(&self, sample: &str) -> anyhow::Result<bool>;

    /// Whether every expected file resolves to exactly one match and no
    /// not-expected file matches anything.
    fn sample_is_valid(&self, sample: &str) -> anyhow::Result<bool>;

    /// Run-level completion.
    fn run_is_complete(&self) -> anyhow::Result<bool>;

    /// Run-level validity.
    fn run_is_valid(&self) -> anyhow::Result<bool>;

    /// Conjunction of run-level completion and every sample's completion.
    fn run_and_samples_complete(&self) -> anyhow::Result<bool> {
        for sample in self.samples() {
            if !self.sample_is_complete(sample)? {
                return Ok(false);
            }
        }

        self.run_is_complete()
    }

    /// Conjunction of run-level validity and every sample's validity.
    fn run_and_samples_valid(&self) -> anyhow::Result<bool> {
        for sample in self.samples() {
            if !self.sample_is_valid(sample)? {
                return Ok(false);
            }
        }

        self.run_is_valid()
    }

    /// Parses every metric family the dialect produces for one sample.
    ///
    /// Meant to be called once [`sample_is_valid`][Self::sample_is_valid]
    /// holds; families the run never produced are skipped rather than
    /// reported as errors.
    fn harvest_sample(&self, _sample: &str) -> anyhow::Result<Vec<Harvested>> {
        Ok(Vec::new())
    }

    /// Parses every run-level metric family the dialect produces, including
    /// families that are keyed per sample but read from one run-level file.
    fn harvest_run(&self) -> anyhow::Result<Vec<Harvested>> {
        Ok(Vec::new())
    }

    /// The pedigree and relatedness-matrix files for dialects that run the
    /// relatedness engine, once both are present.
    fn relatedness_inputs(&self) -> anyhow::Result<Option<(PathBuf, PathBuf)>> {
        Ok(None)
    }
}

/// Builds the monitor for a dialect over a results directory.
///
/// `sheet` supplies the sample order and, for CRUK, the pairing identifiers
/// and worksheet uniqueness check.
pub fn build_monitor(
    dialect: Dialect,
    run_id: &str,
    results_dir: PathBuf,
    sheet: &SampleSheet,
    config: &AnalysisConfig,
) -> anyhow::Result<Box<dyn PipelineMonitor>> {
    let samples = sheet.sample_ids();
    let layout = layouts::layout(dialect).with_overrides(config);

    match dialect {
        Dialect::Tso500Dna | Dialect::Tso500Rna | Dialect::Tso500Ctdna => {
            Ok(Box::new(tso500::Tso500Monitor::new(
                run_id,
                results_dir,
                samples,
                layout,
            )))
        }
        Dialect::Cruk => Ok(Box::new(cruk::CrukMonitor::new(
            run_id,
            results_dir,
            sheet,
            layout,
        )?)),
        _ => Ok(Box::new(generic::GlobMonitor::new(
            run_id,
            results_dir,
            samples,
            layout,
        ))),
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    pub fn test_dialect_round_trip() {
        for dialect in Dialect::all() {
            assert_eq!(Dialect::from_str(dialect.name()).unwrap(), *dialect);
        }
    }

    #[test]
    pub fn test_unknown_dialect_is_an_error() {
        assert!(Dialect::from_str("bwa_mem").is_err());
    }
}
