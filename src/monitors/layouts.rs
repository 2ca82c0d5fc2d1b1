//! Compiled-in filesystem layouts for each pipeline dialect.
//!
//! A [`DialectLayout`] captures everything about a dialect that is *data*
//! rather than algorithm: which globs mark a sample or run as complete, which
//! files are expected (and not expected) once it finished cleanly, where the
//! per-sample directories sit relative to the results root, and which
//! filename patterns the metric getters should look for. The glob lists are
//! overridable from the YAML configuration; everything else is fixed per
//! dialect.

use crate::config::AnalysisConfig;
use crate::config::Setting;
use crate::monitors::Dialect;
use crate::parsers::fastqc::FastqcNaming;

/// Content rule applied to a run-level completion marker file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerRule {
    /// The last non-blank line must contain the substring.
    LastLineContains(&'static str),

    /// The last line must equal the string exactly.
    LastLineEquals(&'static str),
}

/// A run-level marker file whose *content* decides completion, not just its
/// presence.
#[derive(Clone, Debug)]
pub struct MarkerSniff {
    /// Glob for the marker file, relative to the results root.
    pub glob: String,

    /// The rule its content must satisfy.
    pub rule: MarkerRule,
}

/// Filename patterns the metric getters glob for. Per-sample patterns are
/// relative to the sample directory; run patterns are relative to the results
/// root. `{sample}` and `{run}` placeholders are expanded before globbing.
///
/// A `None` simply means the dialect never produces that family.
#[derive(Clone, Debug, Default)]
pub struct MetricFiles {
    /// Picard hybrid-selection metrics.
    pub hs_metrics: Option<String>,

    /// Picard MarkDuplicates metrics.
    pub duplication_metrics: Option<String>,

    /// GATK depth-of-coverage sample summary.
    pub depth_summary: Option<String>,

    /// VerifyBamID `.selfSM` contamination output.
    pub contamination: Option<String>,

    /// Generic two-line QC text (carries the calculated sex).
    pub qc_text: Option<String>,

    /// Picard alignment summary metrics.
    pub alignment_metrics: Option<String>,

    /// Picard insert size metrics.
    pub insert_metrics: Option<String>,

    /// FastQC module-status summary.
    pub fastqc_status: Option<String>,

    /// Dragen mapping/aligning metrics CSV.
    pub dragen_mapping: Option<String>,

    /// Dragen whole-genome coverage metrics CSV.
    pub dragen_wgs_coverage: Option<String>,

    /// Dragen ploidy estimation metrics CSV.
    pub dragen_ploidy: Option<String>,

    /// Run-level Dragen joint-caller metrics CSV (per-sample rows).
    pub dragen_prefilter: Option<String>,

    /// Run-level Picard variant-calling detail metrics (per-sample rows).
    pub variant_detail_metrics: Option<String>,

    /// Run-level multi-sample VCF for passing-variant counts.
    pub variants_vcf: Option<String>,

    /// Run-level sensitivity report.
    pub sensitivity_report: Option<String>,

    /// Run-level fusion contamination CSV.
    pub fusion_contamination: Option<String>,

    /// Run-level fusion alignment CSV.
    pub fusion_alignment: Option<String>,

    /// Run-level PED pedigree file.
    pub pedigree: Option<String>,

    /// Run-level vcftools relatedness matrix.
    pub relatedness_matrix: Option<String>,
}

/// Everything that distinguishes one glob-driven dialect from another.
#[derive(Clone, Debug)]
pub struct DialectLayout {
    /// The dialect this layout describes.
    pub dialect: Dialect,

    /// Subdirectory of the configured results directory that actually holds
    /// the results (e.g. `post_processing/results` for Dragen WGS). The
    /// choice is an explicit field, never inferred from glob content.
    pub results_subdir: Option<String>,

    /// Template for a sample's directory relative to the results root.
    pub sample_dir: String,

    /// Globs marking a sample's analysis as complete.
    pub sample_completed_files: Setting<Vec<String>>,

    /// Globs that must each resolve to exactly one file for a valid sample.
    pub sample_expected_files: Setting<Vec<String>>,

    /// Globs that must match nothing for a valid sample.
    pub sample_not_expected_files: Setting<Vec<String>>,

    /// Globs marking the run-level analysis as complete.
    pub run_completed_files: Setting<Vec<String>>,

    /// Globs that must each resolve to exactly one file for a valid run.
    pub run_expected_files: Setting<Vec<String>>,

    /// Globs that must match nothing for a valid run.
    pub run_not_expected_files: Setting<Vec<String>>,

    /// Minimum number of completed-file matches for a complete sample
    /// (TSO500 dialects count matches rather than requiring every glob).
    pub min_completed_files: usize,

    /// Run-level marker file whose content decides completion.
    pub run_marker: Option<MarkerSniff>,

    /// Log file scanned for per-sample appsession lines (CRUK only).
    pub log_file: Option<String>,

    /// How fastq filenames encode sample, lane and read.
    pub fastqc_naming: FastqcNaming,

    /// Filename patterns for the metric getters.
    pub metric_files: MetricFiles,
}

fn defaults(globs: &[&str]) -> Setting<Vec<String>> {
    Setting::Default(globs.iter().map(|s| s.to_string()).collect())
}

impl DialectLayout {
    fn base(dialect: Dialect) -> Self {
        DialectLayout {
            dialect,
            results_subdir: None,
            sample_dir: String::from("{sample}"),
            sample_completed_files: defaults(&[]),
            sample_expected_files: defaults(&[]),
            sample_not_expected_files: defaults(&[]),
            run_completed_files: defaults(&[]),
            run_expected_files: defaults(&[]),
            run_not_expected_files: defaults(&[]),
            min_completed_files: 0,
            run_marker: None,
            log_file: None,
            fastqc_naming: FastqcNaming::Legacy,
            metric_files: MetricFiles::default(),
        }
    }

    /// Applies the configuration's glob-list and layout overrides.
    pub fn with_overrides(mut self, config: &AnalysisConfig) -> Self {
        fn merge(
            configured: &Option<Vec<String>>,
            current: Setting<Vec<String>>,
        ) -> Setting<Vec<String>> {
            match configured {
                Some(globs) => Setting::Configured(globs.clone()),
                None => current,
            }
        }

        self.sample_completed_files =
            merge(&config.sample_completed_files, self.sample_completed_files);
        self.sample_expected_files =
            merge(&config.sample_expected_files, self.sample_expected_files);
        self.sample_not_expected_files = merge(
            &config.sample_not_expected_files,
            self.sample_not_expected_files,
        );
        self.run_completed_files = merge(&config.run_completed_files, self.run_completed_files);
        self.run_expected_files = merge(&config.run_expected_files, self.run_expected_files);
        self.run_not_expected_files =
            merge(&config.run_not_expected_files, self.run_not_expected_files);

        if let Some(subdir) = &config.results_subdir {
            self.results_subdir = Some(subdir.clone());
        }

        // Dialects that count completed files (TSO500) need one match per
        // configured pattern when the pattern list is overridden.
        if self.min_completed_files > 0 && self.sample_completed_files.is_configured() {
            self.min_completed_files = self.sample_completed_files.value().len();
        }

        self
    }
}

/// The compiled-in layout for a dialect.
pub fn layout(dialect: Dialect) -> DialectLayout {
    match dialect {
        Dialect::GermlineEnrichment => germline_enrichment(),
        Dialect::SomaticEnrichment => somatic_enrichment(),
        Dialect::SomaticAmplicon => somatic_amplicon(),
        Dialect::SomaticFusion => somatic_fusion(),
        Dialect::DragenGe => dragen_ge(),
        Dialect::DragenWgs => dragen_wgs(),
        Dialect::NextflowGermline => nextflow_germline(),
        Dialect::Tso500Dna | Dialect::Tso500Rna => tso500(dialect),
        Dialect::Tso500Ctdna => tso500_ctdna(),
        Dialect::Cruk => cruk(),
    }
}

fn germline_enrichment() -> DialectLayout {
    DialectLayout {
        sample_completed_files: defaults(&["1_GermlineEnrichment.sh.e*"]),
        sample_expected_files: defaults(&[
            "{sample}_HsMetrics.txt",
            "{sample}_MarkDuplicatesMetrics.txt",
            "{sample}_DepthOfCoverage.sample_summary",
            "{sample}_Contamination.selfSM",
            "{sample}_QC.txt",
            "{sample}_AlignmentSummaryMetrics.txt",
            "{sample}_InsertMetrics.txt",
            "{sample}_fastqc_status.txt",
            "{sample}.g.vcf.gz",
        ]),
        sample_not_expected_files: defaults(&["*.temp"]),
        run_completed_files: defaults(&["2_GermlineEnrichment.sh.e*"]),
        run_expected_files: defaults(&[
            "{run}_filtered_annotated_roi.vcf.gz",
            "{run}_relatedness.relatedness2",
            "{run}.ped",
            "{run}_variant_calling_detail_metrics.txt",
            "{run}_sensitivity.txt",
        ]),
        run_not_expected_files: defaults(&["*.temp"]),
        metric_files: MetricFiles {
            hs_metrics: Some(String::from("{sample}_HsMetrics.txt")),
            duplication_metrics: Some(String::from("{sample}_MarkDuplicatesMetrics.txt")),
            depth_summary: Some(String::from("{sample}_DepthOfCoverage.sample_summary")),
            contamination: Some(String::from("{sample}_Contamination.selfSM")),
            qc_text: Some(String::from("{sample}_QC.txt")),
            alignment_metrics: Some(String::from("{sample}_AlignmentSummaryMetrics.txt")),
            insert_metrics: Some(String::from("{sample}_InsertMetrics.txt")),
            fastqc_status: Some(String::from("{sample}_fastqc_status.txt")),
            variant_detail_metrics: Some(String::from("{run}_variant_calling_detail_metrics.txt")),
            variants_vcf: Some(String::from("{run}_filtered_annotated_roi.vcf.gz")),
            sensitivity_report: Some(String::from("{run}_sensitivity.txt")),
            pedigree: Some(String::from("{run}.ped")),
            relatedness_matrix: Some(String::from("{run}_relatedness.relatedness2")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::GermlineEnrichment)
    }
}

fn somatic_enrichment() -> DialectLayout {
    DialectLayout {
        sample_completed_files: defaults(&["1_SomaticEnrichment.sh.e*"]),
        sample_expected_files: defaults(&[
            "{sample}_HsMetrics.txt",
            "{sample}_MarkDuplicatesMetrics.txt",
            "{sample}_DepthOfCoverage.sample_summary",
            "{sample}_QC.txt",
            "{sample}_AlignmentSummaryMetrics.txt",
            "{sample}_InsertMetrics.txt",
            "{sample}_fastqc_status.txt",
            "{sample}_filtered_meta_annotated.vcf.gz",
        ]),
        sample_not_expected_files: defaults(&["*.temp"]),
        run_completed_files: defaults(&["2_SomaticEnrichment.sh.e*"]),
        run_not_expected_files: defaults(&["*.temp"]),
        metric_files: MetricFiles {
            hs_metrics: Some(String::from("{sample}_HsMetrics.txt")),
            duplication_metrics: Some(String::from("{sample}_MarkDuplicatesMetrics.txt")),
            depth_summary: Some(String::from("{sample}_DepthOfCoverage.sample_summary")),
            qc_text: Some(String::from("{sample}_QC.txt")),
            alignment_metrics: Some(String::from("{sample}_AlignmentSummaryMetrics.txt")),
            insert_metrics: Some(String::from("{sample}_InsertMetrics.txt")),
            fastqc_status: Some(String::from("{sample}_fastqc_status.txt")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::SomaticEnrichment)
    }
}

fn somatic_amplicon() -> DialectLayout {
    DialectLayout {
        sample_completed_files: defaults(&["1_SomaticAmplicon.sh.e*"]),
        sample_expected_files: defaults(&[
            "{sample}_HsMetrics.txt",
            "{sample}_DepthOfCoverage.sample_summary",
            "{sample}_AlignmentSummaryMetrics.txt",
            "{sample}_InsertMetrics.txt",
            "{sample}_fastqc_status.txt",
            "{sample}_VariantReport.txt",
        ]),
        sample_not_expected_files: defaults(&["*.temp"]),
        run_completed_files: defaults(&["1_SomaticAmplicon.sh.e*"]),
        run_not_expected_files: defaults(&["*.temp"]),
        metric_files: MetricFiles {
            hs_metrics: Some(String::from("{sample}_HsMetrics.txt")),
            depth_summary: Some(String::from("{sample}_DepthOfCoverage.sample_summary")),
            alignment_metrics: Some(String::from("{sample}_AlignmentSummaryMetrics.txt")),
            insert_metrics: Some(String::from("{sample}_InsertMetrics.txt")),
            fastqc_status: Some(String::from("{sample}_fastqc_status.txt")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::SomaticAmplicon)
    }
}

fn somatic_fusion() -> DialectLayout {
    DialectLayout {
        sample_completed_files: defaults(&["1_SomaticFusion.sh.e*"]),
        sample_expected_files: defaults(&[
            "{sample}_fusion_report.csv",
            "{sample}_fastqc_status.txt",
        ]),
        sample_not_expected_files: defaults(&["*.temp"]),
        run_completed_files: defaults(&["2_SomaticFusion.sh.e*"]),
        run_expected_files: defaults(&[
            "{run}_contamination.csv",
            "{run}_alignment_stats.csv",
        ]),
        run_not_expected_files: defaults(&["*.temp"]),
        metric_files: MetricFiles {
            fastqc_status: Some(String::from("{sample}_fastqc_status.txt")),
            fusion_contamination: Some(String::from("{run}_contamination.csv")),
            fusion_alignment: Some(String::from("{run}_alignment_stats.csv")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::SomaticFusion)
    }
}

fn dragen_ge() -> DialectLayout {
    DialectLayout {
        sample_completed_files: defaults(&["dragen_complete.txt"]),
        sample_expected_files: defaults(&[
            "{sample}.mapping_metrics.csv",
            "{sample}.vc_metrics.csv",
            "{sample}.hard-filtered.gvcf.gz",
            "{sample}_fastqc_status.txt",
        ]),
        sample_not_expected_files: defaults(&["*.tmp"]),
        run_completed_files: defaults(&["post_processing_finished.txt"]),
        run_expected_files: defaults(&["{run}.joint.vc_metrics.csv"]),
        run_not_expected_files: defaults(&["*.tmp"]),
        metric_files: MetricFiles {
            dragen_mapping: Some(String::from("{sample}.mapping_metrics.csv")),
            dragen_prefilter: Some(String::from("{run}.joint.vc_metrics.csv")),
            fastqc_status: Some(String::from("{sample}_fastqc_status.txt")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::DragenGe)
    }
}

fn dragen_wgs() -> DialectLayout {
    DialectLayout {
        results_subdir: Some(String::from("post_processing/results")),
        sample_completed_files: defaults(&["dragen_complete.txt"]),
        sample_expected_files: defaults(&[
            "{sample}.mapping_metrics.csv",
            "{sample}.wgs_coverage_metrics.csv",
            "{sample}.ploidy_estimation_metrics.csv",
        ]),
        sample_not_expected_files: defaults(&["*.tmp"]),
        run_completed_files: defaults(&["post_processing_finished.txt"]),
        run_expected_files: defaults(&["{run}.joint.vc_metrics.csv"]),
        run_not_expected_files: defaults(&["*.tmp"]),
        metric_files: MetricFiles {
            dragen_mapping: Some(String::from("{sample}.mapping_metrics.csv")),
            dragen_wgs_coverage: Some(String::from("{sample}.wgs_coverage_metrics.csv")),
            dragen_ploidy: Some(String::from("{sample}.ploidy_estimation_metrics.csv")),
            dragen_prefilter: Some(String::from("{run}.joint.vc_metrics.csv")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::DragenWgs)
    }
}

fn nextflow_germline() -> DialectLayout {
    DialectLayout {
        sample_completed_files: defaults(&["variant_calling_complete.txt"]),
        sample_expected_files: defaults(&[
            "{sample}.hard-filtered.vcf.gz",
            "{sample}_QC.txt",
        ]),
        sample_not_expected_files: defaults(&["*.tmp"]),
        run_marker: Some(MarkerSniff {
            glob: String::from("pipeline_complete.txt"),
            rule: MarkerRule::LastLineContains("success"),
        }),
        metric_files: MetricFiles {
            qc_text: Some(String::from("{sample}_QC.txt")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::NextflowGermline)
    }
}

fn tso500(dialect: Dialect) -> DialectLayout {
    DialectLayout {
        sample_dir: String::from("Results/{sample}"),
        sample_completed_files: defaults(&[
            "{sample}_CombinedVariantOutput.tsv",
            "{sample}_coverage.json",
        ]),
        sample_not_expected_files: defaults(&["*.tmp"]),
        min_completed_files: 2,
        run_marker: Some(MarkerSniff {
            glob: String::from("post_processing_finished.txt"),
            rule: MarkerRule::LastLineContains("success"),
        }),
        fastqc_naming: FastqcNaming::Tso500,
        metric_files: MetricFiles {
            dragen_mapping: Some(String::from("{sample}*_mapping_metrics.csv")),
            dragen_wgs_coverage: Some(String::from("{sample}*_coverage_metrics.csv")),
            fastqc_status: Some(String::from("{sample}_fastqc_status.txt")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(dialect)
    }
}

fn tso500_ctdna() -> DialectLayout {
    DialectLayout {
        sample_dir: String::from("Results/{sample}"),
        sample_completed_files: defaults(&["{sample}*.tsv"]),
        sample_not_expected_files: defaults(&["*.tmp"]),
        min_completed_files: 1,
        run_marker: Some(MarkerSniff {
            glob: String::from("post_processing_finished.txt"),
            rule: MarkerRule::LastLineContains("success"),
        }),
        run_expected_files: defaults(&["Results/MetricsOutput.tsv"]),
        fastqc_naming: FastqcNaming::Tso500,
        metric_files: MetricFiles {
            fastqc_status: Some(String::from("{sample}_fastqc_status.txt")),
            ..MetricFiles::default()
        },
        ..DialectLayout::base(Dialect::Tso500Ctdna)
    }
}

fn cruk() -> DialectLayout {
    DialectLayout {
        run_marker: Some(MarkerSniff {
            glob: String::from("cruk_complete.txt"),
            rule: MarkerRule::LastLineEquals("CRUK workflow completed"),
        }),
        log_file: Some(String::from("appsession.log")),
        fastqc_naming: FastqcNaming::Cruk,
        ..DialectLayout::base(Dialect::Cruk)
    }
}
