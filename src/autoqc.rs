//! The auto-QC rule evaluator.
//!
//! [`passes_auto_qc`] turns a run analysis's persisted metrics plus its
//! configured thresholds into a pass/fail verdict and a list of
//! human-readable failure reasons. The evaluator never short-circuits across
//! checks — once the run-level gates pass, the complete configured check set
//! is evaluated against every non-NTC sample so that the reasons list names
//! everything wrong, not just the first thing. NTC samples are excluded from
//! sample-level checks but still count towards run-level completion and
//! validity.
//!
//! A threshold that a configured check needs but the configuration does not
//! supply is a fatal error, not a silent default: a missing number means the
//! run was configured wrong, and a wrong configuration must never quietly
//! pass QC.

use anyhow::bail;
use anyhow::Context;
use itertools::Itertools;

use crate::model::MetricKind;
use crate::model::MetricOwner;
use crate::model::MetricRecord;
use crate::model::RunAnalysis;
use crate::model::RunAnalysisKey;
use crate::model::SampleAnalysis;
use crate::store::Store;
use crate::utils::num::metric_as_f64;
use crate::utils::num::metric_as_u64;

/// FastQC modules whose `FAIL` status fails the check. Every other module
/// may fail without consequence.
pub const FASTQC_CRITICAL_MODULES: &[&str] = &[
    "basic_statistics",
    "per_base_sequencing_quality",
    "per_tile_sequence_quality",
    "per_sequence_quality_scores",
    "per_base_n_content",
];

/// The auto-QC checks the evaluator understands, 1:1 with threshold fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckKind {
    /// Run-level Q30 against every interop run-quality row.
    Q30,

    /// Per-sample contamination estimate against the sample cutoff.
    Contamination,

    /// Legacy NTC contamination ratio test.
    NtcContamination,

    /// TSO500 NTC contamination percentage test.
    Tso500NtcContamination,

    /// TSO500 minimum on-target reads.
    Tso500OnTargetReads,

    /// Declared versus calculated sex.
    SexMatch,

    /// Passing-variant count within configured bounds.
    VariantCount,

    /// Run sensitivity lower confidence bound.
    Sensitivity,

    /// Percentage of bases covered at 20x.
    Coverage20x,

    /// Ti/Tv ratio within configured bounds.
    Titv,

    /// FastQC critical-module statuses.
    Fastqc,

    /// Fusion contamination flags.
    FusionContamination,

    /// Fusion minimum uniquely aligned reads.
    FusionAlignedReads,

    /// Pedigree-versus-genotype relatedness verdict.
    Relatedness,
}

impl CheckKind {
    /// Every check, for listings.
    pub fn all() -> &'static [CheckKind] {
        &[
            CheckKind::Q30,
            CheckKind::Contamination,
            CheckKind::NtcContamination,
            CheckKind::Tso500NtcContamination,
            CheckKind::Tso500OnTargetReads,
            CheckKind::SexMatch,
            CheckKind::VariantCount,
            CheckKind::Sensitivity,
            CheckKind::Coverage20x,
            CheckKind::Titv,
            CheckKind::Fastqc,
            CheckKind::FusionContamination,
            CheckKind::FusionAlignedReads,
            CheckKind::Relatedness,
        ]
    }

    /// The configuration name of the check.
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Q30 => "q30",
            CheckKind::Contamination => "contamination",
            CheckKind::NtcContamination => "ntc_contamination",
            CheckKind::Tso500NtcContamination => "tso500_ntc_contamination",
            CheckKind::Tso500OnTargetReads => "tso500_on_target_reads",
            CheckKind::SexMatch => "sex_match",
            CheckKind::VariantCount => "variant_count",
            CheckKind::Sensitivity => "sensitivity",
            CheckKind::Coverage20x => "coverage_20x",
            CheckKind::Titv => "titv",
            CheckKind::Fastqc => "fastqc",
            CheckKind::FusionContamination => "fusion_contamination",
            CheckKind::FusionAlignedReads => "fusion_aligned_reads",
            CheckKind::Relatedness => "relatedness",
        }
    }

    /// A one-line description, for listings.
    pub fn description(&self) -> &'static str {
        match self {
            CheckKind::Q30 => "Percent of bases at Q30 or above on every read and lane",
            CheckKind::Contamination => "VerifyBamID freemix estimate per sample",
            CheckKind::NtcContamination => "NTC read count scaled by cutoff against sample reads",
            CheckKind::Tso500NtcContamination => "NTC contamination percentage per sample",
            CheckKind::Tso500OnTargetReads => "Minimum on-target read count per sample",
            CheckKind::SexMatch => "Declared sex against calculated sex",
            CheckKind::VariantCount => "Passing variant count within configured bounds",
            CheckKind::Sensitivity => "Lower confidence bound of run sensitivity",
            CheckKind::Coverage20x => "Percent of bases covered at 20x",
            CheckKind::Titv => "Transition/transversion ratio within configured bounds",
            CheckKind::Fastqc => "Critical FastQC module statuses per fastq",
            CheckKind::FusionContamination => "Fusion pipeline contamination flags",
            CheckKind::FusionAlignedReads => "Minimum uniquely aligned reads for fusion calling",
            CheckKind::Relatedness => "Pedigree versus genotype relatedness verdict",
        }
    }
}

impl std::str::FromStr for CheckKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for check in CheckKind::all() {
            if check.name() == s {
                return Ok(*check);
            }
        }

        bail!("unknown auto QC check: {}", s)
    }
}

/// A threshold a configured check needs. Absence is a configuration error.
fn require<T: Copy>(value: Option<T>, check: CheckKind, field: &str) -> anyhow::Result<T> {
    value.with_context(|| {
        format!(
            "check '{}' is configured but threshold '{}' is not set",
            check.name(),
            field
        )
    })
}

/// Everything one evaluation reads: the run analysis, its sample analyses,
/// and the store holding the persisted metric records.
struct CheckContext<'a> {
    store: &'a Store,
    run_analysis: &'a RunAnalysis,
    samples: Vec<&'a SampleAnalysis>,
}

impl<'a> CheckContext<'a> {
    fn run_owner(&self) -> MetricOwner {
        MetricOwner::Run(self.run_analysis.key.clone())
    }

    fn real_samples(&self) -> impl Iterator<Item = &&'a SampleAnalysis> {
        self.samples.iter().filter(|sa| !sa.is_ntc())
    }

    fn ntc_samples(&self) -> impl Iterator<Item = &&'a SampleAnalysis> {
        self.samples.iter().filter(|sa| sa.is_ntc())
    }

    fn sample_metric(&self, kind: MetricKind, sa: &SampleAnalysis) -> Option<&MetricRecord> {
        self.store
            .metric(kind, &MetricOwner::Sample(sa.key.clone()), "")
    }

    /// Total reads for a sample, from the PAIR row of its alignment summary.
    fn total_reads(&self, sa: &SampleAnalysis) -> Option<u64> {
        let record = self
            .store
            .metric(MetricKind::AlignmentMetrics, &MetricOwner::Sample(sa.key.clone()), "PAIR")?;
        metric_as_u64(record.value("total_reads"))
    }
}

/// Evaluates the configured auto-QC checks for one run analysis.
///
/// Ordering: no configured checks fails immediately; an incomplete or invalid
/// run fails immediately with that one reason; otherwise every configured
/// check runs and the de-duplicated union of their failure reasons decides
/// the verdict. The verdict is `true` iff the reasons list is empty.
pub fn passes_auto_qc(
    store: &Store,
    key: &RunAnalysisKey,
) -> anyhow::Result<(bool, Vec<String>)> {
    let run_analysis = store
        .run_analysis(key)
        .with_context(|| format!("no run analysis for {}", key))?;

    let checks = run_analysis.check_names();
    if checks.is_empty() {
        return Ok((
            false,
            vec![String::from("No auto QC configuration for this pipeline and analysis type")],
        ));
    }

    if !run_analysis.results_completed {
        return Ok((false, vec![String::from("Run results not completed")]));
    }

    if !run_analysis.results_valid {
        return Ok((false, vec![String::from("Run results not valid")]));
    }

    let context = CheckContext {
        store,
        run_analysis,
        samples: store.sample_analyses_for(key),
    };

    let mut reasons = Vec::new();
    for name in &checks {
        let check: CheckKind = name.parse()?;
        evaluate_check(check, &context, &mut reasons)?;
    }

    let reasons: Vec<String> = reasons.into_iter().unique().collect();
    Ok((reasons.is_empty(), reasons))
}

fn evaluate_check(
    check: CheckKind,
    context: &CheckContext<'_>,
    reasons: &mut Vec<String>,
) -> anyhow::Result<()> {
    match check {
        CheckKind::Q30 => q30(context, reasons),
        CheckKind::Contamination => contamination(context, reasons),
        CheckKind::NtcContamination => ntc_contamination(context, reasons),
        CheckKind::Tso500NtcContamination => tso500_ntc_contamination(context, reasons),
        CheckKind::Tso500OnTargetReads => tso500_on_target_reads(context, reasons),
        CheckKind::SexMatch => sex_match(context, reasons),
        CheckKind::VariantCount => variant_count(context, reasons),
        CheckKind::Sensitivity => sensitivity(context, reasons),
        CheckKind::Coverage20x => coverage_20x(context, reasons),
        CheckKind::Titv => titv(context, reasons),
        CheckKind::Fastqc => fastqc(context, reasons),
        CheckKind::FusionContamination => fusion_contamination(context, reasons),
        CheckKind::FusionAlignedReads => fusion_aligned_reads(context, reasons),
        CheckKind::Relatedness => relatedness(context, reasons),
    }
}

fn q30(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    let min = require(
        context.run_analysis.thresholds.min_q30_score,
        CheckKind::Q30,
        "min_q30_score",
    )?;

    let rows = context
        .store
        .metrics_of_kind(MetricKind::InteropRunQuality, &context.run_owner());
    if rows.is_empty() {
        reasons.push(String::from("Q30 Fail: no run quality data"));
        return Ok(());
    }

    for row in rows {
        let q30 = metric_as_f64(row.value("percent_q30"));
        if q30.map(|v| v < min * 100.0).unwrap_or(true) {
            let read = row.value("read").cloned().unwrap_or_default();
            let lane = row.value("lane").cloned().unwrap_or_default();
            reasons.push(format!("Q30 Fail: read {} lane {}", read, lane));
        }
    }

    Ok(())
}

fn contamination(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    for sa in context.real_samples() {
        let cutoff = require(
            sa.contamination_cutoff,
            CheckKind::Contamination,
            "contamination_cutoff",
        )?;

        let freemix = context
            .sample_metric(MetricKind::ContaminationMetrics, sa)
            .and_then(|record| metric_as_f64(record.value("freemix")));

        match freemix {
            Some(freemix) if freemix <= cutoff => {}
            _ => reasons.push(format!("Contamination Fail: {}", sa.key.sample_id)),
        }
    }

    Ok(())
}

/// The legacy ratio test: an NTC's reads scaled by the cutoff must not
/// exceed the sample's reads. This inequality is inverted relative to the
/// TSO500 percentage test and is kept exactly as configured runs expect it.
fn ntc_contamination(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    let ntcs: Vec<_> = context.ntc_samples().collect();

    for sa in context.real_samples() {
        let cutoff = require(
            sa.ntc_contamination_cutoff,
            CheckKind::NtcContamination,
            "ntc_contamination_cutoff",
        )?;

        let total_reads = match context.total_reads(sa) {
            Some(reads) => reads,
            None => {
                reasons.push(format!("NTC Contamination Fail: {}", sa.key.sample_id));
                continue;
            }
        };

        for ntc in &ntcs {
            let ntc_reads = match context.total_reads(ntc) {
                Some(reads) => reads,
                None => {
                    reasons.push(format!("NTC Contamination Fail: {}", sa.key.sample_id));
                    continue;
                }
            };

            if ntc_reads as f64 * cutoff > total_reads as f64 {
                reasons.push(format!("NTC Contamination Fail: {}", sa.key.sample_id));
            }
        }
    }

    Ok(())
}

fn tso500_ntc_contamination(
    context: &CheckContext<'_>,
    reasons: &mut Vec<String>,
) -> anyhow::Result<()> {
    let max = require(
        context.run_analysis.thresholds.max_ntc_contamination,
        CheckKind::Tso500NtcContamination,
        "max_ntc_contamination",
    )?;

    for sa in context.real_samples() {
        let record = match context.sample_metric(MetricKind::Tso500Reads, sa) {
            Some(record) => record,
            None => {
                reasons.push(format!("NTC Contamination Fail: {}", sa.key.sample_id));
                continue;
            }
        };

        for key in ["ntc_contamination_mapped_pct", "ntc_contamination_on_target_pct"] {
            if let Some(pct) = metric_as_f64(record.value(key)) {
                if pct > max {
                    reasons.push(format!("NTC Contamination Fail: {}", sa.key.sample_id));
                }
            }
        }
    }

    Ok(())
}

fn tso500_on_target_reads(
    context: &CheckContext<'_>,
    reasons: &mut Vec<String>,
) -> anyhow::Result<()> {
    let min = require(
        context.run_analysis.thresholds.min_on_target_reads,
        CheckKind::Tso500OnTargetReads,
        "min_on_target_reads",
    )?;

    for sa in context.real_samples() {
        let on_target = context
            .sample_metric(MetricKind::Tso500Reads, sa)
            .and_then(|record| metric_as_u64(record.value("on_target_reads")));

        match on_target {
            Some(on_target) if on_target >= min => {}
            _ => reasons.push(format!("On Target Reads Fail: {}", sa.key.sample_id)),
        }
    }

    Ok(())
}

fn sex_match(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    for sa in context.real_samples() {
        let declared = match &sa.sex {
            Some(declared) => declared.to_lowercase(),
            None => continue,
        };

        let calculated = context
            .sample_metric(MetricKind::QcMetrics, sa)
            .and_then(|record| record.value("calculated_sex").cloned())
            .or_else(|| {
                context
                    .sample_metric(MetricKind::DragenPloidyMetrics, sa)
                    .and_then(|record| record.value("predicted_sex_chromosome_ploidy").cloned())
                    .map(|karyotype| match karyotype.as_str() {
                        "XX" => String::from("female"),
                        "XY" => String::from("male"),
                        _ => String::from("unknown"),
                    })
            });

        match calculated.map(|c| c.to_lowercase()) {
            // An unknown calculated sex always fails, even if the sample was
            // booked as unknown.
            Some(calculated) if calculated == "unknown" => {
                reasons.push(format!("Sex Match Fail: {}", sa.key.sample_id))
            }
            Some(calculated) if calculated == declared => {}
            _ => reasons.push(format!("Sex Match Fail: {}", sa.key.sample_id)),
        }
    }

    Ok(())
}

fn variant_count(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    let min = require(
        context.run_analysis.thresholds.min_variants,
        CheckKind::VariantCount,
        "min_variants",
    )?;
    let max = require(
        context.run_analysis.thresholds.max_variants,
        CheckKind::VariantCount,
        "max_variants",
    )?;

    for sa in context.real_samples() {
        let count = context
            .sample_metric(MetricKind::VariantCount, sa)
            .and_then(|record| metric_as_u64(record.value("passing_variants")));

        match count {
            Some(count) if count >= min && count <= max => {}
            _ => reasons.push(format!("Variant Count Fail: {}", sa.key.sample_id)),
        }
    }

    Ok(())
}

fn sensitivity(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    let min = require(
        context.run_analysis.thresholds.min_sensitivity,
        CheckKind::Sensitivity,
        "min_sensitivity",
    )?;

    let lower_ci = context
        .store
        .metric(MetricKind::Sensitivity, &context.run_owner(), "")
        .and_then(|record| metric_as_f64(record.value("sensitivity_lower_ci")));

    match lower_ci {
        Some(lower_ci) if lower_ci > min => {}
        _ => reasons.push(String::from("Sensitivity Fail")),
    }

    Ok(())
}

fn coverage_20x(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    let min = require(
        context.run_analysis.thresholds.min_coverage,
        CheckKind::Coverage20x,
        "min_coverage",
    )?;

    for sa in context.real_samples() {
        let coverage = context
            .sample_metric(MetricKind::DepthOfCoverage, sa)
            .and_then(|record| metric_as_f64(record.value("pct_bases_above_20")));

        match coverage {
            Some(coverage) if coverage >= min => {}
            _ => reasons.push(format!("Coverage Fail: {}", sa.key.sample_id)),
        }
    }

    Ok(())
}

fn titv(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    let min = require(context.run_analysis.thresholds.min_titv, CheckKind::Titv, "min_titv")?;
    let max = require(context.run_analysis.thresholds.max_titv, CheckKind::Titv, "max_titv")?;

    for sa in context.real_samples() {
        let titv = context
            .sample_metric(MetricKind::VariantCallingMetrics, sa)
            .and_then(|record| metric_as_f64(record.value("dbsnp_titv")));

        match titv {
            Some(titv) if titv >= min && titv <= max => {}
            _ => reasons.push(format!("Titv Fail: {}", sa.key.sample_id)),
        }
    }

    Ok(())
}

fn fastqc(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    for sa in context.real_samples() {
        let records = context.store.metrics_of_kind(
            MetricKind::Fastqc,
            &MetricOwner::Sample(sa.key.clone()),
        );

        if records.is_empty() {
            reasons.push(format!("FastQC Fail: {}", sa.key.sample_id));
            continue;
        }

        for record in records {
            // A critical module that is absent from the summary reads as
            // FAIL; the non-critical modules never fail the check.
            let failed = FASTQC_CRITICAL_MODULES.iter().any(|module| {
                record
                    .value(module)
                    .map(|status| status == "FAIL")
                    .unwrap_or(true)
            });

            if failed {
                reasons.push(format!(
                    "FastQC Fail: {} {}",
                    sa.key.sample_id, record.instance
                ));
            }
        }
    }

    Ok(())
}

fn fusion_contamination(
    context: &CheckContext<'_>,
    reasons: &mut Vec<String>,
) -> anyhow::Result<()> {
    for sa in context.real_samples() {
        let record = match context.sample_metric(MetricKind::FusionContamination, sa) {
            Some(record) => record,
            None => {
                reasons.push(format!("Fusion Contamination Fail: {}", sa.key.sample_id));
                continue;
            }
        };

        if record.value("contamination").map(String::as_str) != Some("false") {
            reasons.push(format!("Fusion Contamination Fail: {}", sa.key.sample_id));
        }

        if record.value("contamination_referral").map(String::as_str) != Some("false") {
            reasons.push(format!(
                "Fusion Contamination Referral Fail: {}",
                sa.key.sample_id
            ));
        }
    }

    Ok(())
}

fn fusion_aligned_reads(
    context: &CheckContext<'_>,
    reasons: &mut Vec<String>,
) -> anyhow::Result<()> {
    let min = require(
        context.run_analysis.thresholds.min_fusion_aligned_reads_unique,
        CheckKind::FusionAlignedReads,
        "min_fusion_aligned_reads_unique",
    )?;

    for sa in context.real_samples() {
        let unique = context
            .sample_metric(MetricKind::FusionAlignment, sa)
            .and_then(|record| metric_as_u64(record.value("unique_reads_aligned")));

        match unique {
            Some(unique) if unique >= min => {}
            _ => reasons.push(format!("Fusion Aligned Reads Fail: {}", sa.key.sample_id)),
        }
    }

    Ok(())
}

fn relatedness(context: &CheckContext<'_>, reasons: &mut Vec<String>) -> anyhow::Result<()> {
    let record = context
        .store
        .metric(MetricKind::RelatednessVerdict, &context.run_owner(), "");

    let record = match record {
        Some(record) => record,
        None => {
            reasons.push(String::from("Relatedness Fail: no relatedness verdict"));
            return Ok(());
        }
    };

    if record.value("passed").map(String::as_str) == Some("true") {
        return Ok(());
    }

    match record.value("reasons") {
        Some(stored) => reasons.extend(stored.split("; ").map(String::from)),
        None => reasons.push(String::from("Relatedness Fail")),
    }

    Ok(())
}
