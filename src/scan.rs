//! The batch scan job: walk a raw-data root, decide completion and validity
//! for every configured run analysis, and ingest metric records.
//!
//! The scan is best-effort over runs: one unparsable sample sheet or missing
//! `RunInfo.xml` logs a warning and skips that run, never the batch. Repeated
//! scans are idempotent — the completion and validity flags only move
//! false→true, and metric records are only inserted where none exist — so a
//! crashed scan is simply re-run. The store is saved after every run so a
//! crash loses at most the run being processed.

pub mod command;

use std::path::Path;

use anyhow::Context;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::AnalysisConfig;
use crate::config::Config;
use crate::model::MetricKind;
use crate::model::MetricOwner;
use crate::model::MetricRecord;
use crate::model::Run;
use crate::model::RunAnalysisKey;
use crate::model::Sample;
use crate::model::SampleAnalysisKey;
use crate::monitors;
use crate::monitors::demultiplex::DemultiplexChecker;
use crate::monitors::demultiplex::DemultiplexFlavor;
use crate::monitors::Dialect;
use crate::monitors::Harvested;
use crate::parsers::interop;
use crate::relatedness::check_relatedness;
use crate::relatedness::RelatednessBounds;
use crate::runinfo::parse_run_info;
use crate::runinfo::RunInfo;
use crate::samplesheet;
use crate::samplesheet::PipelineInfo;
use crate::samplesheet::SampleSheet;
use crate::samplesheet::SampleSheetRow;
use crate::store::Inserted;
use crate::store::Store;
use crate::utils::display::RecordCounter;

/// What one scan pass did.
#[derive(Debug, Default)]
pub struct ScanSummary {
    /// Run directories seen under the raw-data root.
    pub runs_seen: usize,

    /// Runs skipped because their metadata could not be read.
    pub runs_skipped: usize,

    /// Run analyses evaluated.
    pub analyses_evaluated: usize,

    /// Metric records inserted (re-observed records are not counted).
    pub metrics_inserted: usize,
}

/// One pipeline/analysis-type group of sample sheet rows.
struct AnalysisGroup {
    pipeline: String,
    analysis_type: String,
    rows: Vec<(SampleSheetRow, PipelineInfo)>,
}

/// Scans every run directory under `raw_dir` and updates the store.
pub fn scan_runs(raw_dir: &Path, config: &Config, store: &mut Store) -> anyhow::Result<ScanSummary> {
    let mut summary = ScanSummary::default();

    let mut run_dirs: Vec<_> = std::fs::read_dir(raw_dir)
        .with_context(|| format!("reading raw data root {}", raw_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    run_dirs.sort();

    let mut counter = RecordCounter::new(Some(1_000));

    for run_dir in run_dirs {
        summary.runs_seen += 1;

        if let Err(e) = scan_run(&run_dir, config, store, &mut summary, &mut counter) {
            warn!("skipping run {}: {:#}", run_dir.display(), e);
            summary.runs_skipped += 1;
            continue;
        }

        store.save()?;
    }

    summary.metrics_inserted = counter.get();
    Ok(summary)
}

/// Groups a sheet's rows by the pipeline/analysis-type combination named in
/// their `Description` fields. A malformed description on a non-NIPT row
/// fails the run; NIPT rows are skipped.
fn group_rows(sheet: &SampleSheet) -> anyhow::Result<Vec<AnalysisGroup>> {
    let mut groups: Vec<AnalysisGroup> = Vec::new();

    for row in &sheet.rows {
        if samplesheet::is_nipt(&row.description) {
            debug!("skipping NIPT sample {}", row.sample_id);
            continue;
        }

        let info = samplesheet::parse_description(&row.description)
            .with_context(|| format!("sample {}", row.sample_id))?;

        let pipeline = info.pipeline_id();
        let analysis_type = info.panel.clone();

        match groups
            .iter_mut()
            .find(|g| g.pipeline == pipeline && g.analysis_type == analysis_type)
        {
            Some(group) => group.rows.push((row.clone(), info)),
            None => groups.push(AnalysisGroup {
                pipeline,
                analysis_type,
                rows: vec![(row.clone(), info)],
            }),
        }
    }

    Ok(groups)
}

fn scan_run(
    run_dir: &Path,
    config: &Config,
    store: &mut Store,
    summary: &mut ScanSummary,
    counter: &mut RecordCounter,
) -> anyhow::Result<()> {
    let run_id = run_dir
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("run directory {} has no UTF-8 name", run_dir.display()))?
        .to_string();

    let run_info = parse_run_info(run_dir)?;
    let sheet = SampleSheet::parse_dir(run_dir)?;
    let groups = group_rows(&sheet)?;

    store.get_or_create_run(Run {
        run_id: run_id.clone(),
        instrument: run_info.instrument.clone(),
        flowcell: run_info.flowcell.clone(),
        lanes: run_info.lane_count,
        reads: run_info.reads.clone(),
    });

    for group in groups {
        let analysis_config = match config.analysis(&group.pipeline, &group.analysis_type) {
            Some(analysis_config) => analysis_config,
            None => {
                warn!(
                    "no configuration for {}-{}; skipping",
                    group.pipeline, group.analysis_type
                );
                continue;
            }
        };

        if let Err(e) = scan_analysis(
            &run_id,
            run_dir,
            &run_info,
            &group,
            config,
            analysis_config,
            store,
            counter,
        ) {
            warn!(
                "skipping analysis {}-{} on {}: {:#}",
                group.pipeline, group.analysis_type, run_id, e
            );
            continue;
        }

        summary.analyses_evaluated += 1;
    }

    Ok(())
}

fn insert_harvested(
    store: &mut Store,
    counter: &mut RecordCounter,
    key: &RunAnalysisKey,
    sample_keys: &[SampleAnalysisKey],
    harvested: Vec<Harvested>,
) {
    for record in harvested {
        let owner = match &record.sample_id {
            Some(sample_id) => {
                match sample_keys.iter().find(|sak| &sak.sample_id == sample_id) {
                    Some(sak) => MetricOwner::Sample(sak.clone()),
                    None => {
                        warn!(
                            "metric {:?} names unknown sample {}; skipping",
                            record.kind, sample_id
                        );
                        continue;
                    }
                }
            }
            None => MetricOwner::Run(key.clone()),
        };

        let inserted = store.insert_metric_if_absent(MetricRecord {
            kind: record.kind,
            owner,
            instance: record.instance,
            values: record.values,
        });

        if inserted == Inserted::Created {
            counter.inc();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn scan_analysis(
    run_id: &str,
    run_dir: &Path,
    run_info: &RunInfo,
    group: &AnalysisGroup,
    config: &Config,
    analysis_config: &AnalysisConfig,
    store: &mut Store,
    counter: &mut RecordCounter,
) -> anyhow::Result<()> {
    let dialect: Dialect = analysis_config.dialect.parse()?;

    let key = RunAnalysisKey {
        run_id: run_id.to_string(),
        pipeline: group.pipeline.clone(),
        analysis_type: group.analysis_type.clone(),
    };

    // Capture the configured check list and thresholds on the analysis so
    // the evaluator reads one consistent snapshot.
    {
        let ra = store.get_or_create_run_analysis(&key);
        ra.auto_qc_checks = analysis_config.qc_checks.as_ref().map(|c| c.join(","));
        ra.thresholds = analysis_config.thresholds.clone();
    }

    let mut sample_keys = Vec::with_capacity(group.rows.len());
    for (row, info) in &group.rows {
        store.get_or_create_sample(Sample {
            sample_id: row.sample_id.clone(),
        });

        let sak = SampleAnalysisKey {
            run_analysis: key.clone(),
            sample_id: row.sample_id.clone(),
            worksheet: row.worksheet.clone().unwrap_or_default(),
        };

        let sa = store.get_or_create_sample_analysis(&sak);
        sa.sex = info.sex.clone();
        sa.contamination_cutoff = analysis_config.contamination_cutoff;
        sa.ntc_contamination_cutoff = analysis_config.ntc_contamination_cutoff;

        sample_keys.push(sak);
    }

    // Demultiplexing first: sequencing read numbers as they appear in fastq
    // filenames.
    let read_numbers: Vec<u32> = run_info
        .reads
        .iter()
        .filter(|read| !read.is_indexed)
        .enumerate()
        .map(|(index, _)| index as u32 + 1)
        .collect();

    let flavor = match dialect {
        Dialect::DragenGe | Dialect::DragenWgs => DemultiplexFlavor::Dragen,
        _ => DemultiplexFlavor::Illumina,
    };

    let checker = DemultiplexChecker::new(
        flavor,
        run_dir,
        group.rows.iter().map(|(row, _)| row.sample_id.clone()).collect(),
        run_info.lane_count,
        read_numbers,
        config.fastq_min_size(),
    );

    let demultiplexing_completed = checker.is_complete()?;
    let demultiplexing_valid = checker.is_valid()?;

    // Then the results tree.
    let sub_sheet = SampleSheet {
        rows: group.rows.iter().map(|(row, _)| row.clone()).collect(),
    };

    let monitor = monitors::build_monitor(
        dialect,
        run_id,
        analysis_config.results_dir_for(run_id),
        &sub_sheet,
        analysis_config,
    )?;

    let results_completed = monitor.run_and_samples_complete()?;
    let results_valid = monitor.run_and_samples_valid()?;

    store.raise_run_flags(
        &key,
        demultiplexing_completed,
        demultiplexing_valid,
        results_completed,
        results_valid,
    );

    for sak in &sample_keys {
        let sample_completed = monitor.sample_is_complete(&sak.sample_id)?;
        let sample_valid = monitor.sample_is_valid(&sak.sample_id)?;
        store.raise_sample_flags(sak, sample_completed, sample_valid);

        if sample_completed && sample_valid {
            let harvested = monitor.harvest_sample(&sak.sample_id)?;
            insert_harvested(store, counter, &key, &sample_keys, harvested);
        }
    }

    if results_completed && results_valid {
        let harvested = monitor.harvest_run()?;
        insert_harvested(store, counter, &key, &sample_keys, harvested);

        ingest_relatedness(store, counter, &key, analysis_config, monitor.as_ref())?;
    }

    ingest_run_quality(store, counter, &key, run_dir, run_info, analysis_config)?;

    info!(
        "{}: demultiplexing {}/{}, results {}/{}",
        key,
        if demultiplexing_completed { "complete" } else { "pending" },
        if demultiplexing_valid { "valid" } else { "pending" },
        if results_completed { "complete" } else { "pending" },
        if results_valid { "valid" } else { "pending" },
    );

    Ok(())
}

/// Runs the relatedness engine once its input files exist and stores the
/// verdict as a run-level record.
fn ingest_relatedness(
    store: &mut Store,
    counter: &mut RecordCounter,
    key: &RunAnalysisKey,
    analysis_config: &AnalysisConfig,
    monitor: &dyn monitors::PipelineMonitor,
) -> anyhow::Result<()> {
    let configured = analysis_config
        .qc_checks
        .as_ref()
        .map(|checks| checks.iter().any(|c| c == "relatedness"))
        .unwrap_or(false);
    if !configured {
        return Ok(());
    }

    let (ped, matrix) = match monitor.relatedness_inputs()? {
        Some(paths) => paths,
        None => {
            debug!("{}: relatedness inputs not present yet", key);
            return Ok(());
        }
    };

    let thresholds = &analysis_config.thresholds;
    let bounds = match (
        thresholds.min_relatedness_parents,
        thresholds.max_child_parent_relatedness,
        thresholds.max_relatedness_unrelated,
        thresholds.max_relatedness_between_parents,
    ) {
        (Some(min_parents), Some(max_parents), Some(max_unrelated), Some(max_between)) => {
            RelatednessBounds {
                min_relatedness_parents: min_parents,
                max_child_parent_relatedness: max_parents,
                max_relatedness_unrelated: max_unrelated,
                max_relatedness_between_parents: max_between,
            }
        }
        _ => {
            warn!("{}: relatedness bounds are not fully configured", key);
            return Ok(());
        }
    };

    let (passed, reasons) = check_relatedness(ped, matrix, &bounds);

    let mut values = indexmap::IndexMap::new();
    values.insert(String::from("passed"), Some(passed.to_string()));
    values.insert(String::from("reasons"), Some(reasons.join("; ")));

    let inserted = store.insert_metric_if_absent(MetricRecord {
        kind: MetricKind::RelatednessVerdict,
        owner: MetricOwner::Run(key.clone()),
        instance: String::new(),
        values,
    });

    if inserted == Inserted::Created {
        counter.inc();
    }

    Ok(())
}

/// Reads the interop summary for the run and stores one record per
/// (read, lane) pair. Runs without interop data are tolerated.
fn ingest_run_quality(
    store: &mut Store,
    counter: &mut RecordCounter,
    key: &RunAnalysisKey,
    run_dir: &Path,
    run_info: &RunInfo,
    analysis_config: &AnalysisConfig,
) -> anyhow::Result<()> {
    let configured = analysis_config
        .qc_checks
        .as_ref()
        .map(|checks| checks.iter().any(|c| c == "q30"))
        .unwrap_or(false);
    if !configured {
        return Ok(());
    }

    let geometry: Vec<interop::ReadGeometry> = run_info
        .reads
        .iter()
        .map(|read| interop::ReadGeometry {
            number: read.number,
            num_cycles: read.num_cycles,
            is_indexed: read.is_indexed,
        })
        .collect();

    let rows = match interop::parse_interop_summary(run_dir, &geometry, run_info.lane_count) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("{}: no interop summary: {:#}", key, e);
            return Ok(());
        }
    };

    for row in rows {
        let inserted = store.insert_metric_if_absent(MetricRecord {
            kind: MetricKind::InteropRunQuality,
            owner: MetricOwner::Run(key.clone()),
            instance: format!("read{}_lane{}", row.read, row.lane),
            values: row.as_map(),
        });

        if inserted == Inserted::Created {
            counter.inc();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {

    use std::fs;
    use std::path::PathBuf;

    use super::*;

    static RUN_INFO: &str = r#"<?xml version="1.0"?>
<RunInfo Version="2">
  <Run Id="200110_M00001_0001_000000000-AAAAA" Number="1">
    <Flowcell>000000000-AAAAA</Flowcell>
    <Instrument>M00001</Instrument>
    <Reads>
      <Read Number="1" NumCycles="151" IsIndexedRead="N" />
      <Read Number="2" NumCycles="8" IsIndexedRead="Y" />
      <Read Number="3" NumCycles="151" IsIndexedRead="N" />
    </Reads>
    <FlowcellLayout LaneCount="1" SurfaceCount="2" SwathCount="1" TileCount="19" />
  </Run>
</RunInfo>
"#;

    static SHEET: &str = "\
[Data],,,,,
Sample_ID,Sample_Name,Sample_Plate,index,Sample_Project,Description
S1,S1,WS001,ATCACG,,pipelineName=TestPipeline;pipelineVersion=1.0.0;panel=TestPanel;sex=female
NTC-1,NTC-1,WS001,CGATGT,,pipelineName=TestPipeline;pipelineVersion=1.0.0;panel=TestPanel
";

    fn config_yaml(results_dir: &Path, state_file: &Path) -> Config {
        let yaml = format!(
            "\
state_file: {}
fastq_min_size: 10
analyses:
  TestPipeline-1.0.0-TestPanel:
    dialect: germline_enrichment
    results_dir: {}/{{run}}
    qc_checks: [fastqc]
    sample_completed_files: ['1_Pipeline.sh.e*']
    sample_expected_files: ['{{sample}}_QC.txt']
    sample_not_expected_files: ['*.temp']
    run_completed_files: ['2_Pipeline.sh.e*']
    run_expected_files: []
    run_not_expected_files: ['*.temp']
",
            state_file.display(),
            results_dir.display(),
        );

        serde_yaml::from_str(&yaml).unwrap()
    }

    fn seed_raw_run(raw_dir: &Path, run_id: &str) -> PathBuf {
        let run_dir = raw_dir.join(run_id);
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("RunInfo.xml"), RUN_INFO).unwrap();
        fs::write(run_dir.join("SampleSheet.csv"), SHEET).unwrap();
        fs::write(run_dir.join("RTAComplete.txt"), "").unwrap();

        let fastq_dir = run_dir.join("Data/Intensities/BaseCalls");
        fs::create_dir_all(&fastq_dir).unwrap();
        for name in [
            "S1_S1_L001_R1_001.fastq.gz",
            "S1_S1_L001_R2_001.fastq.gz",
            "NTC-1_S2_L001_R1_001.fastq.gz",
            "NTC-1_S2_L001_R2_001.fastq.gz",
        ] {
            fs::write(fastq_dir.join(name), vec![b'@'; 64]).unwrap();
        }

        run_dir
    }

    fn seed_results(results_dir: &Path, run_id: &str) {
        for sample in ["S1", "NTC-1"] {
            let dir = results_dir.join(run_id).join(sample);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("1_Pipeline.sh.e100"), "").unwrap();
            fs::write(
                dir.join(format!("{}_QC.txt", sample)),
                "sample\tcalculated_sex\nx\tfemale\n",
            )
            .unwrap();
        }

        fs::write(results_dir.join(run_id).join("2_Pipeline.sh.e200"), "").unwrap();
    }

    #[test]
    pub fn test_scan_creates_entities_and_raises_flags() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let results = dir.path().join("results");
        let state = dir.path().join("state.json");

        seed_raw_run(&raw, "run1");
        seed_results(&results, "run1");

        let config = config_yaml(&results, &state);
        let mut store = Store::load_or_new(&state).unwrap();

        let summary = scan_runs(&raw, &config, &mut store).unwrap();
        assert_eq!(summary.runs_seen, 1);
        assert_eq!(summary.runs_skipped, 0);
        assert_eq!(summary.analyses_evaluated, 1);

        let key = RunAnalysisKey {
            run_id: String::from("run1"),
            pipeline: String::from("TestPipeline-1.0.0"),
            analysis_type: String::from("TestPanel"),
        };
        let ra = store.run_analysis(&key).unwrap();
        assert!(ra.demultiplexing_completed);
        assert!(ra.demultiplexing_valid);
        assert!(ra.results_completed);
        assert!(ra.results_valid);
        assert_eq!(ra.auto_qc_checks.as_deref(), Some("fastqc"));

        let samples = store.sample_analyses_for(&key);
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|sa| sa.results_completed && sa.results_valid));
        assert_eq!(samples[0].sex.as_deref(), Some("female"));

        // QC metrics were harvested for both samples.
        let qc = store.metric(
            MetricKind::QcMetrics,
            &MetricOwner::Sample(samples[0].key.clone()),
            "",
        );
        assert!(qc.is_some());
    }

    #[test]
    pub fn test_rescan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let results = dir.path().join("results");
        let state = dir.path().join("state.json");

        seed_raw_run(&raw, "run1");
        seed_results(&results, "run1");

        let config = config_yaml(&results, &state);
        let mut store = Store::load_or_new(&state).unwrap();

        let first = scan_runs(&raw, &config, &mut store).unwrap();
        assert!(first.metrics_inserted > 0);
        let metric_count = store.state().metrics.len();

        let second = scan_runs(&raw, &config, &mut store).unwrap();
        assert_eq!(second.metrics_inserted, 0);
        assert_eq!(store.state().metrics.len(), metric_count);
    }

    #[test]
    pub fn test_unreadable_run_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let results = dir.path().join("results");
        let state = dir.path().join("state.json");

        // One good run, one directory with no metadata at all.
        seed_raw_run(&raw, "run2");
        seed_results(&results, "run2");
        fs::create_dir_all(raw.join("run1_broken")).unwrap();

        let config = config_yaml(&results, &state);
        let mut store = Store::load_or_new(&state).unwrap();

        let summary = scan_runs(&raw, &config, &mut store).unwrap();
        assert_eq!(summary.runs_seen, 2);
        assert_eq!(summary.runs_skipped, 1);
        assert_eq!(summary.analyses_evaluated, 1);
    }

    #[test]
    pub fn test_incomplete_results_do_not_harvest() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let results = dir.path().join("results");
        let state = dir.path().join("state.json");

        seed_raw_run(&raw, "run1");
        // Results directory exists but has no completion markers or files.
        fs::create_dir_all(results.join("run1")).unwrap();

        let config = config_yaml(&results, &state);
        let mut store = Store::load_or_new(&state).unwrap();

        let summary = scan_runs(&raw, &config, &mut store).unwrap();
        assert_eq!(summary.metrics_inserted, 0);

        let key = RunAnalysisKey {
            run_id: String::from("run1"),
            pipeline: String::from("TestPipeline-1.0.0"),
            analysis_type: String::from("TestPanel"),
        };
        let ra = store.run_analysis(&key).unwrap();
        assert!(ra.demultiplexing_completed);
        assert!(!ra.results_completed);
        assert!(!ra.results_valid);
    }
}
