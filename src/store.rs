//! The persistence collaborator: a JSON-file-backed store with get-or-create
//! semantics for entities and insert-if-absent semantics for metric records.
//!
//! The write policy is what makes scans idempotent and safe under partial
//! failure: a metric record is only inserted when none exists for its
//! `(kind, owner, instance)` key, and the completion/validity flags only move
//! false→true. At worst a crashed scan re-parses a file and the second write
//! is a no-op. Saves go through a temp-file rename so a crash mid-save never
//! truncates the state.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::model::MetricKind;
use crate::model::MetricOwner;
use crate::model::MetricRecord;
use crate::model::Run;
use crate::model::RunAnalysis;
use crate::model::RunAnalysisKey;
use crate::model::Sample;
use crate::model::SampleAnalysis;
use crate::model::SampleAnalysisKey;

/// Result of an insert-if-absent write.
#[derive(Debug, PartialEq, Eq)]
pub enum Inserted {
    /// A new record was created.
    Created,

    /// A record already existed for the key; nothing was written.
    AlreadyPresent,
}

/// Everything the store persists.
#[derive(Default, Serialize, Deserialize)]
pub struct State {
    /// Runs by id.
    pub runs: indexmap::IndexMap<String, Run>,

    /// Samples by id.
    pub samples: indexmap::IndexMap<String, Sample>,

    /// Run analyses.
    pub run_analyses: Vec<RunAnalysis>,

    /// Sample analyses.
    pub sample_analyses: Vec<SampleAnalysis>,

    /// Metric records.
    pub metrics: Vec<MetricRecord>,
}

/// A JSON-file-backed store.
pub struct Store {
    path: PathBuf,
    state: State,
}

impl Store {
    /// Loads the store from `path`, or starts empty if the file does not
    /// exist yet.
    pub fn load_or_new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        let state = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading state file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parsing state file {}", path.display()))?
        } else {
            State::default()
        };

        Ok(Store { path, state })
    }

    /// Creates an in-memory store for tests.
    pub fn in_memory() -> Self {
        Store {
            path: PathBuf::from("/dev/null"),
            state: State::default(),
        }
    }

    /// Writes the state to disk atomically (temp file, then rename).
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        let output = serde_json::to_string_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, output).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;

        Ok(())
    }

    /// Read access to the raw state.
    pub fn state(&self) -> &State {
        &self.state
    }

    //===========================//
    // Get-or-create by natural key //
    //===========================//

    /// Inserts the run if its id is new; an existing run's sequencing
    /// metadata is never overwritten.
    pub fn get_or_create_run(&mut self, run: Run) -> &Run {
        self.state
            .runs
            .entry(run.run_id.clone())
            .or_insert(run)
    }

    /// Inserts the sample if its id is new.
    pub fn get_or_create_sample(&mut self, sample: Sample) -> &Sample {
        self.state
            .samples
            .entry(sample.sample_id.clone())
            .or_insert(sample)
    }

    /// Finds the run analysis for a key, creating a pending one if absent.
    pub fn get_or_create_run_analysis(&mut self, key: &RunAnalysisKey) -> &mut RunAnalysis {
        if let Some(index) = self
            .state
            .run_analyses
            .iter()
            .position(|ra| &ra.key == key)
        {
            return &mut self.state.run_analyses[index];
        }

        debug!("creating run analysis {}", key);
        self.state.run_analyses.push(RunAnalysis::pending(key.clone()));
        self.state
            .run_analyses
            .last_mut()
            .expect("just pushed a run analysis")
    }

    /// Finds the sample analysis for a key, creating a pending one if absent.
    pub fn get_or_create_sample_analysis(
        &mut self,
        key: &SampleAnalysisKey,
    ) -> &mut SampleAnalysis {
        if let Some(index) = self
            .state
            .sample_analyses
            .iter()
            .position(|sa| &sa.key == key)
        {
            return &mut self.state.sample_analyses[index];
        }

        debug!("creating sample analysis for {}", key.sample_id);
        self.state
            .sample_analyses
            .push(SampleAnalysis::pending(key.clone()));
        self.state
            .sample_analyses
            .last_mut()
            .expect("just pushed a sample analysis")
    }

    //=========//
    // Lookups //
    //=========//

    /// Finds a run analysis by key.
    pub fn run_analysis(&self, key: &RunAnalysisKey) -> Option<&RunAnalysis> {
        self.state.run_analyses.iter().find(|ra| &ra.key == key)
    }

    /// Finds a run analysis by key, mutably.
    pub fn run_analysis_mut(&mut self, key: &RunAnalysisKey) -> Option<&mut RunAnalysis> {
        self.state.run_analyses.iter_mut().find(|ra| &ra.key == key)
    }

    /// Every sample analysis that belongs to a run analysis, in creation
    /// order.
    pub fn sample_analyses_for(&self, key: &RunAnalysisKey) -> Vec<&SampleAnalysis> {
        self.state
            .sample_analyses
            .iter()
            .filter(|sa| &sa.key.run_analysis == key)
            .collect()
    }

    /// Finds a sample analysis by key, mutably.
    pub fn sample_analysis_mut(&mut self, key: &SampleAnalysisKey) -> Option<&mut SampleAnalysis> {
        self.state
            .sample_analyses
            .iter_mut()
            .find(|sa| &sa.key == key)
    }

    //================//
    // Metric records //
    //================//

    /// Inserts a metric record unless one already exists for the same
    /// `(kind, owner, instance)` key.
    pub fn insert_metric_if_absent(&mut self, record: MetricRecord) -> Inserted {
        let exists = self.state.metrics.iter().any(|m| {
            m.kind == record.kind && m.owner == record.owner && m.instance == record.instance
        });

        if exists {
            return Inserted::AlreadyPresent;
        }

        self.state.metrics.push(record);
        Inserted::Created
    }

    /// Finds one metric record by its full key.
    pub fn metric(
        &self,
        kind: MetricKind,
        owner: &MetricOwner,
        instance: &str,
    ) -> Option<&MetricRecord> {
        self.state
            .metrics
            .iter()
            .find(|m| m.kind == kind && &m.owner == owner && m.instance == instance)
    }

    /// Every record of one kind owned by the given analysis.
    pub fn metrics_of_kind(&self, kind: MetricKind, owner: &MetricOwner) -> Vec<&MetricRecord> {
        self.state
            .metrics
            .iter()
            .filter(|m| m.kind == kind && &m.owner == owner)
            .collect()
    }

    //=================//
    // Monotonic flags //
    //=================//

    /// Raises the run-level flags that are true in the observation. Flags
    /// never move true→false here.
    pub fn raise_run_flags(
        &mut self,
        key: &RunAnalysisKey,
        demultiplexing_completed: bool,
        demultiplexing_valid: bool,
        results_completed: bool,
        results_valid: bool,
    ) {
        if let Some(ra) = self.run_analysis_mut(key) {
            ra.demultiplexing_completed |= demultiplexing_completed;
            ra.demultiplexing_valid |= demultiplexing_valid;
            ra.results_completed |= results_completed;
            ra.results_valid |= results_valid;
        }
    }

    /// Raises the sample-level flags that are true in the observation.
    pub fn raise_sample_flags(
        &mut self,
        key: &SampleAnalysisKey,
        results_completed: bool,
        results_valid: bool,
    ) {
        if let Some(sa) = self.sample_analysis_mut(key) {
            sa.results_completed |= results_completed;
            sa.results_valid |= results_valid;
        }
    }

    /// The explicit "move to pending" action: clears every flag on a run
    /// analysis and its sample analyses. This is the only path back to false.
    pub fn reset_run_analysis(&mut self, key: &RunAnalysisKey) {
        if let Some(ra) = self.run_analysis_mut(key) {
            ra.demultiplexing_completed = false;
            ra.demultiplexing_valid = false;
            ra.results_completed = false;
            ra.results_valid = false;
        }

        for sa in self
            .state
            .sample_analyses
            .iter_mut()
            .filter(|sa| &sa.key.run_analysis == key)
        {
            sa.results_completed = false;
            sa.results_valid = false;
        }
    }
}

#[cfg(test)]
mod tests {

    use indexmap::IndexMap;

    use super::*;

    fn run_key() -> RunAnalysisKey {
        RunAnalysisKey {
            run_id: String::from("run1"),
            pipeline: String::from("GermlineEnrichment-2.5.3"),
            analysis_type: String::from("IlluminaTruSightOne"),
        }
    }

    fn record(instance: &str) -> MetricRecord {
        MetricRecord {
            kind: MetricKind::Sensitivity,
            owner: MetricOwner::Run(run_key()),
            instance: instance.to_string(),
            values: IndexMap::new(),
        }
    }

    #[test]
    pub fn test_insert_if_absent_is_idempotent() {
        let mut store = Store::in_memory();

        assert_eq!(store.insert_metric_if_absent(record("")), Inserted::Created);
        assert_eq!(
            store.insert_metric_if_absent(record("")),
            Inserted::AlreadyPresent
        );
        assert_eq!(store.state().metrics.len(), 1);

        // A different instance is a different key.
        assert_eq!(
            store.insert_metric_if_absent(record("other")),
            Inserted::Created
        );
        assert_eq!(store.state().metrics.len(), 2);
    }

    #[test]
    pub fn test_flags_are_monotonic() {
        let mut store = Store::in_memory();
        let key = run_key();
        store.get_or_create_run_analysis(&key);

        store.raise_run_flags(&key, true, true, true, true);
        // A later observation where the filesystem regressed must not lower
        // the flags.
        store.raise_run_flags(&key, false, false, false, false);

        let ra = store.run_analysis(&key).unwrap();
        assert!(ra.results_completed);
        assert!(ra.results_valid);
        assert!(ra.demultiplexing_completed);
        assert!(ra.demultiplexing_valid);
    }

    #[test]
    pub fn test_reset_clears_flags() {
        let mut store = Store::in_memory();
        let key = run_key();
        store.get_or_create_run_analysis(&key);
        store.raise_run_flags(&key, true, true, true, true);

        store.reset_run_analysis(&key);

        let ra = store.run_analysis(&key).unwrap();
        assert!(!ra.results_completed);
        assert!(!ra.results_valid);
    }

    #[test]
    pub fn test_get_or_create_run_keeps_first_metadata() {
        let mut store = Store::in_memory();

        store.get_or_create_run(Run {
            run_id: String::from("run1"),
            instrument: Some(String::from("M00001")),
            flowcell: None,
            lanes: 1,
            reads: Vec::new(),
        });

        // Re-observation with different metadata does not overwrite.
        store.get_or_create_run(Run {
            run_id: String::from("run1"),
            instrument: Some(String::from("M99999")),
            flowcell: None,
            lanes: 8,
            reads: Vec::new(),
        });

        let run = store.state().runs.get("run1").unwrap();
        assert_eq!(run.instrument.as_deref(), Some("M00001"));
        assert_eq!(run.lanes, 1);
    }

    #[test]
    pub fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let mut store = Store::load_or_new(&path).unwrap();
            store.get_or_create_run_analysis(&run_key());
            store.insert_metric_if_absent(record(""));
            store.save().unwrap();
        }

        let store = Store::load_or_new(&path).unwrap();
        assert_eq!(store.state().run_analyses.len(), 1);
        assert_eq!(store.state().metrics.len(), 1);
    }
}
