//! Reader for the Illumina `SampleSheet.csv`.
//!
//! Only the `[Data]` section matters here: the ordered sample list, the
//! worksheet each sample was booked on, the optional pairing identifier, and
//! the semicolon-delimited `Description` field that names the pipeline,
//! pipeline version and panel applied to the sample. Finding the header row
//! before the data rows is an explicit state machine: the reader waits for
//! the `[Data]` marker, then for the header, then consumes rows.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;

/// One `[Data]` row.
#[derive(Clone, Debug)]
pub struct SampleSheetRow {
    /// `Sample_ID` column.
    pub sample_id: String,

    /// `Sample_Plate` column — the worksheet id.
    pub worksheet: Option<String>,

    /// `Sample_Pair` column — the pairing identifier used by CRUK runs.
    pub sample_pair: Option<String>,

    /// Raw `Description` column.
    pub description: String,
}

/// The parsed sheet, preserving row order.
#[derive(Clone, Debug, Default)]
pub struct SampleSheet {
    /// Data rows in sheet order.
    pub rows: Vec<SampleSheetRow>,
}

/// Pipeline identification carried in a row's `Description` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineInfo {
    /// `pipelineName` value.
    pub name: String,

    /// `pipelineVersion` value.
    pub version: String,

    /// `panel` value.
    pub panel: String,

    /// Optional `sex` value.
    pub sex: Option<String>,
}

impl PipelineInfo {
    /// Pipeline name and version joined the way run analyses are keyed.
    pub fn pipeline_id(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Where the reader is while walking the file.
enum ParseState {
    /// Waiting for the `[Data]` section marker.
    AwaitingSection,

    /// Waiting for the header row that names the columns.
    AwaitingHeader,

    /// Consuming data rows.
    ReadingRows,
}

/// Whether a description belongs to a NIPT sheet, which is exempt from the
/// pipeline-description requirement.
pub fn is_nipt(description: &str) -> bool {
    description.to_lowercase().contains("nipt")
}

/// Parses the semicolon-delimited `Description` field.
///
/// `pipelineName`, `pipelineVersion` and `panel` are required; a missing key
/// is a hard parse error (NIPT sheets are the caller's exemption to handle).
pub fn parse_description(description: &str) -> anyhow::Result<PipelineInfo> {
    let mut name = None;
    let mut version = None;
    let mut panel = None;
    let mut sex = None;

    for field in description.split(';') {
        let (key, value) = match field.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };

        match key.trim() {
            "pipelineName" => name = Some(value.trim().to_string()),
            "pipelineVersion" => version = Some(value.trim().to_string()),
            "panel" => panel = Some(value.trim().to_string()),
            "sex" => sex = Some(value.trim().to_string()),
            _ => {}
        }
    }

    match (name, version, panel) {
        (Some(name), Some(version), Some(panel)) => Ok(PipelineInfo {
            name,
            version,
            panel,
            sex,
        }),
        _ => bail!(
            "Description field is missing pipelineName/pipelineVersion/panel: '{}'",
            description
        ),
    }
}

impl SampleSheet {
    /// Parses `SampleSheet.csv` found in a run directory.
    pub fn parse_dir(run_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::parse(run_dir.as_ref().join("SampleSheet.csv"))
    }

    /// Parses a sample sheet file.
    pub fn parse(src: impl AsRef<Path>) -> anyhow::Result<Self> {
        let src = src.as_ref();
        let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

        let mut state = ParseState::AwaitingSection;
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();

        for line in BufReader::new(file).lines() {
            let line = line?;

            match state {
                ParseState::AwaitingSection => {
                    if line.trim_end_matches(',').trim() == "[Data]" {
                        state = ParseState::AwaitingHeader;
                    }
                }
                ParseState::AwaitingHeader => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    columns = line.split(',').map(|c| c.trim().to_string()).collect();
                    if !columns.iter().any(|c| c == "Sample_ID") {
                        bail!("[Data] header in {} has no Sample_ID column", src.display());
                    }

                    state = ParseState::ReadingRows;
                }
                ParseState::ReadingRows => {
                    // A new section marker ends the data rows.
                    if line.trim_start().starts_with('[') {
                        break;
                    }

                    let fields: Vec<&str> = line.split(',').collect();
                    let get = |name: &str| -> Option<String> {
                        columns
                            .iter()
                            .position(|c| c == name)
                            .and_then(|i| fields.get(i))
                            .map(|v| v.trim().to_string())
                            .filter(|v| !v.is_empty())
                    };

                    let sample_id = match get("Sample_ID") {
                        Some(id) => id,
                        None => continue,
                    };

                    rows.push(SampleSheetRow {
                        sample_id,
                        worksheet: get("Sample_Plate"),
                        sample_pair: get("Sample_Pair"),
                        description: get("Description").unwrap_or_default(),
                    });
                }
            }
        }

        if rows.is_empty() {
            bail!("no [Data] rows found in {}", src.display());
        }

        Ok(SampleSheet { rows })
    }

    /// The ordered sample id list.
    pub fn sample_ids(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.sample_id.clone()).collect()
    }

    /// The distinct worksheet ids on the sheet, in first-seen order.
    pub fn worksheets(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for row in &self.rows {
            if let Some(worksheet) = &row.worksheet {
                if !seen.contains(worksheet) {
                    seen.push(worksheet.clone());
                }
            }
        }

        seen
    }
}
