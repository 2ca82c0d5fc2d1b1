//! Minimal reader for the sequencer's `RunInfo.xml`.
//!
//! Only four things are needed from the file: the instrument id, the
//! flowcell id, the lane count, and the read geometry (cycles per read and
//! which reads are indexes). The file is small and flat, so attributes are
//! pulled out with regular expressions rather than a full XML parser.

use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use regex::Regex;

use crate::model::RunRead;

/// The subset of `RunInfo.xml` the tracker consumes.
#[derive(Clone, Debug)]
pub struct RunInfo {
    /// Instrument id.
    pub instrument: Option<String>,

    /// Flowcell id.
    pub flowcell: Option<String>,

    /// Number of lanes on the flowcell.
    pub lane_count: u32,

    /// Read geometry in read order.
    pub reads: Vec<RunRead>,
}

fn tag_text(contents: &str, tag: &str) -> Option<String> {
    let pattern = Regex::new(&format!("<{tag}>([^<]+)</{tag}>", tag = tag))
        .expect("tag pattern is valid");

    pattern
        .captures(contents)
        .map(|c| c[1].trim().to_string())
}

fn attribute(element: &str, name: &str) -> Option<String> {
    let pattern = Regex::new(&format!("{}=\"([^\"]*)\"", name)).expect("attribute pattern is valid");

    pattern.captures(element).map(|c| c[1].to_string())
}

/// Parses `<run_dir>/RunInfo.xml`.
pub fn parse_run_info(run_dir: impl AsRef<Path>) -> anyhow::Result<RunInfo> {
    let path = run_dir.as_ref().join("RunInfo.xml");
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let read_pattern = Regex::new(r"<Read\s+[^>/]*/?>").expect("read pattern is valid");

    let mut reads = Vec::new();
    for element in read_pattern.find_iter(&contents) {
        let element = element.as_str();

        let number = attribute(element, "Number")
            .and_then(|v| v.parse::<u32>().ok())
            .with_context(|| format!("Read element without a Number in {}", path.display()))?;
        let num_cycles = attribute(element, "NumCycles")
            .and_then(|v| v.parse::<u32>().ok())
            .with_context(|| format!("Read element without NumCycles in {}", path.display()))?;
        let is_indexed = attribute(element, "IsIndexedRead")
            .map(|v| v == "Y")
            .unwrap_or(false);

        reads.push(RunRead {
            number,
            num_cycles,
            is_indexed,
        });
    }

    if reads.is_empty() {
        bail!("no Read elements found in {}", path.display());
    }

    let lane_count = Regex::new(r#"LaneCount="(\d+)""#)
        .expect("lane count pattern is valid")
        .captures(&contents)
        .and_then(|c| c[1].parse::<u32>().ok())
        .with_context(|| format!("no LaneCount found in {}", path.display()))?;

    Ok(RunInfo {
        instrument: tag_text(&contents, "Instrument"),
        flowcell: tag_text(&contents, "Flowcell"),
        lane_count,
        reads,
    })
}
