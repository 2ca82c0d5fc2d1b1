//! Parser for the sensitivity report produced at the end of a germline run.
//!
//! The report is free text written by an R script; the only line of interest
//! begins with the literal token `[1]` and carries the point estimate
//! followed by a hyphen-delimited confidence interval.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;

use crate::parsers::RawMetrics;

/// Parses a sensitivity report into `sensitivity`, `sensitivity_lower_ci`
/// and `sensitivity_higher_ci`.
pub fn parse_sensitivity_report(src: impl AsRef<Path>) -> anyhow::Result<RawMetrics> {
    let src = src.as_ref();
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.starts_with("[1]") {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (estimate, interval) = match (tokens.get(2), tokens.get(3)) {
            (Some(estimate), Some(interval)) => (*estimate, *interval),
            _ => bail!("malformed sensitivity line in {}: {}", src.display(), line),
        };

        let estimate = estimate.trim_matches('"');
        let interval = interval.trim_matches(|c: char| c == '"' || c == '[' || c == ']');
        let (lower, higher) = match interval.split_once('-') {
            Some(bounds) => bounds,
            None => bail!(
                "sensitivity confidence interval is not hyphen-delimited in {}: {}",
                src.display(),
                interval
            ),
        };

        let mut metrics = RawMetrics::new();
        metrics.insert(String::from("sensitivity"), estimate.to_string());
        metrics.insert(String::from("sensitivity_lower_ci"), lower.to_string());
        metrics.insert(String::from("sensitivity_higher_ci"), higher.to_string());
        return Ok(metrics);
    }

    bail!("no '[1]' line found in {}", src.display())
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use super::*;

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    pub fn test_sensitivity_line() {
        let file = write_fixture("loading giab calls\n[1] \"sensitivity:\" 0.95 0.90-0.99\n");
        let metrics = parse_sensitivity_report(file.path()).unwrap();

        assert_eq!(metrics.get("sensitivity").unwrap(), "0.95");
        assert_eq!(metrics.get("sensitivity_lower_ci").unwrap(), "0.90");
        assert_eq!(metrics.get("sensitivity_higher_ci").unwrap(), "0.99");
    }

    #[test]
    pub fn test_quoted_interval() {
        let file = write_fixture("[1] \"estimate\" 0.987 \"0.972-0.995\"\n");
        let metrics = parse_sensitivity_report(file.path()).unwrap();

        assert_eq!(metrics.get("sensitivity_lower_ci").unwrap(), "0.972");
        assert_eq!(metrics.get("sensitivity_higher_ci").unwrap(), "0.995");
    }

    #[test]
    pub fn test_report_without_marker_line_is_an_error() {
        let file = write_fixture("no estimate here\n");
        assert!(parse_sensitivity_report(file.path()).is_err());
    }
}
