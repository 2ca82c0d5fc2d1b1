//! Monitor for the CRUK / BaseSpace workflow dialect.
//!
//! CRUK runs are analysed off-site, so completion is read out of the
//! workflow's appsession log rather than from pipeline output files. Each
//! sample is covered by exactly one of four appsession families (TST-DNA,
//! TST-RNA, SMP-DNA, SMP-RNA) and counts as complete only when the log holds
//! *both* its completion message and the matching family's status line. DNA
//! samples are paired with their RNA counterpart through a shared pairing
//! identifier on the sample sheet, and the run itself is complete when the
//! last line of the workflow marker equals `CRUK workflow completed` exactly.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use regex::Regex;

use crate::monitors::generic::marker_satisfied;
use crate::monitors::layouts::DialectLayout;
use crate::monitors::Dialect;
use crate::monitors::PipelineMonitor;
use crate::samplesheet::SampleSheet;
use crate::utils::globs;

/// One appsession family: the product/analyte tokens that key its log lines.
struct AppsessionFamily {
    name: &'static str,
    completion: &'static str,
    status: &'static str,
}

/// The four mutually-exclusive appsession families. A sample's lines carry
/// exactly one product token (TST170 or SMP2) and one analyte token (DNA or
/// RNA), so a completion message from one family never satisfies another
/// family's status check.
const APPSESSION_FAMILIES: &[AppsessionFamily] = &[
    AppsessionFamily {
        name: "TST-DNA",
        completion: r"Appsession\s+TST170[-_ ]DNA[-_ ]{sample}\s+completed",
        status: r"Status\s+of\s+appsession\s+TST170[-_ ]DNA[-_ ]{sample}:\s*Complete",
    },
    AppsessionFamily {
        name: "TST-RNA",
        completion: r"Appsession\s+TST170[-_ ]RNA[-_ ]{sample}\s+completed",
        status: r"Status\s+of\s+appsession\s+TST170[-_ ]RNA[-_ ]{sample}:\s*Complete",
    },
    AppsessionFamily {
        name: "SMP-DNA",
        completion: r"Appsession\s+SMP2[-_ ]DNA[-_ ]{sample}\s+completed",
        status: r"Status\s+of\s+appsession\s+SMP2[-_ ]DNA[-_ ]{sample}:\s*Complete",
    },
    AppsessionFamily {
        name: "SMP-RNA",
        completion: r"Appsession\s+SMP2[-_ ]RNA[-_ ]{sample}\s+completed",
        status: r"Status\s+of\s+appsession\s+SMP2[-_ ]RNA[-_ ]{sample}:\s*Complete",
    },
];

fn family_regexes(family: &AppsessionFamily, sample: &str) -> anyhow::Result<(Regex, Regex)> {
    let escaped = regex::escape(sample);
    let completion = Regex::new(&family.completion.replace("{sample}", &escaped))
        .with_context(|| format!("building {} completion pattern", family.name))?;
    let status = Regex::new(&family.status.replace("{sample}", &escaped))
        .with_context(|| format!("building {} status pattern", family.name))?;

    Ok((completion, status))
}

/// Monitor for CRUK runs.
pub struct CrukMonitor {
    run_id: String,
    results_root: PathBuf,
    samples: Vec<String>,
    pairs: HashMap<String, String>,
    layout: DialectLayout,
}

impl CrukMonitor {
    /// Creates a monitor over a results directory.
    ///
    /// The sample sheet supplies the sample order and the pairing
    /// identifiers. More than one worksheet id on a CRUK sheet is a
    /// configuration error.
    pub fn new(
        run_id: &str,
        results_dir: PathBuf,
        sheet: &SampleSheet,
        layout: DialectLayout,
    ) -> anyhow::Result<Self> {
        let worksheets = sheet.worksheets();
        if worksheets.len() > 1 {
            bail!(
                "CRUK run {} names more than one worksheet: {}",
                run_id,
                worksheets.join(", ")
            );
        }

        // Samples sharing a pairing identifier are DNA/RNA counterparts.
        let mut by_pair: HashMap<String, Vec<String>> = HashMap::new();
        for row in &sheet.rows {
            if let Some(pair) = &row.sample_pair {
                by_pair
                    .entry(pair.clone())
                    .or_default()
                    .push(row.sample_id.clone());
            }
        }

        let mut pairs = HashMap::new();
        for members in by_pair.values() {
            if let [a, b] = members.as_slice() {
                pairs.insert(a.clone(), b.clone());
                pairs.insert(b.clone(), a.clone());
            }
        }

        let results_root = match &layout.results_subdir {
            Some(subdir) => results_dir.join(subdir),
            None => results_dir,
        };

        Ok(CrukMonitor {
            run_id: run_id.to_string(),
            results_root,
            samples: sheet.sample_ids(),
            pairs,
            layout,
        })
    }

    /// The DNA/RNA counterpart of a sample, if the sheet paired it.
    pub fn partner_of(&self, sample: &str) -> Option<&String> {
        self.pairs.get(sample)
    }

    fn log_lines(&self) -> anyhow::Result<Option<Vec<String>>> {
        let pattern = match &self.layout.log_file {
            Some(pattern) => pattern,
            None => return Ok(None),
        };

        let path = match globs::first_match(&self.results_root, pattern)? {
            Some(path) => path,
            None => return Ok(None),
        };

        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(lines))
    }
}

impl PipelineMonitor for CrukMonitor {
    fn dialect(&self) -> Dialect {
        self.layout.dialect
    }

    fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Complete iff some appsession family holds both the sample's
    /// completion message and its status line.
    fn sample_is_complete(&self, sample: &str) -> anyhow::Result<bool> {
        let lines = match self.log_lines()? {
            Some(lines) => lines,
            None => return Ok(false),
        };

        for family in APPSESSION_FAMILIES {
            let (completion, status) = family_regexes(family, sample)?;

            let completed = lines.iter().any(|line| completion.is_match(line));
            if !completed {
                continue;
            }

            if lines.iter().any(|line| status.is_match(line)) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn sample_is_valid(&self, sample: &str) -> anyhow::Result<bool> {
        for pattern in self.layout.sample_expected_files.value() {
            let expanded = globs::expand(pattern, Some(sample), Some(&self.run_id));
            if !globs::exactly_one(&self.results_root, &expanded)? {
                return Ok(false);
            }
        }

        for pattern in self.layout.sample_not_expected_files.value() {
            let expanded = globs::expand(pattern, Some(sample), Some(&self.run_id));
            if globs::at_least_one(&self.results_root, &expanded)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn run_is_complete(&self) -> anyhow::Result<bool> {
        match &self.layout.run_marker {
            Some(sniff) => marker_satisfied(&self.results_root, sniff),
            None => Ok(false),
        }
    }

    fn run_is_valid(&self) -> anyhow::Result<bool> {
        for pattern in self.layout.run_expected_files.value() {
            let expanded = globs::expand(pattern, None, Some(&self.run_id));
            if !globs::exactly_one(&self.results_root, &expanded)? {
                return Ok(false);
            }
        }

        for pattern in self.layout.run_not_expected_files.value() {
            let expanded = globs::expand(pattern, None, Some(&self.run_id));
            if globs::at_least_one(&self.results_root, &expanded)? {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
