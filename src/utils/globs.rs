//! Glob helpers used by the pipeline monitors.
//!
//! Completeness and validity detection is glob-driven throughout: a dialect
//! describes the files it expects (and the files it must *not* see) as glob
//! patterns relative to a directory, and the monitors reduce the match counts
//! to booleans. The distinction between [`exactly_one`] and [`first_match`]
//! is load-bearing: validity predicates demand exactly one match (zero means
//! incomplete, two or more means an ambiguous rerun), whereas metric getters
//! assume validity has already been confirmed and simply take the first hit.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Expands the `{sample}` and `{run}` placeholders a dialect layout may carry
/// in its glob patterns.
pub fn expand(pattern: &str, sample: Option<&str>, run: Option<&str>) -> String {
    let mut expanded = pattern.to_string();

    if let Some(sample) = sample {
        expanded = expanded.replace("{sample}", sample);
    }

    if let Some(run) = run {
        expanded = expanded.replace("{run}", run);
    }

    expanded
}

/// Returns every path under `dir` matching `pattern` (a glob relative to
/// `dir`), sorted by the glob crate's traversal order.
pub fn matches_in(dir: &Path, pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let full = dir.join(pattern);
    let full = full
        .to_str()
        .with_context(|| format!("glob pattern is not valid UTF-8: {}", full.display()))?
        .to_string();

    let mut matches = Vec::new();
    for entry in glob::glob(&full).with_context(|| format!("bad glob pattern: {}", full))? {
        matches.push(entry?);
    }

    Ok(matches)
}

/// True iff `pattern` resolves to exactly one path under `dir`.
pub fn exactly_one(dir: &Path, pattern: &str) -> anyhow::Result<bool> {
    Ok(matches_in(dir, pattern)?.len() == 1)
}

/// True iff `pattern` resolves to at least one path under `dir`.
pub fn at_least_one(dir: &Path, pattern: &str) -> anyhow::Result<bool> {
    Ok(!matches_in(dir, pattern)?.is_empty())
}

/// Returns the first path matching `pattern` under `dir`, if any.
pub fn first_match(dir: &Path, pattern: &str) -> anyhow::Result<Option<PathBuf>> {
    Ok(matches_in(dir, pattern)?.into_iter().next())
}

#[cfg(test)]
mod tests {

    use std::fs::File;

    use super::*;

    #[test]
    pub fn test_match_counting() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("S1_HsMetrics.txt")).unwrap();
        File::create(dir.path().join("S1_HsMetrics.txt.bak")).unwrap();

        assert!(exactly_one(dir.path(), "*_HsMetrics.txt").unwrap());
        assert!(!exactly_one(dir.path(), "*HsMetrics*").unwrap());
        assert!(!exactly_one(dir.path(), "*.vcf").unwrap());
        assert!(at_least_one(dir.path(), "*HsMetrics*").unwrap());
        assert!(!at_least_one(dir.path(), "*.vcf").unwrap());
    }

    #[test]
    pub fn test_first_match() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.txt")).unwrap();
        File::create(dir.path().join("b.txt")).unwrap();

        let first = first_match(dir.path(), "*.txt").unwrap().unwrap();
        assert_eq!(first.file_name().unwrap(), "a.txt");
        assert!(first_match(dir.path(), "*.json").unwrap().is_none());
    }

    #[test]
    pub fn test_expand_placeholders() {
        assert_eq!(
            expand("{sample}/{sample}_QC.txt", Some("S1"), None),
            "S1/S1_QC.txt"
        );
        assert_eq!(
            expand("{run}_relatedness.relatedness2", None, Some("200110_D00501_0123_BHXXX")),
            "200110_D00501_0123_BHXXX_relatedness.relatedness2"
        );
    }
}
