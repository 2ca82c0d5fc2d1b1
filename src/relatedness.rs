//! Pedigree-versus-genotype relatedness consistency checking.
//!
//! Given a pedigree and a pairwise relatedness matrix (vcftools
//! `--relatedness2` output), the engine validates three invariant classes
//! over every sample with declared parent links:
//!
//! 1. relatedness to each declared parent must lie within the configured
//!    parent-child bounds;
//! 2. relatedness to any sample outside the sample's family bucket must not
//!    exceed the unrelated-pair bound;
//! 3. relatedness between the sample's two declared parents must not exceed
//!    the parent-parent bound.
//!
//! Every check is fail-closed: a missing pairwise measurement is reported as
//! a failure naming the pair, never treated as "presumed unrelated". File
//! problems are converted into failure reasons rather than propagated as
//! errors, so a corrupt pedigree downgrades the run instead of aborting a
//! batch.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use itertools::Itertools;

use crate::parsers::pedigree::parse_ped;
use crate::parsers::pedigree::Pedigree;

/// The single success message returned when every check passes.
pub const RELATEDNESS_OK: &str = "All relatedness checks passed";

/// Configured bounds for the three check classes.
#[derive(Clone, Copy, Debug)]
pub struct RelatednessBounds {
    /// Lower bound for a parent-child pair.
    pub min_relatedness_parents: f64,

    /// Upper bound for a parent-child pair.
    pub max_child_parent_relatedness: f64,

    /// Upper bound for any pair outside a shared family.
    pub max_relatedness_unrelated: f64,

    /// Upper bound for the two declared parents of a sample.
    pub max_relatedness_between_parents: f64,
}

/// Pairwise relatedness estimates, symmetric in the pair.
#[derive(Clone, Debug, Default)]
pub struct RelatednessMatrix {
    pairs: HashMap<(String, String), f64>,
}

impl RelatednessMatrix {
    /// Parses vcftools `--relatedness2` output: a tab-delimited table whose
    /// first two columns are the pair and whose `RELATEDNESS_PHI` column is
    /// the estimate. Unparsable estimates (e.g. `nan`) are treated as
    /// missing measurements.
    pub fn from_path(src: impl AsRef<Path>) -> anyhow::Result<Self> {
        let src = src.as_ref();
        let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

        let mut lines = BufReader::new(file).lines();
        let header = match lines.next() {
            Some(line) => line?,
            None => bail!("{} is empty", src.display()),
        };

        let columns: Vec<&str> = header.split('\t').collect();
        let phi_column = columns
            .iter()
            .position(|c| *c == "RELATEDNESS_PHI")
            .with_context(|| format!("{} has no RELATEDNESS_PHI column", src.display()))?;

        let mut matrix = RelatednessMatrix::default();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            let (a, b) = match (fields.first(), fields.get(1)) {
                (Some(a), Some(b)) => (*a, *b),
                _ => bail!("malformed relatedness row in {}: {}", src.display(), line),
            };

            if let Some(phi) = fields.get(phi_column).and_then(|v| v.parse::<f64>().ok()) {
                if phi.is_finite() {
                    matrix.insert(a, b, phi);
                }
            }
        }

        Ok(matrix)
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Records one pairwise estimate.
    pub fn insert(&mut self, a: &str, b: &str, phi: f64) {
        self.pairs.insert(Self::key(a, b), phi);
    }

    /// Looks up the estimate for a pair, in either order.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.pairs.get(&Self::key(a, b)).copied()
    }
}

/// Names a pair consistently regardless of which side the check started from,
/// so duplicate findings collapse during deduplication.
fn pair_name(a: &str, b: &str) -> String {
    if a <= b {
        format!("{} and {}", a, b)
    } else {
        format!("{} and {}", b, a)
    }
}

fn check_parent_pair(
    sample: &str,
    parent: &str,
    matrix: &RelatednessMatrix,
    bounds: &RelatednessBounds,
    reasons: &mut Vec<String>,
) {
    match matrix.get(sample, parent) {
        None => reasons.push(format!(
            "Relatedness Fail: no relatedness value for {}",
            pair_name(sample, parent)
        )),
        Some(phi) => {
            if phi < bounds.min_relatedness_parents || phi > bounds.max_child_parent_relatedness {
                reasons.push(format!(
                    "Relatedness Fail: parent-child relatedness for {} is {}",
                    pair_name(sample, parent),
                    phi
                ));
            }
        }
    }
}

/// Runs every check and collects reasons. Split out so the public entry point
/// can convert file problems into reasons.
fn evaluate(
    pedigree: &Pedigree,
    matrix: &RelatednessMatrix,
    bounds: &RelatednessBounds,
) -> Vec<String> {
    let mut reasons = Vec::new();

    for (sample, links) in &pedigree.links {
        let parents: Vec<&String> =
            links.father.iter().chain(links.mother.iter()).collect();
        if parents.is_empty() {
            continue;
        }

        // (1) Parent-child bounds, one check per declared parent.
        for parent in &parents {
            check_parent_pair(sample, parent, matrix, bounds, &mut reasons);
        }

        // (2) Unrelated pairs: every sample outside this sample's family
        // bucket. Missing measurements fail closed.
        let family = pedigree.family_of(sample);
        for other in pedigree.links.keys() {
            if other == sample || family.contains(other) {
                continue;
            }

            match matrix.get(sample, other) {
                None => reasons.push(format!(
                    "Relatedness Fail: no relatedness value for {}",
                    pair_name(sample, other)
                )),
                Some(phi) => {
                    if phi > bounds.max_relatedness_unrelated {
                        reasons.push(format!(
                            "Relatedness Fail: unrelated pair {} has relatedness {}",
                            pair_name(sample, other),
                            phi
                        ));
                    }
                }
            }
        }

        // (3) The two declared parents must not be related to each other.
        if let (Some(father), Some(mother)) = (&links.father, &links.mother) {
            match matrix.get(father, mother) {
                None => reasons.push(format!(
                    "Relatedness Fail: no relatedness value for {}",
                    pair_name(father, mother)
                )),
                Some(phi) => {
                    if phi > bounds.max_relatedness_between_parents {
                        reasons.push(format!(
                            "Relatedness Fail: parents {} have relatedness {}",
                            pair_name(father, mother),
                            phi
                        ));
                    }
                }
            }
        }
    }

    reasons.into_iter().unique().collect()
}

/// Validates a run's pedigree against its relatedness matrix.
///
/// Returns `(passed, reasons)`: `passed` is true iff no check failed, in
/// which case the reasons list carries the single [`RELATEDNESS_OK`] message.
/// Files that cannot be opened or parsed become a failure reason rather than
/// an error.
pub fn check_relatedness(
    ped_path: impl AsRef<Path>,
    matrix_path: impl AsRef<Path>,
    bounds: &RelatednessBounds,
) -> (bool, Vec<String>) {
    let pedigree = match parse_ped(ped_path.as_ref()) {
        Ok(pedigree) => pedigree,
        Err(e) => {
            return (
                false,
                vec![format!("Relatedness Fail: could not read pedigree: {:#}", e)],
            )
        }
    };

    let matrix = match RelatednessMatrix::from_path(matrix_path.as_ref()) {
        Ok(matrix) => matrix,
        Err(e) => {
            return (
                false,
                vec![format!(
                    "Relatedness Fail: could not read relatedness matrix: {:#}",
                    e
                )],
            )
        }
    };

    let reasons = evaluate(&pedigree, &matrix, bounds);
    if reasons.is_empty() {
        (true, vec![String::from(RELATEDNESS_OK)])
    } else {
        (false, reasons)
    }
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use super::*;

    fn bounds() -> RelatednessBounds {
        RelatednessBounds {
            min_relatedness_parents: 0.2,
            max_child_parent_relatedness: 0.3,
            max_relatedness_unrelated: 0.06,
            max_relatedness_between_parents: 0.06,
        }
    }

    static PED: &str = "\
FAM1\tproband\tdad\tmum\t1\t2
FAM1\tdad\t0\t0\t1\t1
FAM1\tmum\t0\t0\t2\t1
0\tlone\t0\t0\t2\t1
";

    fn write_ped() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PED.as_bytes()).unwrap();
        file
    }

    fn write_matrix(rows: &[(&str, &str, &str)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "INDV1\tINDV2\tN_AaAa\tN_AAaa\tN1_Aa\tN2_Aa\tRELATEDNESS_PHI"
        )
        .unwrap();
        for (a, b, phi) in rows {
            writeln!(file, "{}\t{}\t0\t0\t0\t0\t{}", a, b, phi).unwrap();
        }
        file
    }

    fn complete_matrix() -> tempfile::NamedTempFile {
        write_matrix(&[
            ("proband", "dad", "0.25"),
            ("proband", "mum", "0.25"),
            ("dad", "mum", "0.01"),
            ("proband", "lone", "0.0"),
            ("dad", "lone", "0.0"),
            ("mum", "lone", "0.0"),
        ])
    }

    #[test]
    pub fn test_consistent_trio_passes() {
        let ped = write_ped();
        let matrix = complete_matrix();

        let (passed, reasons) = check_relatedness(ped.path(), matrix.path(), &bounds());
        assert!(passed);
        assert_eq!(reasons, vec![String::from(RELATEDNESS_OK)]);
    }

    #[test]
    pub fn test_low_parent_relatedness_fails() {
        let ped = write_ped();
        let matrix = write_matrix(&[
            ("proband", "dad", "0.02"),
            ("proband", "mum", "0.25"),
            ("dad", "mum", "0.01"),
            ("proband", "lone", "0.0"),
            ("dad", "lone", "0.0"),
            ("mum", "lone", "0.0"),
        ]);

        let (passed, reasons) = check_relatedness(ped.path(), matrix.path(), &bounds());
        assert!(!passed);
        assert!(reasons
            .iter()
            .any(|r| r.contains("parent-child") && r.contains("dad and proband")));
    }

    #[test]
    pub fn test_missing_unrelated_measurement_fails_closed() {
        let ped = write_ped();
        // No proband/lone measurement at all.
        let matrix = write_matrix(&[
            ("proband", "dad", "0.25"),
            ("proband", "mum", "0.25"),
            ("dad", "mum", "0.01"),
        ]);

        let (passed, reasons) = check_relatedness(ped.path(), matrix.path(), &bounds());
        assert!(!passed);
        assert!(reasons
            .iter()
            .any(|r| r.contains("no relatedness value") && r.contains("lone and proband")));
    }

    #[test]
    pub fn test_related_parents_fail() {
        let ped = write_ped();
        let matrix = write_matrix(&[
            ("proband", "dad", "0.25"),
            ("proband", "mum", "0.25"),
            ("dad", "mum", "0.2"),
            ("proband", "lone", "0.0"),
            ("dad", "lone", "0.0"),
            ("mum", "lone", "0.0"),
        ]);

        let (passed, reasons) = check_relatedness(ped.path(), matrix.path(), &bounds());
        assert!(!passed);
        assert!(reasons.iter().any(|r| r.contains("parents dad and mum")));
    }

    #[test]
    pub fn test_nan_phi_is_a_missing_measurement() {
        let ped = write_ped();
        let matrix = write_matrix(&[
            ("proband", "dad", "nan"),
            ("proband", "mum", "0.25"),
            ("dad", "mum", "0.01"),
            ("proband", "lone", "0.0"),
            ("dad", "lone", "0.0"),
            ("mum", "lone", "0.0"),
        ]);

        let (passed, reasons) = check_relatedness(ped.path(), matrix.path(), &bounds());
        assert!(!passed);
        assert!(reasons
            .iter()
            .any(|r| r.contains("no relatedness value") && r.contains("dad and proband")));
    }

    #[test]
    pub fn test_unreadable_pedigree_short_circuits() {
        let matrix = complete_matrix();
        let (passed, reasons) =
            check_relatedness("/nonexistent/file.ped", matrix.path(), &bounds());

        assert!(!passed);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("could not read pedigree"));
    }

    #[test]
    pub fn test_duplicate_pair_reasons_collapse() {
        // Two probands in different families, each with parents, produce the
        // same unrelated-pair finding from both directions.
        let mut ped = tempfile::NamedTempFile::new().unwrap();
        ped.write_all(
            b"FAM1\tp1\td1\tm1\t1\t2\nFAM1\td1\t0\t0\t1\t1\nFAM1\tm1\t0\t0\t2\t1\n\
              FAM2\tp2\td2\tm2\t1\t2\nFAM2\td2\t0\t0\t1\t1\nFAM2\tm2\t0\t0\t2\t1\n",
        )
        .unwrap();

        let matrix = write_matrix(&[
            ("p1", "d1", "0.25"),
            ("p1", "m1", "0.25"),
            ("d1", "m1", "0.0"),
            ("p2", "d2", "0.25"),
            ("p2", "m2", "0.25"),
            ("d2", "m2", "0.0"),
            ("p1", "p2", "0.3"),
            ("p1", "d2", "0.0"),
            ("p1", "m2", "0.0"),
            ("p2", "d1", "0.0"),
            ("p2", "m1", "0.0"),
            ("d1", "d2", "0.0"),
            ("d1", "m2", "0.0"),
            ("m1", "d2", "0.0"),
            ("m1", "m2", "0.0"),
        ]);

        let (passed, reasons) = check_relatedness(ped.path(), matrix.path(), &bounds());
        assert!(!passed);

        let hits: Vec<&String> = reasons.iter().filter(|r| r.contains("p1 and p2")).collect();
        assert_eq!(hits.len(), 1);
    }
}
