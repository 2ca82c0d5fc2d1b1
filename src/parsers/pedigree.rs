//! Parser for PED-format pedigree files.
//!
//! A PED row is whitespace-delimited:
//! `family_id sample_id father mother sex phenotype`, with `0` standing for
//! "not recorded" in the parent columns. The parser derives two structures:
//! per-sample parent links, and per-family member lists. Samples in family
//! `0` are unrelated singletons and are routed to a shared bucket.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use indexmap::IndexMap;

/// Family id bucket for samples with no family assignment.
pub const SINGLETONS_FAMILY: &str = "singletons";

/// Parent links for one sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PedigreeLinks {
    /// Family the sample belongs to (`singletons` for family `0`).
    pub family_id: String,

    /// Declared father, if recorded.
    pub father: Option<String>,

    /// Declared mother, if recorded.
    pub mother: Option<String>,
}

/// A parsed pedigree.
#[derive(Clone, Debug, Default)]
pub struct Pedigree {
    /// Per-sample parent links, in file order.
    pub links: IndexMap<String, PedigreeLinks>,

    /// Family id → member sample ids, in file order.
    pub families: IndexMap<String, Vec<String>>,
}

impl Pedigree {
    /// Sample ids that belong to the same family as `sample`. Singletons have
    /// no family members besides themselves.
    pub fn family_of(&self, sample: &str) -> &[String] {
        static EMPTY: Vec<String> = Vec::new();

        match self.links.get(sample) {
            Some(links) if links.family_id != SINGLETONS_FAMILY => self
                .families
                .get(&links.family_id)
                .map(|members| members.as_slice())
                .unwrap_or(&EMPTY),
            _ => EMPTY.as_slice(),
        }
    }
}

fn parent(field: &str) -> Option<String> {
    if field == "0" {
        None
    } else {
        Some(field.to_string())
    }
}

/// Parses a PED file. Duplicate sample ids are a hard error — a pedigree
/// that lists a sample twice cannot be trusted for any downstream check.
pub fn parse_ped(src: impl AsRef<Path>) -> anyhow::Result<Pedigree> {
    let src = src.as_ref();
    let file = File::open(src).with_context(|| format!("opening {}", src.display()))?;

    let mut pedigree = Pedigree::default();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            bail!("PED row with fewer than six columns in {}: {}", src.display(), line);
        }

        let family_id = if fields[0] == "0" {
            String::from(SINGLETONS_FAMILY)
        } else {
            fields[0].to_string()
        };
        let sample_id = fields[1].to_string();

        if pedigree.links.contains_key(&sample_id) {
            bail!("duplicate sample id in {}: {}", src.display(), sample_id);
        }

        pedigree.links.insert(
            sample_id.clone(),
            PedigreeLinks {
                family_id: family_id.clone(),
                father: parent(fields[2]),
                mother: parent(fields[3]),
            },
        );

        pedigree.families.entry(family_id).or_default().push(sample_id);
    }

    if pedigree.links.is_empty() {
        bail!("{} contains no pedigree rows", src.display());
    }

    Ok(pedigree)
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use super::*;

    static PED: &str = "\
FAM1\tproband\tdad\tmum\t1\t2
FAM1\tdad\t0\t0\t1\t1
FAM1\tmum\t0\t0\t2\t1
0\tlone\t0\t0\t2\t1
";

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    pub fn test_links_and_families() {
        let file = write_fixture(PED);
        let pedigree = parse_ped(file.path()).unwrap();

        let proband = pedigree.links.get("proband").unwrap();
        assert_eq!(proband.father.as_deref(), Some("dad"));
        assert_eq!(proband.mother.as_deref(), Some("mum"));
        assert_eq!(proband.family_id, "FAM1");

        let dad = pedigree.links.get("dad").unwrap();
        assert_eq!(dad.father, None);

        assert_eq!(
            pedigree.families.get("FAM1").unwrap(),
            &["proband", "dad", "mum"]
        );
        assert_eq!(pedigree.families.get(SINGLETONS_FAMILY).unwrap(), &["lone"]);
    }

    #[test]
    pub fn test_family_of_singleton_is_empty() {
        let file = write_fixture(PED);
        let pedigree = parse_ped(file.path()).unwrap();

        assert_eq!(pedigree.family_of("proband").len(), 3);
        assert!(pedigree.family_of("lone").is_empty());
    }

    #[test]
    pub fn test_duplicate_sample_is_an_error() {
        let file = write_fixture("FAM1\ts1\t0\t0\t1\t1\nFAM1\ts1\t0\t0\t1\t1\n");
        assert!(parse_ped(file.path()).is_err());
    }

    #[test]
    pub fn test_short_row_is_an_error() {
        let file = write_fixture("FAM1\ts1\t0\t0\n");
        assert!(parse_ped(file.path()).is_err());
    }
}
