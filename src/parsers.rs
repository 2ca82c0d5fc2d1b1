//! Parsers for the metric file formats produced by sequencers and
//! bioinformatics pipelines.
//!
//! # Overview
//!
//! Every parser in this module follows the same contract: given a readable
//! path, return a normalized key→value mapping (or a mapping of sample id to
//! such a mapping, or a list of mappings for multi-row formats). Parsers
//! normalize *representation* only — header text is funneled through
//! [`normalise_key`][crate::utils::text::normalise_key] — and never validate
//! business thresholds.
//!
//! Values are returned as the raw strings read from the file. The sentinel
//! values `'?'`, `''`, `'NA'` and `'inf'` are collapsed to null by the calling
//! layer via [`sanitize_map`][crate::utils::text::sanitize_map], not here.
//! Keeping the two stages apart means a parser can be pointed at any file of
//! its format and report exactly what the file said, while ingestion decides
//! what "no value" means.

pub mod dragen;
pub mod fastqc;
pub mod fusion;
pub mod interop;
pub mod pedigree;
pub mod picard;
pub mod sensitivity;
pub mod tabular;
pub mod vcf;

use indexmap::IndexMap;

/// A single parsed metrics record: normalized keys mapped to the raw string
/// values read from the file.
pub type RawMetrics = IndexMap<String, String>;
