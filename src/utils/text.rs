//! Utilities for normalizing header text and metric values.
//!
//! Every metric file parser in this crate funnels its header/label text
//! through [`normalise_key`] so that downstream consumers (the store, the
//! auto-QC evaluator) can rely on one key style regardless of the source
//! format. Value sanitization is deliberately a *separate* step
//! ([`sanitize_value`]): parsers return the raw strings they read, and the
//! ingestion boundary decides which sentinels collapse to null.

/// Normalizes a header or metric label into a stable key.
///
/// The rules, applied in order: lowercase; `%` becomes the literal token
/// `pct`; spaces become underscores; any remaining character that is not
/// `[a-z0-9_]` is removed; runs of underscores are collapsed; leading and
/// trailing underscores are trimmed.
///
/// ```
/// use runqc::utils::text::normalise_key;
///
/// assert_eq!(normalise_key("PCT_TARGET_BASES_20X"), "pct_target_bases_20x");
/// assert_eq!(normalise_key("Aligned bases in genome (%)"), "aligned_bases_in_genome_pct");
/// assert_eq!(normalise_key("MEAN INSERT SIZE"), "mean_insert_size");
/// ```
pub fn normalise_key(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace('%', "pct").replace(' ', "_");

    let mut key = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            'a'..='z' | '0'..='9' => key.push(c),
            '_' => {
                if !key.ends_with('_') {
                    key.push('_');
                }
            }
            _ => {}
        }
    }

    key.trim_matches('_').to_string()
}

/// The sentinel strings that the ingestion boundary treats as "no value".
pub const NULL_SENTINELS: &[&str] = &["?", "", "NA", "inf"];

/// Maps a raw metric value onto `None` if it is one of the null sentinels,
/// otherwise passes the string through untouched.
pub fn sanitize_value(raw: &str) -> Option<String> {
    if NULL_SENTINELS.contains(&raw) {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Applies [`sanitize_value`] across a whole parsed mapping.
pub fn sanitize_map(
    raw: indexmap::IndexMap<String, String>,
) -> indexmap::IndexMap<String, Option<String>> {
    raw.into_iter()
        .map(|(k, v)| {
            let sanitized = sanitize_value(&v);
            (k, sanitized)
        })
        .collect()
}

/// Indicates whether a sample name denotes a "no template control". These are
/// identified purely by naming convention and receive relaxed validity rules
/// in several pipeline dialects.
pub fn is_ntc(sample: &str) -> bool {
    sample.contains("NTC") || sample.contains("ntc")
}
