//! Functionality related to the `runqc parse` command itself.

use std::path::PathBuf;

use anyhow::bail;
use clap::builder::PossibleValuesParser;
use clap::Args;
use serde_json::json;
use serde_json::Value;

use crate::parsers;
use crate::parsers::fastqc::FastqcNaming;

/// The format names `runqc parse` understands.
const FORMATS: &[&str] = &[
    "hs_metrics",
    "duplication_metrics",
    "insert_metrics",
    "alignment_metrics",
    "variant_detail_metrics",
    "qc",
    "contamination",
    "depth",
    "dragen_mapping",
    "dragen_wgs_coverage",
    "dragen_ploidy",
    "dragen_prefilter",
    "fastqc",
    "sensitivity",
    "fusion_contamination",
    "fusion_alignment",
    "pedigree",
    "variant_counts",
];

//========================//
// Command-line arguments //
//========================//

/// Command line arguments for `runqc parse`.
#[derive(Args)]
pub struct ParseArgs {
    /// The file format to parse.
    #[arg(value_parser = PossibleValuesParser::new(FORMATS))]
    format: String,

    /// The file to parse.
    #[arg(value_name = "PATH")]
    src: PathBuf,

    /// Fastq filename convention for the `fastqc` format.
    #[arg(long, value_parser = PossibleValuesParser::new(["legacy", "tso500", "cruk"]),
          default_value = "legacy")]
    naming: String,

    /// Comma-separated sample list for the `variant_counts` format.
    #[arg(long, value_name = "SAMPLES")]
    samples: Option<String>,
}

//==============//
// Main command //
//==============//

fn naming_from_arg(naming: &str) -> FastqcNaming {
    match naming {
        "tso500" => FastqcNaming::Tso500,
        "cruk" => FastqcNaming::Cruk,
        _ => FastqcNaming::Legacy,
    }
}

/// Main method for the `runqc parse` subcommand.
pub fn parse(args: ParseArgs) -> anyhow::Result<()> {
    let src = &args.src;

    let output: Value = match args.format.as_str() {
        "hs_metrics" => json!(parsers::picard::parse_hs_metrics(src)?),
        "duplication_metrics" => json!(parsers::picard::parse_duplication_metrics(src)?),
        "insert_metrics" => json!(parsers::picard::parse_insert_metrics(src)?),
        "alignment_metrics" => json!(parsers::picard::parse_alignment_metrics(src)?),
        "variant_detail_metrics" => json!(parsers::picard::parse_variant_detail_metrics(src)?),
        "qc" => json!(parsers::tabular::parse_qc_metrics(src)?),
        "contamination" => json!(parsers::tabular::parse_contamination_metrics(src)?),
        "depth" => json!(parsers::tabular::parse_depth_summary(src)?),
        "dragen_mapping" => json!(parsers::dragen::parse_section_flat(
            src,
            parsers::dragen::MAPPING_SECTION
        )?),
        "dragen_wgs_coverage" => json!(parsers::dragen::parse_wgs_coverage_metrics(src)?),
        "dragen_ploidy" => json!(parsers::dragen::parse_section_flat(
            src,
            parsers::dragen::PLOIDY_SECTION
        )?),
        "dragen_prefilter" => json!(parsers::dragen::parse_section_per_sample(
            src,
            parsers::dragen::PREFILTER_SECTION
        )?),
        "fastqc" => {
            let summaries =
                parsers::fastqc::parse_fastqc_status(src, naming_from_arg(&args.naming))?;
            Value::Array(
                summaries
                    .into_iter()
                    .map(|s| {
                        json!({
                            "sample_id": s.sample_id,
                            "lane": s.lane,
                            "read_number": s.read_number,
                            "statuses": s.statuses,
                        })
                    })
                    .collect(),
            )
        }
        "sensitivity" => json!(parsers::sensitivity::parse_sensitivity_report(src)?),
        "fusion_contamination" => Value::Array(
            parsers::fusion::parse_fusion_contamination(src)?
                .into_iter()
                .map(|row| {
                    json!({
                        "sample_id": row.sample_id,
                        "contamination": row.contamination,
                        "contamination_referral": row.contamination_referral,
                    })
                })
                .collect(),
        ),
        "fusion_alignment" => Value::Array(
            parsers::fusion::parse_fusion_alignment(src)?
                .into_iter()
                .map(|row| {
                    json!({
                        "sample_id": row.sample_id,
                        "pct_reads_aligned": row.pct_reads_aligned,
                        "unique_reads_aligned": row.unique_reads_aligned,
                    })
                })
                .collect(),
        ),
        "pedigree" => {
            let pedigree = parsers::pedigree::parse_ped(src)?;
            let links: serde_json::Map<String, Value> = pedigree
                .links
                .iter()
                .map(|(sample, links)| {
                    (
                        sample.clone(),
                        json!({
                            "family_id": links.family_id,
                            "father": links.father,
                            "mother": links.mother,
                        }),
                    )
                })
                .collect();
            json!({ "links": links, "families": pedigree.families })
        }
        "variant_counts" => {
            let samples: Vec<String> = match &args.samples {
                Some(samples) => samples
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
                None => bail!("the variant_counts format requires --samples"),
            };

            json!(parsers::vcf::get_passing_variant_counts(src, &samples)?)
        }
        format => bail!("Unsupported format: {}", format),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
