//! Functionality related to the `runqc check` command itself.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::debug;

use crate::autoqc::passes_auto_qc;
use crate::config::Config;
use crate::model::RunAnalysisKey;
use crate::store::Store;

//========================//
// Command-line arguments //
//========================//

/// Command line arguments for `runqc check`.
#[derive(Args)]
pub struct CheckArgs {
    /// Run identifier.
    #[arg(value_name = "RUN_ID")]
    run_id: String,

    /// Pipeline name and version, e.g. `GermlineEnrichment-2.5.3`.
    #[arg(short, long, value_name = "PIPELINE")]
    pipeline: String,

    /// Analysis type (panel) name.
    #[arg(short, long, value_name = "ANALYSIS")]
    analysis: String,

    /// YAML configuration file (supplies the state file location).
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,

    /// JSON state file, overriding the configured location.
    #[arg(short, long, value_name = "PATH")]
    state: Option<PathBuf>,
}

//==============//
// Main command //
//==============//

/// Main method for the `runqc check` subcommand.
pub fn check(args: CheckArgs) -> anyhow::Result<()> {
    debug!("Arguments:");
    debug!("  [*] Run: {}", args.run_id);
    debug!("  [*] Pipeline: {}", args.pipeline);
    debug!("  [*] Analysis type: {}", args.analysis);

    let config = Config::load(&args.config)?;
    let state_file = args.state.unwrap_or_else(|| config.state_file.clone());
    let store = Store::load_or_new(&state_file)
        .with_context(|| format!("loading state from {}", state_file.display()))?;

    let key = RunAnalysisKey {
        run_id: args.run_id,
        pipeline: args.pipeline,
        analysis_type: args.analysis,
    };

    let (passed, reasons) = passes_auto_qc(&store, &key)?;

    if passed {
        println!("{}: PASS", key);
    } else {
        println!("{}: FAIL", key);
    }

    for reason in reasons {
        println!("  {}", reason);
    }

    Ok(())
}
