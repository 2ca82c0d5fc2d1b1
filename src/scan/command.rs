//! Functionality related to the `runqc scan` command itself.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use num_format::Locale;
use num_format::ToFormattedString;
use tracing::debug;
use tracing::info;

use crate::config::Config;
use crate::scan::scan_runs;
use crate::store::Store;

//========================//
// Command-line arguments //
//========================//

/// Command line arguments for `runqc scan`.
#[derive(Args)]
pub struct ScanArgs {
    /// Directory holding the raw sequencer run directories.
    #[arg(value_name = "RAW_DIR")]
    raw_dir: PathBuf,

    /// YAML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,
}

//==============//
// Main command //
//==============//

/// Main method for the `runqc scan` subcommand.
pub fn scan(args: ScanArgs) -> anyhow::Result<()> {
    info!("Starting scan command...");
    debug!("Arguments:");
    debug!("  [*] Raw data root: {}", args.raw_dir.display());
    debug!("  [*] Configuration: {}", args.config.display());

    let raw_dir = args.raw_dir;
    if !raw_dir.is_dir() {
        anyhow::bail!("raw data root {} is not a directory", raw_dir.display());
    }

    let config = Config::load(&args.config)?;
    let mut store = Store::load_or_new(&config.state_file)
        .with_context(|| format!("loading state from {}", config.state_file.display()))?;

    let summary = scan_runs(&raw_dir, &config, &mut store)?;
    store.save()?;

    info!(
        "Scanned {} runs ({} skipped), evaluated {} analyses.",
        summary.runs_seen.to_formatted_string(&Locale::en),
        summary.runs_skipped.to_formatted_string(&Locale::en),
        summary.analyses_evaluated.to_formatted_string(&Locale::en),
    );
    info!(
        "Inserted {} new metric records.",
        summary.metrics_inserted.to_formatted_string(&Locale::en),
    );

    Ok(())
}
