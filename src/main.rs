use clap::Parser;
use clap::Subcommand;
use git_testament::git_testament;
use git_testament::render_testament;

use runqc::check::command::check;
use runqc::check::command::CheckArgs;
use runqc::list::command::list;
use runqc::list::command::ListArgs;
use runqc::parse::command::parse;
use runqc::parse::command::ParseArgs;
use runqc::scan::command::scan;
use runqc::scan::command::ScanArgs;

git_testament!(TESTAMENT);

/// Command line tool for tracking completion and quality control of
/// next-generation sequencing pipeline runs.
#[derive(Parser)]
#[command(name = "runqc", version = render_testament!(TESTAMENT), propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Only errors are printed to the stderr stream.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// All available information, including debug information, is printed
    /// to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scans a raw data root and updates the tracking state.
    Scan(ScanArgs),

    /// Evaluates the auto-QC verdict for one run analysis.
    Check(CheckArgs),

    /// Runs a single metric-file parser and dumps the result as JSON.
    Parse(ParseArgs),

    /// Lists supported auto-QC checks or pipeline dialects.
    List(ListArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut level = tracing::Level::INFO;
    if cli.quiet {
        level = tracing::Level::ERROR;
    } else if cli.verbose {
        level = tracing::Level::DEBUG;
    }

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::Scan(args) => scan(args),
        Commands::Check(args) => check(args),
        Commands::Parse(args) => parse(args),
        Commands::List(args) => list(args),
    }
}
