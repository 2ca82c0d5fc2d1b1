//! Functionality related to the `runqc list` command itself.

use anyhow::bail;
use clap::builder::PossibleValuesParser;
use clap::Args;
use prettytable::row;
use prettytable::Table;

use crate::autoqc::CheckKind;
use crate::monitors::Dialect;

//========================//
// Command-line arguments //
//========================//

/// Command line arguments for `runqc list`.
#[derive(Args)]
pub struct ListArgs {
    /// The subject which you want to list values for.
    #[arg(value_parser = PossibleValuesParser::new(["checks", "dialects"]))]
    subject: String,
}

//==============//
// Main command //
//==============//

/// Main method for the `runqc list` subcommand.
pub fn list(args: ListArgs) -> anyhow::Result<()> {
    match args.subject.as_str() {
        "checks" => {
            let mut table = Table::new();

            table.add_row(row!["Name", "Description"]);
            for check in CheckKind::all() {
                table.add_row(row![check.name(), check.description()]);
            }

            table.printstd();

            Ok(())
        }
        "dialects" => {
            let mut table = Table::new();

            table.add_row(row!["Name"]);
            for dialect in Dialect::all() {
                table.add_row(row![dialect.name()]);
            }

            table.printstd();

            Ok(())
        }
        s => bail!("Unsupported subject: {}", s),
    }
}
