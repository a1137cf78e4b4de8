//! `ndb query`: diagnostic SQL against the store.

use ndb_core::report::csv_field;
use ndb_core::{Ndb, Report};

use crate::cli::{GlobalOpts, OutputFormat, QueryArgs};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &QueryArgs, ndb: &Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    let result = ndb.query(&args.sql)?;
    let rendered = match global.format {
        OutputFormat::Table => output::grid(&result.columns, &result.rows),
        OutputFormat::Summary => Report::from(result)
            .with_max_lines(ndb.config().max_report_lines)
            .to_string()
            .trim_end()
            .to_owned(),
        OutputFormat::Csv => result
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| csv_field(&v.to_string()))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json | OutputFormat::Yaml => {
            let items: Vec<_> = result
                .rows
                .iter()
                .map(|row| output::json_row(&result.columns, row))
                .collect();
            output::render_structured(&items, global.format)?
        }
        OutputFormat::Plain => result
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
