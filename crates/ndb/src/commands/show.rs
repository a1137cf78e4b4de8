//! `ndb show`: list a view or one entity.

use ndb_core::{Value, View};

use super::util;
use crate::cli::{GlobalOpts, OutputFormat, ShowArgs};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ShowArgs, ndb: &ndb_core::Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    let view = util::view(ndb, args.view)?;
    let rendered = match &args.selector {
        Some(selector) => {
            let record = view.get(util::selector(selector))?;
            util::render_record(&record, global.format)?
        }
        None => render_view(&view, global.format)?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn render_view(view: &View, format: OutputFormat) -> Result<String, CliError> {
    let columns = view.columns();
    let rendered = match format {
        OutputFormat::Summary => view.summary()?.to_string().trim_end().to_owned(),
        OutputFormat::Csv => view.csv()?.trim_end().to_owned(),
        OutputFormat::Table => {
            let rows: Vec<Vec<Value>> = view.dump().collect::<Result<_, _>>()?;
            output::grid(&columns, &rows)
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let items = view
                .dump()
                .map(|row| row.map(|row| output::json_row(&columns, &row)))
                .collect::<Result<Vec<_>, _>>()?;
            output::render_structured(&items, format)?
        }
        OutputFormat::Plain => view
            .records()
            .map(|record| record.map(|r| r.label()))
            .collect::<Result<Vec<_>, _>>()?
            .join("\n"),
    };
    Ok(rendered)
}
