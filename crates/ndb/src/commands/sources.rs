//! `ndb sources`: connected targets and their lifecycle.

use ndb_core::{Ndb, SourceInfo};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Connected")]
    connected: String,
    #[tabled(rename = "Synced")]
    synced: String,
}

fn to_row(info: &SourceInfo, color: bool) -> SourceRow {
    SourceRow {
        target: info.target.clone(),
        channel: info.channel.clone(),
        state: output::paint_state(&info.status.state.to_string(), color),
        connected: info.status.connected_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        synced: info
            .status
            .synced_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
    }
}

pub fn handle(ndb: &Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    let sources = ndb.sources();
    let rendered = match global.format {
        OutputFormat::Json | OutputFormat::Yaml => output::render_structured(&sources, global.format)?,
        OutputFormat::Plain | OutputFormat::Csv => sources
            .iter()
            .map(|s| format!("{},{}", s.target, s.status.state))
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Table | OutputFormat::Summary => {
            let color = output::should_color(global.color);
            let rows: Vec<SourceRow> = sources.iter().map(|s| to_row(s, color)).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
