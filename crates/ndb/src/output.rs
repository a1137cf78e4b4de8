//! Output formatting: tables, JSON, YAML, plain.
//!
//! Views have dynamic columns, so tables are assembled with the `tabled`
//! builder. Structured formats flatten attribute values to plain JSON
//! scalars instead of the tagged wire form.

use std::io::{self, IsTerminal, Write};

use ndb_core::{Attrs, Value};
use owo_colors::OwoColorize;
use serde_json::{Map, Value as Json};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Color a lifecycle word: green when healthy, red when gone, yellow
/// otherwise.
pub fn paint_state(word: &str, color: bool) -> String {
    if !color {
        return word.to_owned();
    }
    match word {
        "synced" | "new" | "up" | "committed" => word.green().to_string(),
        "disconnected" | "del" | "down" | "removed" | "invalid" => word.red().to_string(),
        _ => word.yellow().to_string(),
    }
}

// ── Tables ───────────────────────────────────────────────────────────

/// A rounded table with `columns` as the header.
pub fn grid<C: AsRef<str>>(columns: &[C], rows: &[Vec<Value>]) -> String {
    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.as_ref().to_owned()));
    for row in rows {
        builder.push_record(row.iter().map(ToString::to_string));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// Two-column attribute/value table for a single entity.
pub fn detail(target: &str, attrs: &Attrs) -> String {
    let mut builder = Builder::default();
    builder.push_record(["target".to_owned(), target.to_owned()]);
    for (name, value) in attrs {
        builder.push_record([name.clone(), value.to_string()]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

// ── Structured output ────────────────────────────────────────────────

pub fn json_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int(i) => Json::from(*i),
        Value::Str(s) => Json::from(s.as_str()),
        Value::Bool(b) => Json::from(*b),
        Value::Bytes(_) => Json::from(value.to_string()),
    }
}

/// `{"target": .., attr: value, ..}` for one entity.
pub fn json_attrs(target: &str, attrs: &Attrs) -> Map<String, Json> {
    let mut map = Map::new();
    map.insert("target".into(), Json::from(target));
    for (name, value) in attrs {
        map.insert(name.clone(), json_value(value));
    }
    map
}

/// One row keyed by its column names.
pub fn json_row<C: AsRef<str>>(columns: &[C], row: &[Value]) -> Map<String, Json> {
    columns
        .iter()
        .zip(row)
        .map(|(c, v)| (c.as_ref().to_owned(), json_value(v)))
        .collect()
}

/// Render serializable data as pretty JSON or YAML; other formats are the
/// caller's business and fall back to JSON.
pub fn render_structured<T: serde::Serialize + ?Sized>(
    data: &T,
    format: OutputFormat,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(data)?.trim_end().to_owned()),
        _ => Ok(serde_json::to_string_pretty(data)?),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
