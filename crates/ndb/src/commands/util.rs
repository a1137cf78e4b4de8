//! Shared helpers for command handlers.

use ndb_core::report::csv_field;
use ndb_core::{Attrs, Kind, Ndb, Record, Selector, Value, View};

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::output;

/// The view of `kind` on the default target, which must be connected.
pub fn view(ndb: &Ndb, kind: Kind) -> Result<View, CliError> {
    let target = ndb.default_target();
    if ndb.sources().iter().any(|s| s.target == target) {
        Ok(ndb.view(kind).on(target))
    } else {
        Err(CliError::UnknownSource {
            target: target.to_owned(),
        })
    }
}

/// Command-line text to a typed value: `null`, integers, `true`/`false`,
/// anything else stays a string.
pub fn parse_value(text: &str) -> Value {
    if text == "null" {
        return Value::Null;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(text),
    }
}

pub fn attrs(pairs: &[(String, String)]) -> Attrs {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), parse_value(v)))
        .collect()
}

/// Bare integers select by index, everything else by name.
pub fn selector(text: &str) -> Selector {
    text.parse::<i64>()
        .map_or_else(|_| Selector::from(text), Selector::from)
}

/// One entity in the chosen format.
pub fn render_record(record: &Record, format: OutputFormat) -> Result<String, CliError> {
    let attrs = record.attrs();
    match format {
        OutputFormat::Table | OutputFormat::Summary => Ok(output::detail(record.target(), &attrs)),
        OutputFormat::Csv => Ok(attrs
            .iter()
            .map(|(k, v)| format!("{},{}", csv_field(k), csv_field(&v.to_string())))
            .collect::<Vec<_>>()
            .join("\n")),
        OutputFormat::Json | OutputFormat::Yaml => {
            output::render_structured(&output::json_attrs(record.target(), &attrs), format)
        }
        OutputFormat::Plain => Ok(record.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_typed() {
        assert_eq!(parse_value("1500"), Value::Int(1500));
        assert_eq!(parse_value("-1"), Value::Int(-1));
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("null"), Value::Null);
        assert_eq!(parse_value("52:54:00:12:34:56"), Value::from("52:54:00:12:34:56"));
    }

    #[test]
    fn selectors_pick_index_or_name() {
        assert_eq!(selector("3"), Selector::Index(3));
        assert_eq!(selector("eth0"), Selector::Name("eth0".into()));
        assert_eq!(selector("10.0.0.0/8"), Selector::Name("10.0.0.0/8".into()));
    }
}
