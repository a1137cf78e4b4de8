// ── Reports ──
//
// Textual surfaces over the store: a bounded summary table, a lazy
// fixed-arity dump, and CSV rendered from the dump.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use ndb_api::{Kind, Value};
use serde::Serialize;

use crate::error::NdbError;
use crate::schema::{self, column};
use crate::store::{QueryResult, Store};

/// Marker line closing a truncated report.
pub const TRUNCATION_MARKER: &str = "(...)";

// ── Report ──────────────────────────────────────────────────────────

/// A header plus rows, rendered with at most `max_lines` data lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    #[serde(skip)]
    max_lines: usize,
}

impl Report {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            max_lines: usize::MAX,
        }
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when rendering drops rows.
    pub fn truncated(&self) -> bool {
        self.rows.len() > self.max_lines
    }

    /// The rows that make it into the rendered text.
    pub fn visible(&self) -> &[Vec<Value>] {
        &self.rows[..self.rows.len().min(self.max_lines)]
    }
}

impl From<QueryResult> for Report {
    fn from(result: QueryResult) -> Self {
        Self::new(result.columns, result.rows)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .visible()
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |fields: &[String]| -> String {
            let last = fields.len().saturating_sub(1);
            let mut out = String::new();
            for (i, (field, &width)) in fields.iter().zip(&widths).enumerate() {
                if i == last {
                    out.push_str(field);
                } else {
                    out.push_str(&format!("{field:<width$}  "));
                }
            }
            out.trim_end().to_owned()
        };

        writeln!(f, "{}", line(&self.columns))?;
        for row in &cells {
            writeln!(f, "{}", line(row))?;
        }
        if self.truncated() {
            writeln!(f, "{TRUNCATION_MARKER}")?;
        }
        Ok(())
    }
}

// ── Summary ─────────────────────────────────────────────────────────

fn summary_sql(kind: Kind) -> &'static str {
    match kind {
        Kind::Interface => {
            r#"SELECT f_target AS target, f_index AS "index", f_ifname AS ifname,
                      f_address AS address, f_state AS state, f_kind AS kind
               FROM interfaces
               WHERE (?1 IS NULL OR f_target = ?1)
               ORDER BY f_target, f_index"#
        }
        Kind::Address => {
            r#"SELECT a.f_target AS target, i.f_ifname AS ifname,
                      a.f_address AS address, a.f_prefixlen AS prefixlen
               FROM addresses a
               LEFT JOIN interfaces i ON i.f_target = a.f_target AND i.f_index = a.f_index
               WHERE (?1 IS NULL OR a.f_target = ?1)
               ORDER BY a.f_target, a.f_index, a.f_address, a.f_prefixlen"#
        }
        Kind::Route => {
            r#"SELECT f_target AS target, f_table AS "table", f_dst AS dst, f_dst_len AS dst_len,
                      f_gateway AS gateway, f_oif AS oif
               FROM routes
               WHERE (?1 IS NULL OR f_target = ?1)
               ORDER BY f_target, f_table, f_dst, f_dst_len"#
        }
        Kind::Neighbour => {
            r#"SELECT f_target AS target, f_ifindex AS ifindex, f_dst AS dst,
                      f_lladdr AS lladdr, f_state AS state
               FROM neighbours
               WHERE (?1 IS NULL OR f_target = ?1)
               ORDER BY f_target, f_ifindex, f_dst"#
        }
    }
}

/// At-a-glance listing of `kind`, for one target or all of them.
pub fn summary(store: &Store, kind: Kind, target: Option<&str>) -> Result<Report, NdbError> {
    Ok(store.query(summary_sql(kind), &[Value::from(target)])?.into())
}

// ── Dump ────────────────────────────────────────────────────────────

/// Lazy sequence of fixed-arity tuples: the owning target followed by
/// every column of the kind's main table, in key order.
///
/// Rows are read in batches, each under the store lock. Cloning an
/// unstarted dump gives an independent pass.
#[derive(Debug, Clone)]
pub struct Dump {
    store: Arc<Store>,
    kind: Kind,
    target: Option<String>,
    batch: usize,
    offset: usize,
    buffer: VecDeque<Vec<Value>>,
    done: bool,
}

impl Dump {
    pub fn new(store: Arc<Store>, kind: Kind, target: Option<String>, batch: usize) -> Self {
        Self {
            store,
            kind,
            target,
            batch: batch.max(1),
            offset: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Names of the tuple fields.
    pub fn columns(&self) -> Vec<String> {
        std::iter::once("target".to_owned())
            .chain(schema::layout(self.kind).table.names().map(str::to_owned))
            .collect()
    }

    /// Every tuple has this many fields.
    pub fn arity(&self) -> usize {
        1 + schema::layout(self.kind).table.columns.len()
    }

    fn fetch(&self) -> Result<Vec<Vec<Value>>, NdbError> {
        let table = schema::layout(self.kind).table;
        let fields: Vec<String> = std::iter::once("f_target".to_owned())
            .chain(table.names().map(column))
            .collect();
        let order: Vec<String> = std::iter::once("f_target".to_owned())
            .chain(table.keys().map(column))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE (?1 IS NULL OR f_target = ?1) ORDER BY {} LIMIT ?2 OFFSET ?3",
            fields.join(", "),
            table.name,
            order.join(", ")
        );
        let params = [
            Value::from(self.target.as_deref()),
            Value::Int(i64::try_from(self.batch).unwrap_or(i64::MAX)),
            Value::Int(i64::try_from(self.offset).unwrap_or(i64::MAX)),
        ];
        Ok(self.store.query(&sql, &params)?.rows)
    }
}

impl Iterator for Dump {
    type Item = Result<Vec<Value>, NdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            match self.fetch() {
                Ok(rows) => {
                    self.done = rows.len() < self.batch;
                    self.offset += rows.len();
                    self.buffer.extend(rows);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

// ── CSV ─────────────────────────────────────────────────────────────

/// Escape a field so a line always splits on `,` into the tuple arity.
/// Separators and line breaks are percent-encoded, and so is `%` itself,
/// so the original text is recoverable. Plain values pass through.
pub fn csv_field(text: &str) -> String {
    if !text.contains(['%', ',', '\n', '\r']) {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len() + 6);
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            ',' => out.push_str("%2C"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            c => out.push(c),
        }
    }
    out
}

/// One CSV line per tuple, no header.
pub fn csv(dump: Dump) -> Result<String, NdbError> {
    let mut out = String::new();
    for row in dump {
        let fields: Vec<String> = row?.iter().map(|v| csv_field(&v.to_string())).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndb_api::{Attrs, Event};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Storage;

    fn store(links: i64) -> Arc<Store> {
        let store = Store::open(&Storage::Memory).unwrap();
        for index in 1..=links {
            store
                .apply(
                    "localhost",
                    &Event::new(
                        Kind::Interface,
                        Attrs::new()
                            .with("index", index)
                            .with("ifname", format!("d{index}"))
                            .with("kind", "dummy")
                            .with("state", "down"),
                    ),
                )
                .unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn renders_header_rows_and_marker() {
        let report = Report::new(
            vec!["target".into(), "index".into(), "ifname".into()],
            vec![
                vec![Value::from("localhost"), Value::Int(1), Value::from("lo")],
                vec![Value::from("localhost"), Value::Int(2), Value::from("eth0")],
            ],
        )
        .with_max_lines(1);

        insta::assert_snapshot!(report.to_string(), @r"
        target     index  ifname
        localhost  1      lo
        (...)
        ");
    }

    #[test]
    fn line_count_follows_limit() {
        let store = store(5);
        let report = summary(&store, Kind::Interface, Some("localhost")).unwrap();
        assert_eq!(report.len(), 5);

        assert_eq!(report.clone().with_max_lines(3).to_string().lines().count(), 1 + 3 + 1);
        assert_eq!(report.clone().with_max_lines(5).to_string().lines().count(), 1 + 5);
        assert_eq!(report.with_max_lines(9).to_string().lines().count(), 1 + 5);
    }

    #[test]
    fn summary_columns_per_kind() {
        let store = store(1);
        let report = summary(&store, Kind::Route, None).unwrap();
        assert_eq!(report.columns(), ["target", "table", "dst", "dst_len", "gateway", "oif"]);
        assert!(report.is_empty());
    }

    #[test]
    fn dump_batches_keep_arity() {
        let store = store(7);
        let dump = Dump::new(Arc::clone(&store), Kind::Interface, None, 3);
        let arity = dump.arity();
        let rows: Vec<_> = dump.clone().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|r| r.len() == arity));

        // A clone taken before iteration is a fresh pass.
        assert_eq!(dump.count(), 7);
    }

    #[test]
    fn csv_lines_split_into_arity() {
        let store = store(2);
        let dump = Dump::new(Arc::clone(&store), Kind::Interface, Some("localhost".into()), 10);
        let arity = dump.arity();
        let text = csv(dump).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.split(',').count() == arity));
        assert!(text.starts_with("localhost,1,d1,dummy,down,"));
    }

    #[test]
    fn csv_escapes_only_when_needed() {
        assert_eq!(csv_field("eth0"), "eth0");
        assert_eq!(csv_field("say \"hi\""), "say \"hi\"");
        assert_eq!(csv_field("a,b"), "a%2Cb");
        assert_eq!(csv_field("50%,\n"), "50%25%2C%0A");
    }

    #[test]
    fn csv_separator_in_a_field_keeps_arity() {
        let store = store(1);
        store
            .apply(
                "localhost",
                &Event::new(
                    Kind::Interface,
                    Attrs::new().with("index", 2).with("ifname", "a,b").with("kind", "dummy"),
                ),
            )
            .unwrap();
        let dump = Dump::new(Arc::clone(&store), Kind::Interface, None, 10);
        let arity = dump.arity();
        let text = csv(dump).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.split(',').count() == arity));
        assert!(text.lines().nth(1).unwrap().starts_with("localhost,2,a%2Cb,dummy,"));
    }
}
