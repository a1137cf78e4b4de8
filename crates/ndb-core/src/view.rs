// ── Views ──
//
// A view is one entity kind, across every target or scoped to one:
// lookup by selector, lazy enumeration, drafting new records, and the
// report surfaces.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;

use ndb_api::{Attrs, Kind};

use crate::error::NdbError;
use crate::ndb::Ndb;
use crate::record::Record;
use crate::report::{self, Dump, Report};
use crate::schema;
use crate::store::Row;

// ── Selector ────────────────────────────────────────────────────────

/// How a lookup names an entity.
///
/// | kind      | `Name`                  | `Index`   |
/// |-----------|-------------------------|-----------|
/// | interface | `ifname`                | `index`   |
/// | address   | `addr/len` or `addr`    | `index`   |
/// | route     | `dst/len` or `default`  | `oif`     |
/// | neighbour | `dst`                   | `ifindex` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Name(String),
    Index(i64),
    Attrs(Attrs),
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Self::Name(value.to_owned())
    }
}

impl From<String> for Selector {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<i64> for Selector {
    fn from(value: i64) -> Self {
        Self::Index(value)
    }
}

impl From<Attrs> for Selector {
    fn from(value: Attrs) -> Self {
        Self::Attrs(value)
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "#{index}"),
            Self::Attrs(attrs) => {
                let parts: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// Canonical text of an IP address, or the input unchanged.
fn canonical_ip(text: &str) -> String {
    text.parse::<IpAddr>().map_or_else(|_| text.to_owned(), |ip| ip.to_string())
}

/// Split `addr/len`; a bare address yields no length.
fn split_prefix(text: &str) -> Result<(String, Option<i64>), NdbError> {
    match text.split_once('/') {
        None => Ok((canonical_ip(text), None)),
        Some((addr, len)) => {
            let len = len.parse::<i64>().map_err(|_| NdbError::InvalidRecord {
                message: format!("bad prefix length in {text}"),
            })?;
            Ok((canonical_ip(addr), Some(len)))
        }
    }
}

impl Selector {
    /// The store filter this selector stands for on `kind`.
    pub fn filter(&self, kind: Kind) -> Result<Attrs, NdbError> {
        Ok(match (self, kind) {
            (Self::Attrs(attrs), _) => attrs.clone(),
            (Self::Index(i), Kind::Interface | Kind::Address) => Attrs::new().with("index", *i),
            (Self::Index(i), Kind::Route) => Attrs::new().with("oif", *i),
            (Self::Index(i), Kind::Neighbour) => Attrs::new().with("ifindex", *i),
            (Self::Name(name), Kind::Interface) => Attrs::new().with("ifname", name.as_str()),
            (Self::Name(name), Kind::Address) => prefix_filter(name, "address", "prefixlen")?,
            (Self::Name(name), Kind::Route) if name == "default" => {
                Attrs::new().with("dst", "0.0.0.0").with("dst_len", 0)
            }
            (Self::Name(name), Kind::Route) => prefix_filter(name, "dst", "dst_len")?,
            (Self::Name(name), Kind::Neighbour) => Attrs::new().with("dst", canonical_ip(name)),
        })
    }
}

/// Filter for `addr/len`; a bare address leaves the length open.
fn prefix_filter(text: &str, addr_column: &str, len_column: &str) -> Result<Attrs, NdbError> {
    let (addr, len) = split_prefix(text)?;
    let mut filter = Attrs::new().with(addr_column, addr);
    if let Some(len) = len {
        filter.insert(len_column, len);
    }
    Ok(filter)
}

// ── View ────────────────────────────────────────────────────────────

/// Rows of one kind, across every target or scoped to one with
/// [`View::on`].
///
/// Reports and enumeration cover the view's scope. An unscoped lookup
/// prefers the default target and falls back to the first match on any
/// other; an unscoped draft is created on the default target.
#[derive(Debug, Clone)]
pub struct View {
    ndb: Ndb,
    kind: Kind,
    target: Option<String>,
}

impl View {
    pub(crate) fn new(ndb: Ndb, kind: Kind) -> Self {
        Self {
            ndb,
            kind,
            target: None,
        }
    }

    /// The same view scoped to one target.
    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The scoped target, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Where drafts from this view are created.
    fn owner(&self) -> String {
        self.target
            .clone()
            .unwrap_or_else(|| self.ndb.default_target().to_owned())
    }

    /// Look up one entity. Ambiguous selectors return the first row in key
    /// order.
    pub fn get(&self, selector: impl Into<Selector>) -> Result<Record, NdbError> {
        let selector = selector.into();
        let filter = selector.filter(self.kind)?;
        let store = self.ndb.store();
        let row = match &self.target {
            Some(target) => store.first(self.kind, Some(target), &filter)?,
            None => match store.first(self.kind, Some(self.ndb.default_target()), &filter)? {
                Some(row) => Some(row),
                None => store.first(self.kind, None, &filter)?,
            },
        }
        .ok_or_else(|| NdbError::not_found(self.kind, &selector))?;
        Ok(Record::existing(self.ndb.clone(), self.kind, row.target, row.attrs))
    }

    pub fn exists(&self, selector: impl Into<Selector>) -> Result<bool, NdbError> {
        match self.get(selector) {
            Ok(_) => Ok(true),
            Err(NdbError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A new record, created on the source by its first commit.
    pub fn add(&self, attrs: Attrs) -> Record {
        Record::draft(self.ndb.clone(), self.kind, self.owner(), attrs)
    }

    /// Every row as a record, read lazily one batch at a time.
    pub fn records(&self) -> Records {
        Records {
            ndb: self.ndb.clone(),
            kind: self.kind,
            target: self.target.clone(),
            batch: self.ndb.config().dump_batch_size.max(1),
            offset: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    pub fn count(&self) -> Result<usize, NdbError> {
        self.ndb.store().count(self.kind, self.target())
    }

    /// At-a-glance listing, bounded by the configured report size.
    pub fn summary(&self) -> Result<Report, NdbError> {
        Ok(report::summary(self.ndb.store(), self.kind, self.target())?
            .with_max_lines(self.ndb.config().max_report_lines))
    }

    /// Fixed-arity tuples of every row. Each call starts a fresh pass.
    pub fn dump(&self) -> Dump {
        Dump::new(
            Arc::clone(self.ndb.store()),
            self.kind,
            self.target.clone(),
            self.ndb.config().dump_batch_size,
        )
    }

    /// `dump()` as comma separated lines.
    pub fn csv(&self) -> Result<String, NdbError> {
        report::csv(self.dump())
    }

    /// Column names of `dump()` tuples.
    pub fn columns(&self) -> Vec<&'static str> {
        std::iter::once("target")
            .chain(schema::layout(self.kind).table.names())
            .collect()
    }
}

// ── Records iterator ────────────────────────────────────────────────

/// Lazy enumeration returned by [`View::records`].
pub struct Records {
    ndb: Ndb,
    kind: Kind,
    target: Option<String>,
    batch: usize,
    offset: usize,
    buffer: VecDeque<Row>,
    done: bool,
}

impl Iterator for Records {
    type Item = Result<Record, NdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            match self
                .ndb
                .store()
                .page(self.kind, self.target.as_deref(), self.offset, self.batch)
            {
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
        let row = self.buffer.pop_front()?;
        Some(Ok(Record::existing(self.ndb.clone(), self.kind, row.target, row.attrs)))
    }
}
