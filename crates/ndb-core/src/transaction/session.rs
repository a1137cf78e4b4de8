// ── Sessions ──
//
// Several records committed together. Records are ordered by the
// interfaces they reference: an interface being created or changed goes
// before the records pointing at it, an interface being removed goes after
// them. References are matched by index or by a staged interface name.

use std::collections::{HashMap, HashSet};

use ndb_api::{Kind, Value};
use tracing::info;

use crate::error::NdbError;
use crate::record::Record;
use crate::schema;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Ident {
    Index(i64),
    Name(String),
}

/// A multi-record transaction.
#[derive(Debug, Default)]
pub struct Session {
    records: Vec<Record>,
    /// Positions in the order the last commit reached them.
    committed: Vec<usize>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; returns its position.
    pub fn add(&mut self, record: Record) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn record(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }

    pub fn record_mut(&mut self, position: usize) -> Option<&mut Record> {
        self.records.get_mut(position)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Positions of the records in commit order.
    ///
    /// Fails with [`NdbError::DependencyCycle`] when the references form a
    /// loop; nothing has been sent at that point.
    pub fn order(&self) -> Result<Vec<usize>, NdbError> {
        let n = self.records.len();
        // before[i] holds every record that must be committed before i.
        let mut before: Vec<HashSet<usize>> = vec![HashSet::new(); n];

        for (i, referrer) in self.records.iter().enumerate() {
            let refs = references(referrer);
            for (j, referee) in self.records.iter().enumerate() {
                if i == j || referee.kind() != Kind::Interface {
                    continue;
                }
                if identities(referee).is_disjoint(&refs) {
                    continue;
                }
                match (referee.is_removing(), referrer.is_removing()) {
                    // Children leave before their parent is removed.
                    (true, _) => {
                        before[j].insert(i);
                    }
                    // Parents exist before their children are created.
                    (false, false) => {
                        before[i].insert(j);
                    }
                    (false, true) => {}
                }
            }
        }

        // Kahn's algorithm, lowest position first among the ready ones.
        let mut order = Vec::with_capacity(n);
        let mut done = vec![false; n];
        while order.len() < n {
            let ready = (0..n).find(|&i| !done[i] && before[i].iter().all(|&d| done[d]));
            let Some(next) = ready else {
                let stuck: Vec<String> = (0..n).filter(|&i| !done[i]).map(|i| self.records[i].label()).collect();
                return Err(NdbError::DependencyCycle {
                    path: stuck.join(" -> "),
                });
            };
            done[next] = true;
            order.push(next);
        }
        Ok(order)
    }

    /// Commit every record in dependency order, stopping at the first
    /// failure. Records committed before the failure stay committed.
    pub async fn commit(&mut self) -> Result<(), NdbError> {
        let order = self.order()?;
        info!(records = order.len(), "committing session");
        self.committed.clear();
        for i in order {
            if let Some(record) = self.records.get_mut(i) {
                self.committed.push(i);
                record.commit().await?;
            }
        }
        Ok(())
    }

    /// Roll every record back in the reverse of the order the last commit
    /// used, or of the current order when nothing was committed.
    ///
    /// Interfaces re-created along the way get new indices; records
    /// rolled back after them have their references rewritten to match.
    pub async fn rollback(&mut self) -> Result<(), NdbError> {
        let mut order = if self.committed.is_empty() {
            self.order()?
        } else {
            std::mem::take(&mut self.committed)
        };
        order.reverse();

        let mut remaps: HashMap<String, HashMap<i64, i64>> = HashMap::new();
        for i in order {
            if let Some(record) = self.records.get_mut(i) {
                let remap = remaps.entry(record.target().to_owned()).or_default();
                record.rollback_remapped(remap).await?;
            }
        }
        Ok(())
    }
}

/// Interfaces `record` points at through its reference columns.
fn references(record: &Record) -> HashSet<Ident> {
    let attrs = record.attrs();
    schema::layout(record.kind())
        .references()
        .filter_map(|name| match attrs.get(name)? {
            Value::Int(i) if *i != 0 => Some(Ident::Index(*i)),
            Value::Str(s) => Some(Ident::Name(s.clone())),
            _ => None,
        })
        .collect()
}

/// Every way another record may refer to the interface `record` holds.
fn identities(record: &Record) -> HashSet<Ident> {
    let mut ids = HashSet::new();
    for source in [record.snapshot(), record.pending()] {
        if let Some(i) = source.get_int("index") {
            ids.insert(Ident::Index(i));
        }
        if let Some(name) = source.get_str("ifname") {
            ids.insert(Ident::Name(name.to_owned()));
        }
    }
    ids
}
