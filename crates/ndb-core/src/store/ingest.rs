// ── Event application ──
//
// Create-or-replace on `New`, delete on `Del`, keyed by (target, key).
// Deleting an interface also purges everything that references it for
// the same target, so the replica converges even when a source does not
// report the dependent removals itself.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use tracing::{debug, warn};

use ndb_api::{Attrs, Event, EventAction, Kind, Value};

use super::{Store, to_sql};
use crate::error::NdbError;
use crate::schema::{self, TableDef, column};

/// Key tuples seen per kind during a dump, for mark-and-sweep.
pub type SeenKeys = HashMap<Kind, HashSet<Vec<Value>>>;

impl Store {
    /// Apply one event for `target`. Returns `false` when the event was
    /// malformed and dropped.
    pub fn apply(&self, target: &str, event: &Event) -> Result<bool, NdbError> {
        let layout = schema::layout(event.kind);
        let Some(key) = layout.table.key_of(&event.attrs) else {
            warn!(%target, kind = %event.kind, attrs = ?event.attrs, "dropping event without key attributes");
            return Ok(false);
        };

        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        match event.action {
            EventAction::New => {
                upsert(&tx, layout.table, target, &event.attrs)?;
                if event.kind == Kind::Interface {
                    let link_kind = event.attrs.get_str("kind");
                    for augment in layout.augments {
                        if link_kind == Some(augment.link_kind) {
                            upsert(&tx, augment.table, target, &event.attrs)?;
                        } else {
                            delete_key(&tx, augment.table, target, &key)?;
                        }
                    }
                }
            }
            EventAction::Del => {
                if event.kind == Kind::Interface {
                    if let Some(index) = key.first().and_then(Value::as_int) {
                        purge_interface(&tx, target, index)?;
                    }
                } else {
                    delete_key(&tx, layout.table, target, &key)?;
                }
            }
        }
        tx.commit()?;
        Ok(true)
    }

    /// Delete every row owned by `target`. Returns the number of rows removed.
    pub fn purge_target(&self, target: &str) -> Result<usize, NdbError> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let mut removed = 0;
        for table in schema::TABLES {
            removed += tx.execute(
                &format!("DELETE FROM {} WHERE f_target = ?1", table.name),
                [target],
            )?;
        }
        tx.commit()?;
        debug!(%target, removed, "purged target rows");
        Ok(removed)
    }

    /// Remove rows of `target` whose keys were not seen in the latest dump.
    /// Returns a `Del` event per removed row, in dependency-safe order.
    pub fn sweep(&self, target: &str, seen: &SeenKeys) -> Result<Vec<Event>, NdbError> {
        let _guard = self.lock();
        let mut stale = Vec::new();

        // Dependents first so an interface sweep never reports them twice.
        for kind in [Kind::Neighbour, Kind::Route, Kind::Address, Kind::Interface] {
            let layout = schema::layout(kind);
            let empty = HashSet::new();
            let keys = seen.get(&kind).unwrap_or(&empty);
            for row in self.select(kind, Some(target), &Attrs::new())? {
                let present = layout
                    .table
                    .key_of(&row.attrs)
                    .is_some_and(|k| keys.contains(&k));
                if !present {
                    stale.push(Event::del(kind, row.attrs));
                }
            }
        }

        for event in &stale {
            self.apply(target, event)?;
        }
        if !stale.is_empty() {
            debug!(%target, removed = stale.len(), "swept stale rows");
        }
        Ok(stale)
    }
}

fn upsert(conn: &Connection, table: &TableDef, target: &str, attrs: &Attrs) -> Result<(), NdbError> {
    let names: Vec<&str> = table.names().collect();
    let columns: Vec<String> = std::iter::once("f_target".to_owned())
        .chain(names.iter().map(|n| column(n)))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders.join(", ")
    );

    let values = std::iter::once(Value::from(target))
        .chain(names.iter().map(|n| attrs.get(n).cloned().unwrap_or_default()));
    conn.execute(&sql, rusqlite::params_from_iter(values.map(|v| to_sql(&v))))?;
    Ok(())
}

fn delete_key(conn: &Connection, table: &TableDef, target: &str, key: &[Value]) -> Result<usize, NdbError> {
    let mut clauses = vec!["f_target = ?1".to_owned()];
    clauses.extend(
        table
            .keys()
            .enumerate()
            .map(|(i, k)| format!("{} = ?{}", column(k), i + 2)),
    );
    let sql = format!("DELETE FROM {} WHERE {}", table.name, clauses.join(" AND "));

    let values = std::iter::once(Value::from(target)).chain(key.iter().cloned());
    Ok(conn.execute(&sql, rusqlite::params_from_iter(values.map(|v| to_sql(&v))))?)
}

/// Remove an interface, its augmentation rows, and every row that
/// references it.
fn purge_interface(conn: &Connection, target: &str, index: i64) -> Result<(), NdbError> {
    let mut removed = 0;
    for (kind, reference) in schema::dependents() {
        removed += conn.execute(
            &format!(
                "DELETE FROM {} WHERE f_target = ?1 AND {} = ?2",
                schema::layout(kind).table.name,
                column(reference)
            ),
            rusqlite::params![target, index],
        )?;
    }
    let layout = schema::layout(Kind::Interface);
    for augment in layout.augments {
        delete_key(conn, augment.table, target, &[Value::Int(index)])?;
    }
    delete_key(conn, layout.table, target, &[Value::Int(index)])?;

    if removed > 0 {
        debug!(%target, index, removed, "purged interface dependents");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Storage;

    fn store() -> Store {
        Store::open(&Storage::Memory).unwrap()
    }

    fn link(index: i64, ifname: &str, kind: &str) -> Attrs {
        Attrs::new()
            .with("index", index)
            .with("ifname", ifname)
            .with("kind", kind)
            .with("state", "down")
    }

    fn addr(index: i64, address: &str) -> Attrs {
        Attrs::new()
            .with("index", index)
            .with("address", address)
            .with("prefixlen", 24)
    }

    #[test]
    fn new_replaces_existing_row() {
        let store = store();
        store.apply("t", &Event::new(Kind::Interface, link(2, "a", "dummy"))).unwrap();
        store
            .apply("t", &Event::new(Kind::Interface, link(2, "a", "dummy").with("state", "up")))
            .unwrap();

        let rows = store.select(Kind::Interface, Some("t"), &Attrs::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attrs.get_str("state"), Some("up"));
    }

    #[test]
    fn malformed_events_are_dropped() {
        let store = store();
        let applied = store
            .apply("t", &Event::new(Kind::Address, Attrs::new().with("address", "10.0.0.1")))
            .unwrap();
        assert!(!applied);
        assert_eq!(store.count(Kind::Address, None).unwrap(), 0);
    }

    #[test]
    fn interface_delete_purges_dependents_of_that_target_only() {
        let store = store();
        for target in ["a", "b"] {
            store.apply(target, &Event::new(Kind::Interface, link(2, "d0", "dummy"))).unwrap();
            store.apply(target, &Event::new(Kind::Address, addr(2, "10.0.0.1"))).unwrap();
            store
                .apply(
                    target,
                    &Event::new(
                        Kind::Neighbour,
                        Attrs::new().with("ifindex", 2).with("dst", "10.0.0.9").with("lladdr", "02:00:00:00:00:09"),
                    ),
                )
                .unwrap();
        }

        store.apply("a", &Event::del(Kind::Interface, Attrs::new().with("index", 2))).unwrap();

        assert_eq!(store.count(Kind::Address, Some("a")).unwrap(), 0);
        assert_eq!(store.count(Kind::Neighbour, Some("a")).unwrap(), 0);
        assert_eq!(store.count(Kind::Address, Some("b")).unwrap(), 1);
        assert_eq!(store.count(Kind::Interface, Some("b")).unwrap(), 1);
    }

    #[test]
    fn augment_rows_follow_link_kind() {
        let store = store();
        store
            .apply(
                "t",
                &Event::new(Kind::Interface, link(3, "br0", "bridge").with("stp_state", 1).with("forward_delay", 1500)),
            )
            .unwrap();

        let row = store.find(Kind::Interface, "t", &Attrs::new().with("index", 3)).unwrap().unwrap();
        assert_eq!(row.get_int("stp_state"), Some(1));
        assert!(!row.contains("vlan_id"));

        let bridges = store.query("SELECT COUNT(*) FROM bridge", &[]).unwrap();
        assert_eq!(bridges.rows[0][0], Value::Int(1));
    }

    #[test]
    fn sweep_removes_keys_missing_from_dump() {
        let store = store();
        store.apply("t", &Event::new(Kind::Interface, link(2, "keep", "dummy"))).unwrap();
        store.apply("t", &Event::new(Kind::Interface, link(3, "gone", "dummy"))).unwrap();
        store.apply("other", &Event::new(Kind::Interface, link(3, "gone", "dummy"))).unwrap();

        let mut seen = SeenKeys::new();
        seen.entry(Kind::Interface).or_default().insert(vec![Value::Int(2)]);
        let removed = store.sweep("t", &seen).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].attrs.get_str("ifname"), Some("gone"));
        assert_eq!(store.count(Kind::Interface, Some("t")).unwrap(), 1);
        assert_eq!(store.count(Kind::Interface, Some("other")).unwrap(), 1);
    }

    #[test]
    fn purge_target_leaves_other_targets() {
        let store = store();
        store.apply("a", &Event::new(Kind::Interface, link(2, "d0", "dummy"))).unwrap();
        store.apply("b", &Event::new(Kind::Interface, link(2, "d0", "dummy"))).unwrap();

        assert_eq!(store.purge_target("a").unwrap(), 1);
        assert_eq!(store.count(Kind::Interface, None).unwrap(), 1);
    }
}
