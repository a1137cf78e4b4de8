// ── Commit planning ──
//
// Turns a record's staged state into operations. Removing an interface
// pulls in everything that cannot outlive it, children first: its routes,
// neighbours, and addresses are deleted, bridge/bond ports are released,
// and VLANs stacked on it are removed with their own dependents.

use ndb_api::{Attrs, Kind, Value};
use tracing::debug;

use super::Op;
use crate::error::NdbError;
use crate::schema::{self, KindLayout};
use crate::store::Store;

/// The staged state of one record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Staged<'a> {
    pub kind: Kind,
    /// `None` until the entity exists.
    pub key: Option<&'a Attrs>,
    pub snapshot: &'a Attrs,
    pub pending: &'a Attrs,
    pub removing: bool,
}

/// Operations realizing `staged` on `target`. The record's own operation
/// is always last.
pub(crate) fn plan(store: &Store, target: &str, staged: &Staged<'_>) -> Result<Vec<Op>, NdbError> {
    let layout = schema::layout(staged.kind);
    check_names(layout, staged.pending)?;

    let ops = match (staged.key, staged.removing) {
        (None, true) => Vec::new(),
        (Some(key), true) => {
            let mut ops = Vec::new();
            cascade(store, target, staged.kind, key, &mut Vec::new(), &mut ops)?;
            ops
        }
        (None, false) => vec![create(layout, staged.pending)?],
        (Some(key), false) => update(layout, key, staged.snapshot, staged.pending)?,
    };
    debug!(%target, kind = %staged.kind, ops = ops.len(), "commit planned");
    Ok(ops)
}

/// Operations bringing the current row at `key` back to `snapshot`.
pub(crate) fn restore(
    store: &Store,
    target: &str,
    kind: Kind,
    key: Option<&Attrs>,
    snapshot: &Attrs,
) -> Result<Vec<Op>, NdbError> {
    let Some(key) = key.filter(|_| !snapshot.is_empty()) else {
        return Ok(Vec::new());
    };
    let table = schema::layout(kind).table;

    let Some(current) = store.find(kind, target, key)? else {
        return Ok(vec![Op::Create {
            kind,
            attrs: snapshot.clone(),
        }]);
    };
    let changed: Attrs = snapshot
        .iter()
        .filter(|(name, value)| !table.keys().any(|k| k == name.as_str()) && current.get(name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if changed.is_empty() {
        return Ok(Vec::new());
    }
    let prior = current.project(changed.keys().map(String::as_str));
    Ok(vec![Op::Set {
        kind,
        key: key.clone(),
        attrs: changed,
        prior,
    }])
}

fn check_names(layout: &KindLayout, attrs: &Attrs) -> Result<(), NdbError> {
    match attrs.keys().find(|name| !layout.attributes().any(|a| a == name.as_str())) {
        Some(name) => Err(NdbError::InvalidRecord {
            message: format!("{} has no attribute {name}", layout.kind),
        }),
        None => Ok(()),
    }
}

fn create(layout: &KindLayout, pending: &Attrs) -> Result<Op, NdbError> {
    if let Some(missing) = layout
        .required
        .iter()
        .find(|name| pending.get(name).is_none_or(Value::is_null))
    {
        return Err(NdbError::InvalidRecord {
            message: format!("a new {} needs {missing}", layout.kind),
        });
    }
    Ok(Op::Create {
        kind: layout.kind,
        attrs: pending.clone(),
    })
}

fn update(layout: &KindLayout, key: &Attrs, snapshot: &Attrs, pending: &Attrs) -> Result<Vec<Op>, NdbError> {
    let changed: Attrs = pending
        .iter()
        .filter(|(name, value)| snapshot.get(name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if changed.is_empty() {
        return Ok(Vec::new());
    }

    if layout.table.keys().any(|k| changed.contains(k)) {
        if layout.kind == Kind::Interface {
            return Err(NdbError::InvalidRecord {
                message: "interface index is assigned by the source".into(),
            });
        }
        // Keys cannot be changed in place: replace the entity.
        let mut attrs = snapshot.clone();
        attrs.merge(&changed);
        return Ok(vec![
            Op::Delete {
                kind: layout.kind,
                key: key.clone(),
                row: snapshot.clone(),
            },
            Op::Create { kind: layout.kind, attrs },
        ]);
    }

    let prior: Attrs = changed
        .keys()
        .map(|name| (name.clone(), snapshot.get(name).cloned().unwrap_or_default()))
        .collect();
    Ok(vec![Op::Set {
        kind: layout.kind,
        key: key.clone(),
        attrs: changed,
        prior,
    }])
}

/// Delete the entity at `key` and, for interfaces, everything depending on
/// it. `path` holds the interfaces being removed further up the cascade.
fn cascade(
    store: &Store,
    target: &str,
    kind: Kind,
    key: &Attrs,
    path: &mut Vec<(i64, String)>,
    ops: &mut Vec<Op>,
) -> Result<(), NdbError> {
    let table = schema::layout(kind).table;
    let row = store
        .find(kind, target, key)?
        .ok_or_else(|| NdbError::not_found(kind, DisplayKey(key)))?;

    if kind != Kind::Interface {
        ops.push(Op::Delete {
            kind,
            key: table.key_attrs(&row),
            row,
        });
        return Ok(());
    }

    let index = row.get_int("index").unwrap_or_default();
    let name = row.get_str("ifname").unwrap_or_default().to_owned();
    if path.iter().any(|(i, _)| *i == index) {
        let names: Vec<&str> = path
            .iter()
            .map(|(_, n)| n.as_str())
            .chain(std::iter::once(name.as_str()))
            .collect();
        return Err(NdbError::DependencyCycle {
            path: names.join(" -> "),
        });
    }
    path.push((index, name));

    for (dependent, column) in schema::dependents() {
        let dep_table = schema::layout(dependent).table;
        for dep in store.select(dependent, Some(target), &Attrs::new().with(column, index))? {
            ops.push(Op::Delete {
                kind: dependent,
                key: dep_table.key_attrs(&dep.attrs),
                row: dep.attrs,
            });
        }
    }

    // Ports are released, not removed.
    for port in store.select(Kind::Interface, Some(target), &Attrs::new().with("master", index))? {
        if port.attrs.get_int("link") == Some(index) {
            continue;
        }
        ops.push(Op::Set {
            kind: Kind::Interface,
            key: table.key_attrs(&port.attrs),
            attrs: Attrs::new().with("master", Value::Null),
            prior: Attrs::new().with("master", index),
        });
    }

    // VLANs go with their parent.
    for child in store.select(Kind::Interface, Some(target), &Attrs::new().with("link", index))? {
        cascade(store, target, Kind::Interface, &table.key_attrs(&child.attrs), path, ops)?;
    }

    path.pop();
    ops.push(Op::Delete {
        kind,
        key: table.key_attrs(&row),
        row,
    });
    Ok(())
}

struct DisplayKey<'a>(&'a Attrs);

impl std::fmt::Display for DisplayKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(","))
    }
}
