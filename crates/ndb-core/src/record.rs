// ── Records ──
//
// A record is an editable projection of one row: the last committed
// snapshot plus a pending change set. Staging never touches the store;
// `commit()` plans the difference, applies it through the owning source,
// and keeps the inverse operations as the rollback point.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use ndb_api::{Attrs, Kind, Value};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

use crate::error::NdbError;
use crate::ndb::Ndb;
use crate::schema;
use crate::transaction::{self, Executor, Op, Staged};

/// Lifecycle of a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordState {
    /// Not yet created on the source.
    Draft,
    /// Mirrors an existing row.
    Committed,
    /// Deleted by a commit; can still be rolled back.
    Removed,
    /// The last commit or rollback failed part way.
    Invalid,
}

/// One editable entity.
#[derive(Debug)]
pub struct Record {
    ndb: Ndb,
    kind: Kind,
    target: String,
    state: RecordState,
    key: Option<Attrs>,
    snapshot: Attrs,
    pending: Attrs,
    removing: bool,
    rollback_point: Option<Vec<Op>>,
}

impl Record {
    pub(crate) fn existing(ndb: Ndb, kind: Kind, target: String, row: Attrs) -> Self {
        Self {
            key: Some(schema::layout(kind).table.key_attrs(&row)),
            ndb,
            kind,
            target,
            state: RecordState::Committed,
            snapshot: row,
            pending: Attrs::new(),
            removing: false,
            rollback_point: None,
        }
    }

    pub(crate) fn draft(ndb: Ndb, kind: Kind, target: String, attrs: Attrs) -> Self {
        Self {
            ndb,
            kind,
            target,
            state: RecordState::Draft,
            key: None,
            snapshot: Attrs::new(),
            pending: attrs,
            removing: false,
            rollback_point: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Primary key of the entity, once it exists.
    pub fn key(&self) -> Option<&Attrs> {
        self.key.as_ref()
    }

    /// Current value of `name`: the staged value if any, else the snapshot.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.pending.get(name).or_else(|| self.snapshot.get(name))
    }

    /// Every attribute as the caller sees it, staged values on top.
    pub fn attrs(&self) -> Attrs {
        let mut attrs = self.snapshot.clone();
        attrs.merge(&self.pending);
        attrs
    }

    /// The last committed state.
    pub fn snapshot(&self) -> &Attrs {
        &self.snapshot
    }

    pub fn pending(&self) -> &Attrs {
        &self.pending
    }

    pub fn is_removing(&self) -> bool {
        self.removing
    }

    pub fn is_dirty(&self) -> bool {
        self.removing || self.pending.iter().any(|(k, v)| self.snapshot.get(k) != Some(v))
    }

    /// Inverse operations of the last successful commit, in replay order.
    pub fn rollback_point(&self) -> Option<&[Op]> {
        self.rollback_point.as_deref()
    }

    // ── Staging ──────────────────────────────────────────────────

    /// Stage a new value for `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.pending.insert(name, value);
        self
    }

    /// Stage removal of the entity and everything depending on it.
    pub fn remove(&mut self) -> &mut Self {
        self.removing = true;
        self
    }

    /// Drop every staged change.
    pub fn discard(&mut self) {
        self.pending = Attrs::new();
        self.removing = false;
    }

    /// Re-read the snapshot from the store.
    pub fn reload(&mut self) -> Result<(), NdbError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| NdbError::not_found(self.kind, self.label()))?;
        let row = self
            .ndb
            .store()
            .find(self.kind, &self.target, key)?
            .ok_or_else(|| NdbError::not_found(self.kind, self.label()))?;
        self.adopt(row);
        Ok(())
    }

    /// Point the snapshot at whatever the store holds under `key` now,
    /// leaving staged values alone.
    fn refresh(&mut self, key: Option<Attrs>) {
        let row = match key {
            Some(key) => match self.ndb.store().find(self.kind, &self.target, &key) {
                Ok(row) => row,
                Err(e) => {
                    warn!(record = %self.label(), error = %e, "snapshot re-read failed");
                    return;
                }
            },
            None => None,
        };
        match row {
            Some(row) => {
                self.key = Some(schema::layout(self.kind).table.key_attrs(&row));
                self.snapshot = row;
            }
            None => {
                self.key = None;
                self.snapshot = Attrs::new();
            }
        }
    }

    fn adopt(&mut self, row: Attrs) {
        self.key = Some(schema::layout(self.kind).table.key_attrs(&row));
        self.snapshot = row;
        self.state = RecordState::Committed;
    }

    fn staged(&self) -> Staged<'_> {
        Staged {
            kind: self.kind,
            key: self.key.as_ref().filter(|_| self.state != RecordState::Removed),
            snapshot: &self.snapshot,
            pending: &self.pending,
            removing: self.removing,
        }
    }

    /// The operations a commit would issue right now, in order.
    pub fn plan(&self) -> Result<Vec<Op>, NdbError> {
        if self.state == RecordState::Removed && !self.removing {
            // A removed entity comes back as a new one.
            let mut attrs = self.snapshot.clone();
            attrs.merge(&self.pending);
            return Ok(vec![Op::Create { kind: self.kind, attrs }]);
        }
        transaction::plan(self.ndb.store(), &self.target, &self.staged())
    }

    // ── Commit / rollback ────────────────────────────────────────

    /// Apply staged changes through the owning source.
    ///
    /// Operations are issued one at a time, dependents first on removal.
    /// A failure leaves the already applied operations in place: the
    /// record keeps its staged values, re-reads its own row (which may be
    /// gone by then), turns [`RecordState::Invalid`], and its rollback
    /// point covers what did apply.
    pub async fn commit(&mut self) -> Result<(), NdbError> {
        let ops = self.plan()?;
        if ops.is_empty() {
            if self.removing && self.key.is_none() {
                self.pending = Attrs::new();
                self.removing = false;
            }
            return Ok(());
        }
        info!(target = %self.target, record = %self.label(), ops = ops.len(), "committing");

        let table = schema::layout(self.kind).table;
        let mut exec = Executor::new(&self.ndb, &self.target)?;
        let mut inverses = Vec::with_capacity(ops.len());
        let mut realized = None;
        // Key of this record's own row as the operations land.
        let mut own = self.key.clone().filter(|_| self.state != RecordState::Removed);
        for op in ops {
            let ours = op.kind() == self.kind
                && match &op {
                    Op::Create { .. } => true,
                    Op::Set { key, .. } | Op::Delete { key, .. } => own.as_ref() == Some(key),
                };
            let creates = matches!(op, Op::Create { .. });
            let deletes = matches!(op, Op::Delete { .. });
            match exec.apply(op).await {
                Ok(applied) => {
                    debug!(op = %applied.op, "applied");
                    if ours && deletes {
                        own = None;
                    } else if ours && creates {
                        own = Some(table.key_attrs(&applied.realized));
                    }
                    inverses.push(applied.inverse);
                    realized = Some(applied.realized);
                }
                Err(e) => {
                    warn!(record = %self.label(), applied = inverses.len(), error = %e, "commit failed");
                    if !inverses.is_empty() {
                        self.refresh(own);
                    }
                    inverses.reverse();
                    self.rollback_point = Some(inverses);
                    self.state = RecordState::Invalid;
                    return Err(e);
                }
            }
        }

        inverses.reverse();
        self.rollback_point = Some(inverses);
        self.pending = Attrs::new();
        if self.removing {
            self.removing = false;
            self.state = RecordState::Removed;
            return Ok(());
        }

        let row = realized.unwrap_or_default();
        let key = table.key_attrs(&row);
        let current = self.ndb.store().find(self.kind, &self.target, &key)?;
        self.adopt(current.unwrap_or(row));
        Ok(())
    }

    /// Discard staged changes and restore the last committed snapshot,
    /// cascaded dependents included.
    ///
    /// Replays the inverses of the last commit; with no commit to undo,
    /// brings the current row back to the snapshot instead.
    pub async fn rollback(&mut self) -> Result<(), NdbError> {
        self.rollback_remapped(&mut HashMap::new()).await
    }

    /// [`rollback`](Self::rollback) for a record whose interfaces may
    /// already have been re-created by an earlier rollback on the same
    /// target. `remap` carries old-to-new interface indices in and out.
    pub(crate) async fn rollback_remapped(&mut self, remap: &mut HashMap<i64, i64>) -> Result<(), NdbError> {
        self.discard();
        if let Some(key) = self.key.as_mut() {
            transaction::remap_attrs(self.kind, key, remap);
        }
        transaction::remap_attrs(self.kind, &mut self.snapshot, remap);

        let ops = match self.rollback_point.take() {
            Some(ops) => ops,
            None => transaction::restore(
                self.ndb.store(),
                &self.target,
                self.kind,
                self.key.as_ref(),
                &self.snapshot,
            )?,
        };
        if ops.is_empty() {
            return Ok(());
        }
        info!(target = %self.target, record = %self.label(), ops = ops.len(), "rolling back");

        let mut exec = Executor::new(&self.ndb, &self.target)?;
        exec.seed(remap);
        // First re-created row of our kind, for a record that lost its key.
        let mut restored = None;
        let mut ops = ops.into_iter();
        while let Some(op) = ops.next() {
            let creates = matches!(op, Op::Create { .. }) && op.kind() == self.kind;
            match exec.apply(op.clone()).await {
                Ok(applied) => {
                    if creates && restored.is_none() {
                        restored = Some(schema::layout(self.kind).table.key_attrs(&applied.realized));
                    }
                }
                Err(e) => {
                    warn!(record = %self.label(), error = %e, "rollback failed");
                    let remaining: Vec<Op> = std::iter::once(op)
                        .chain(ops)
                        .map(|mut op| {
                            op.remap(exec.remap());
                            op
                        })
                        .collect();
                    remap.extend(exec.remap());
                    self.rollback_point = Some(remaining);
                    self.state = RecordState::Invalid;
                    return Err(e);
                }
            }
        }
        remap.extend(exec.remap());

        if self.key.is_none() {
            self.key = restored;
        }
        if let Some(key) = self.key.as_mut() {
            transaction::remap_attrs(self.kind, key, remap);
        }
        let row = match &self.key {
            Some(key) => self.ndb.store().find(self.kind, &self.target, key)?,
            None => None,
        };
        match row {
            Some(row) => self.adopt(row),
            None => {
                self.key = None;
                self.snapshot = Attrs::new();
                self.state = RecordState::Draft;
            }
        }
        Ok(())
    }

    /// Run `f` on the record, then commit whatever it staged.
    ///
    /// The commit is attempted however `f` finishes: when it returns an
    /// error value, only stages a removal, or panics. A panic is resumed
    /// once the commit has run.
    pub async fn scoped<F, R>(&mut self, f: F) -> Result<R, NdbError>
    where
        F: FnOnce(&mut Self) -> R,
    {
        let out = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self)));
        let committed = self.commit().await;
        match out {
            Ok(out) => committed.map(|()| out),
            Err(payload) => {
                if let Err(e) = committed {
                    warn!(record = %self.label(), error = %e, "commit after panic failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Short human label, e.g. `interface eth0@localhost`.
    pub fn label(&self) -> String {
        let attrs = self.attrs();
        let name = match self.kind {
            Kind::Interface => attrs.get("ifname").map(ToString::to_string),
            Kind::Address => attrs
                .get("address")
                .map(|a| format!("{a}/{}", attrs.get("prefixlen").cloned().unwrap_or_default())),
            Kind::Route => attrs
                .get("dst")
                .map(|d| format!("{d}/{}", attrs.get("dst_len").cloned().unwrap_or_default())),
            Kind::Neighbour => attrs.get("dst").map(ToString::to_string),
        };
        format!("{} {}@{}", self.kind, name.unwrap_or_else(|| "?".into()), self.target)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
