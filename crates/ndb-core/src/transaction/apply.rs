// ── Operation application ──
//
// Sends one operation at a time through the owning channel and waits until
// the store reflects it. The confirming waiter is armed before the request
// goes out, so an event racing the reply is never missed.

use std::collections::HashMap;
use std::sync::Arc;

use ndb_api::{Attrs, Channel, Kind};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::Op;
use crate::dispatch::EventWaiter;
use crate::error::NdbError;
use crate::ndb::Ndb;
use crate::schema;

/// An operation the source accepted, with what it realized.
#[derive(Debug, Clone)]
pub(crate) struct Applied {
    /// The operation as sent, after remapping and name resolution.
    pub op: Op,
    /// The entity as the source now holds it (as it was, for deletes).
    pub realized: Attrs,
    pub inverse: Op,
}

/// Applies operations against one target, remembering which interface
/// indices changed when interfaces were re-created.
pub(crate) struct Executor {
    ndb: Ndb,
    target: String,
    channel: Arc<dyn Channel>,
    remap: HashMap<i64, i64>,
}

impl Executor {
    pub fn new(ndb: &Ndb, target: &str) -> Result<Self, NdbError> {
        Ok(Self {
            ndb: ndb.clone(),
            channel: ndb.channel(target)?,
            target: target.to_owned(),
            remap: HashMap::new(),
        })
    }

    /// Old-to-new index pairs seen so far.
    pub fn remap(&self) -> &HashMap<i64, i64> {
        &self.remap
    }

    /// Start from index changes made by earlier executors on this target.
    pub fn seed(&mut self, remap: &HashMap<i64, i64>) {
        self.remap.extend(remap);
    }

    pub async fn apply(&mut self, mut op: Op) -> Result<Applied, NdbError> {
        op.remap(&self.remap);
        self.resolve(&mut op)?;
        let kind = op.kind();

        let waiter = self.arm(kind, &self.target);

        let request = op.request();
        debug!(target = %self.target, %op, "applying");
        let realized = match self.channel.request(request).await {
            Ok(realized) => realized,
            Err(e) => {
                let err = NdbError::from(e);
                warn!(target = %self.target, %op, code = ?err.code(), error = %err, "request failed");
                return Err(err);
            }
        };

        let table = schema::layout(kind).table;
        let key = table.key_attrs(&realized);
        let expect = match op {
            Op::Delete { .. } => None,
            Op::Create { .. } | Op::Set { .. } => Some(&realized),
        };
        self.confirm(&op, &key, expect, waiter).await?;

        if let Op::Create {
            kind: Kind::Interface,
            attrs,
        } = &op
        {
            if let (Some(old), Some(new)) = (attrs.get_int("index"), realized.get_int("index")) {
                if old != new {
                    self.remap.insert(old, new);
                }
            }
        }

        let inverse = op.inverse(&realized);
        Ok(Applied {
            op,
            realized,
            inverse,
        })
    }

    fn arm(&self, kind: Kind, target: &str) -> EventWaiter {
        let target = target.to_owned();
        self.ndb.waiter(kind, move |t, _| t == target)
    }

    /// Replace interface names in reference columns with their indices.
    fn resolve(&self, op: &mut Op) -> Result<(), NdbError> {
        let kind = op.kind();
        let store = self.ndb.store();
        let resolve_attrs = |attrs: &mut Attrs| -> Result<(), NdbError> {
            let layout = schema::layout(kind);
            let names: Vec<(String, String)> = attrs
                .iter()
                .filter(|(name, _)| layout.is_reference(name))
                .filter_map(|(name, value)| value.as_str().map(|s| (name.clone(), s.to_owned())))
                .collect();
            for (name, ifname) in names {
                let index = store
                    .index_of(&self.target, &ifname)?
                    .ok_or_else(|| NdbError::not_found(Kind::Interface, &ifname))?;
                attrs.insert(name, index);
            }
            Ok(())
        };
        match op {
            Op::Create { attrs, .. } => resolve_attrs(attrs),
            Op::Set { key, attrs, .. } => {
                resolve_attrs(key)?;
                resolve_attrs(attrs)
            }
            Op::Delete { key, .. } => resolve_attrs(key),
        }
    }

    /// True once the store shows the entity at `key` as `expect`, or shows
    /// no entity there when `expect` is `None`.
    fn reflected(&self, kind: Kind, key: &Attrs, expect: Option<&Attrs>) -> Result<bool, NdbError> {
        let row = self.ndb.store().find(kind, &self.target, key)?;
        Ok(match (row, expect) {
            (None, None) => true,
            (Some(row), Some(expect)) => {
                let known = expect.project(schema::layout(kind).attributes());
                row.matches(&known)
            }
            _ => false,
        })
    }

    async fn confirm(
        &self,
        op: &Op,
        key: &Attrs,
        expect: Option<&Attrs>,
        mut waiter: EventWaiter,
    ) -> Result<(), NdbError> {
        let kind = op.kind();
        let timeout = self.ndb.config().request_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            if self.reflected(kind, key, expect)? {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || waiter.wait(remaining).await.is_none() {
                break;
            }
            // Re-arm before re-checking so nothing slips between the two.
            waiter = self.arm(kind, &self.target);
        }

        if self.reflected(kind, key, expect)? {
            return Ok(());
        }
        warn!(target = %self.target, %op, "no confirming event");
        Err(NdbError::Timeout {
            operation: format!("{} {kind}", op.action()),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }
}
