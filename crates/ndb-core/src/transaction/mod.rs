// ── Transaction engine ──
//
// A commit is planned as an ordered list of primitive operations against
// one target, applied one at a time through the owning channel, each
// confirmed against the store before the next is sent. Every applied
// operation yields its inverse; replaying the inverses in reverse order is
// how a rollback restores the previous state.

mod apply;
mod plan;
mod session;

use std::collections::HashMap;
use std::fmt;

use ndb_api::{Attrs, Kind, Request, RequestAction, Value};

use crate::schema;

pub(crate) use apply::Executor;
pub(crate) use plan::{Staged, plan, restore};
pub use session::Session;

/// One primitive operation against a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Materialize a new entity.
    Create { kind: Kind, attrs: Attrs },
    /// Change `attrs` on the entity at `key`; `prior` holds the values
    /// they replace.
    Set {
        kind: Kind,
        key: Attrs,
        attrs: Attrs,
        prior: Attrs,
    },
    /// Remove the entity at `key`; `row` is its full last known state.
    Delete { kind: Kind, key: Attrs, row: Attrs },
}

impl Op {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Create { kind, .. } | Self::Set { kind, .. } | Self::Delete { kind, .. } => *kind,
        }
    }

    pub fn action(&self) -> RequestAction {
        match self {
            Self::Create { .. } => RequestAction::Create,
            Self::Set { .. } => RequestAction::Set,
            Self::Delete { .. } => RequestAction::Delete,
        }
    }

    /// The channel request carrying this operation.
    pub(crate) fn request(&self) -> Request {
        match self {
            Self::Create { kind, attrs } => {
                let mut attrs = attrs.clone();
                // Interface indices are assigned by the source.
                if *kind == Kind::Interface {
                    attrs.remove("index");
                }
                Request::create(*kind, attrs)
            }
            Self::Set { kind, key, attrs, .. } => Request::set(*kind, key.clone(), attrs.clone()),
            Self::Delete { kind, key, .. } => Request::delete(*kind, key.clone()),
        }
    }

    /// The operation undoing this one, given what the source realized.
    pub(crate) fn inverse(&self, realized: &Attrs) -> Self {
        let table = schema::layout(self.kind()).table;
        match self {
            Self::Create { kind, .. } => Self::Delete {
                kind: *kind,
                key: table.key_attrs(realized),
                row: realized.clone(),
            },
            Self::Set {
                kind,
                key,
                attrs,
                prior,
            } => Self::Set {
                kind: *kind,
                key: key.clone(),
                attrs: prior.clone(),
                prior: realized.project(attrs.keys().map(String::as_str)),
            },
            Self::Delete { kind, row, .. } => Self::Create {
                kind: *kind,
                attrs: row.clone(),
            },
        }
    }

    /// Rewrite interface indices in every reference column and in the
    /// interface key itself.
    pub(crate) fn remap(&mut self, remap: &HashMap<i64, i64>) {
        if remap.is_empty() {
            return;
        }
        let kind = self.kind();
        match self {
            Self::Create { attrs, .. } => remap_attrs(kind, attrs, remap),
            Self::Set {
                key, attrs, prior, ..
            } => {
                remap_attrs(kind, key, remap);
                remap_attrs(kind, attrs, remap);
                remap_attrs(kind, prior, remap);
            }
            Self::Delete { key, row, .. } => {
                remap_attrs(kind, key, remap);
                remap_attrs(kind, row, remap);
            }
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { kind, attrs } => write!(f, "create {kind} {}", describe(attrs)),
            Self::Set { kind, key, attrs, .. } => {
                write!(f, "set {kind} {} {}", describe(key), describe(attrs))
            }
            Self::Delete { kind, key, .. } => write!(f, "delete {kind} {}", describe(key)),
        }
    }
}

fn describe(attrs: &Attrs) -> String {
    let parts: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("[{}]", parts.join(" "))
}

pub(crate) fn remap_attrs(kind: Kind, attrs: &mut Attrs, remap: &HashMap<i64, i64>) {
    let layout = schema::layout(kind);
    let names: Vec<String> = attrs
        .keys()
        .filter(|name| layout.is_reference(name) || (kind == Kind::Interface && *name == "index"))
        .cloned()
        .collect();
    for name in names {
        if let Some(new) = attrs.get_int(&name).and_then(|old| remap.get(&old)) {
            attrs.insert(name, Value::Int(*new));
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn route_row() -> Attrs {
        Attrs::new()
            .with("table", 254)
            .with("dst", "0.0.0.0")
            .with("dst_len", 0)
            .with("gateway", "10.0.0.1")
            .with("oif", 7)
    }

    #[test]
    fn delete_inverts_to_full_create() {
        let op = Op::Delete {
            kind: Kind::Route,
            key: Attrs::new().with("table", 254).with("dst", "0.0.0.0").with("dst_len", 0),
            row: route_row(),
        };
        assert_eq!(
            op.inverse(&route_row()),
            Op::Create {
                kind: Kind::Route,
                attrs: route_row(),
            }
        );
    }

    #[test]
    fn set_inverse_swaps_values() {
        let op = Op::Set {
            kind: Kind::Interface,
            key: Attrs::new().with("index", 3),
            attrs: Attrs::new().with("state", "up"),
            prior: Attrs::new().with("state", "down"),
        };
        let realized = Attrs::new().with("index", 3).with("state", "up").with("mtu", 1500);
        let Op::Set { attrs, prior, .. } = op.inverse(&realized) else {
            panic!("expected a set");
        };
        assert_eq!(attrs, Attrs::new().with("state", "down"));
        assert_eq!(prior, Attrs::new().with("state", "up"));
    }

    #[test]
    fn create_request_drops_interface_index() {
        let op = Op::Create {
            kind: Kind::Interface,
            attrs: Attrs::new().with("index", 9).with("ifname", "d0"),
        };
        assert_eq!(op.request().attrs, Attrs::new().with("ifname", "d0"));
    }

    #[test]
    fn remap_touches_references_only() {
        let remap = HashMap::from([(7, 12)]);
        let mut op = Op::Create {
            kind: Kind::Route,
            attrs: route_row().with("priority", 7),
        };
        op.remap(&remap);
        let Op::Create { attrs, .. } = op else {
            panic!("expected a create");
        };
        assert_eq!(attrs.get_int("oif"), Some(12));
        assert_eq!(attrs.get_int("priority"), Some(7));
    }

    #[test]
    fn remap_rewrites_interface_key() {
        let remap = HashMap::from([(4, 9)]);
        let mut attrs = Attrs::new().with("index", 4).with("mtu", 4);
        remap_attrs(Kind::Interface, &mut attrs, &remap);
        assert_eq!(attrs.get_int("index"), Some(9));
        assert_eq!(attrs.get_int("mtu"), Some(4));
    }
}
