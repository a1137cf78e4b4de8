// ── Events and requests ──
//
// The two message shapes that cross a channel: events flow from a source
// into the database, requests flow from the database back to the source.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::value::{Attrs, Value};

// ── Kind ────────────────────────────────────────────────────────────

/// Entity kinds a source reports and accepts requests for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Kind {
    #[strum(to_string = "interface", serialize = "interfaces", serialize = "link")]
    Interface,
    #[strum(to_string = "address", serialize = "addresses", serialize = "addr")]
    Address,
    #[strum(to_string = "route", serialize = "routes")]
    Route,
    #[strum(to_string = "neighbour", serialize = "neighbours", serialize = "neigh")]
    Neighbour,
}

// ── Event ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventAction {
    /// Entity created or updated.
    New,
    /// Entity removed.
    Del,
}

/// A state change reported by a source.
///
/// `attrs` has the same shape as a store row for `kind`. The owning
/// target is implicit: the database stamps it on ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub action: EventAction,
    pub kind: Kind,
    pub attrs: Attrs,
}

impl Event {
    pub fn new(kind: Kind, attrs: Attrs) -> Self {
        Self {
            action: EventAction::New,
            kind,
            attrs,
        }
    }

    pub fn del(kind: Kind, attrs: Attrs) -> Self {
        Self {
            action: EventAction::Del,
            kind,
            attrs,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn is_del(&self) -> bool {
        self.action == EventAction::Del
    }
}

// ── Request ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RequestAction {
    Create,
    Set,
    Delete,
}

/// A single mutation issued against a source.
///
/// `key` identifies an existing entity (empty for creates); `attrs` holds
/// the values to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub action: RequestAction,
    pub kind: Kind,
    #[serde(default)]
    pub key: Attrs,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Request {
    pub fn create(kind: Kind, attrs: Attrs) -> Self {
        Self {
            action: RequestAction::Create,
            kind,
            key: Attrs::new(),
            attrs,
        }
    }

    pub fn set(kind: Kind, key: Attrs, attrs: Attrs) -> Self {
        Self {
            action: RequestAction::Set,
            kind,
            key,
            attrs,
        }
    }

    pub fn delete(kind: Kind, key: Attrs) -> Self {
        Self {
            action: RequestAction::Delete,
            kind,
            key,
            attrs: Attrs::new(),
        }
    }
}
