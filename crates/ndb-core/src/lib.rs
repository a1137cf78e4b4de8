//! Network object database: one relational replica of many live sources.
//!
//! This crate owns the synchronization and transaction engine on top of
//! `ndb-api` channels:
//!
//! - **[`Ndb`]**: Central facade. [`connect_source()`](Ndb::connect_source)
//!   opens a channel, ingests its full dump, then keeps a background task
//!   applying live events. [`disconnect_source()`](Ndb::disconnect_source)
//!   stops the task and purges every row the source owned.
//!
//! - **[`Store`]**: SQLite tables per entity kind, every row tagged with
//!   its owning `target`, behind one re-entrant lock shared with ad hoc
//!   queries.
//!
//! - **Dispatcher**: Fan-out of ingested events to handlers registered
//!   per kind, plus the [`EventWaiter`] primitive used to block until a
//!   matching event arrives.
//!
//! - **[`View`] / [`Record`]**: Addressable, editable projections of rows.
//!   A record stages changes, [`commit()`](Record::commit)s them as an
//!   ordered, dependency-aware list of operations against the owning
//!   source, and can [`rollback()`](Record::rollback) to its last committed
//!   snapshot, cascaded dependents included.
//!
//! - **[`Session`]**: Several records committed together, ordered by the
//!   interfaces they reference.
//!
//! - **[`Report`]**: Bounded tabular summaries, fixed-arity dumps, and CSV.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ndb;
pub mod record;
pub mod report;
pub mod schema;
pub mod source;
pub mod store;
pub mod transaction;
pub mod view;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{NdbConfig, Storage};
pub use dispatch::{EventWaiter, HandlerId};
pub use error::NdbError;
pub use ndb::Ndb;
pub use record::{Record, RecordState};
pub use report::{Dump, Report};
pub use source::{SourceInfo, SourceState, SourceStatus};
pub use store::{QueryResult, Row, Store};
pub use transaction::{Op, Session};
pub use view::{Records, Selector, View};

// Channel types callers need to connect sources.
pub use ndb_api::{Attrs, Channel, Event, EventAction, Kind, MemoryChannel, Namespace, RemoteChannel, Value};
