// ── Database facade ──
//
// `Ndb` ties the store, the dispatcher, and the connected sources
// together. Cheaply cloneable; every clone shares the same replica.

use std::collections::HashMap;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::{StreamExt, future};
use ndb_api::{Channel, Event, Kind};
use parking_lot::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::NdbConfig;
use crate::dispatch::{Dispatcher, EventWaiter, HandlerId};
use crate::error::NdbError;
use crate::source::SourceHandle;
use crate::store::{QueryResult, Store};
use crate::transaction::Session;
use crate::view::View;

/// The network object database.
#[derive(Clone)]
pub struct Ndb {
    pub(crate) inner: Arc<NdbInner>,
}

pub(crate) struct NdbInner {
    pub(crate) config: NdbConfig,
    pub(crate) store: Arc<Store>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) sources: Mutex<HashMap<String, SourceHandle>>,
    pub(crate) cancel: CancellationToken,
}

impl Drop for NdbInner {
    fn drop(&mut self) {
        // Stops every ingestion task still running.
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Ndb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ndb")
            .field("default_target", &self.inner.config.default_target)
            .field("sources", &self.inner.sources.lock().len())
            .finish_non_exhaustive()
    }
}

impl Ndb {
    /// Create an empty database with no sources.
    pub fn new(config: NdbConfig) -> Result<Self, NdbError> {
        let store = Arc::new(Store::open(&config.storage)?);
        debug!(default_target = %config.default_target, "database created");
        Ok(Self {
            inner: Arc::new(NdbInner {
                config,
                store,
                dispatcher: Arc::new(Dispatcher::new()),
                sources: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// Create a database and connect `channel` as the default target,
    /// returning once its initial dump is ingested.
    pub async fn with_local(config: NdbConfig, channel: Arc<dyn Channel>) -> Result<Self, NdbError> {
        let ndb = Self::new(config)?;
        let target = ndb.inner.config.default_target.clone();
        ndb.attach(&target, channel).await?;
        Ok(ndb)
    }

    pub fn config(&self) -> &NdbConfig {
        &self.inner.config
    }

    pub fn default_target(&self) -> &str {
        &self.inner.config.default_target
    }

    /// Direct access to the relational store.
    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    /// Diagnostic SQL, under the store lock.
    pub fn query(&self, sql: &str) -> Result<QueryResult, NdbError> {
        self.inner.store.query(sql, &[])
    }

    // ── Handlers and waiting ─────────────────────────────────────

    /// Register a persistent handler for every ingested event of `kind`.
    pub fn register_handler<F>(&self, kind: Kind, handler: F) -> HandlerId
    where
        F: Fn(&str, &Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(kind, handler)
    }

    pub fn unregister_handler(&self, kind: Kind, id: HandlerId) -> bool {
        self.inner.dispatcher.unregister(kind, id)
    }

    /// Arm a one-shot waiter for the first ingested event of `kind` that
    /// `predicate` accepts.
    pub fn waiter<P>(&self, kind: Kind, predicate: P) -> EventWaiter
    where
        P: Fn(&str, &Event) -> bool + Send + Sync + 'static,
    {
        self.inner.dispatcher.waiter(kind, predicate)
    }

    /// Stream of every ingested `(target, event)` from now on.
    pub fn events(&self) -> impl Stream<Item = (String, Event)> + Send + 'static {
        BroadcastStream::new(self.inner.dispatcher.subscribe()).filter_map(|item| {
            future::ready(match item {
                Ok(pair) => Some(pair),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(skipped = n, "event subscriber lagged");
                    None
                }
            })
        })
    }

    // ── Views ────────────────────────────────────────────────────

    pub fn view(&self, kind: Kind) -> View {
        View::new(self.clone(), kind)
    }

    pub fn interfaces(&self) -> View {
        self.view(Kind::Interface)
    }

    pub fn addresses(&self) -> View {
        self.view(Kind::Address)
    }

    pub fn routes(&self) -> View {
        self.view(Kind::Route)
    }

    pub fn neighbours(&self) -> View {
        self.view(Kind::Neighbour)
    }

    /// A multi-record transaction.
    pub fn session(&self) -> Session {
        Session::new()
    }
}
