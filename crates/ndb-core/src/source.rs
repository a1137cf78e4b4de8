// ── Source manager ──
//
// Attaches channels to the database. Each source gets one ingestion task:
// it applies the initial dump (cancellable, mark-and-sweep), reports the
// source as synced, then applies live events in source order until the
// source is disconnected. Resyncs run on the same task, so a re-dump is
// never interleaved with live events; a stream that lost events triggers
// one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use ndb_api::{Channel, Event, EventStream};
use serde::Serialize;
use strum::Display;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::NdbError;
use crate::ndb::Ndb;
use crate::schema;
use crate::store::{SeenKeys, Store};

// ── SourceState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceState {
    Connecting,
    Synced,
    Disconnected,
}

/// Observable lifecycle of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub state: SourceState,
    pub connected_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// Listing entry returned by [`Ndb::sources`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub target: String,
    pub channel: String,
    #[serde(flatten)]
    pub status: SourceStatus,
}

/// Reply slot for a resync handled by the ingestion task.
type ResyncReply = oneshot::Sender<Result<usize, NdbError>>;

pub(crate) struct SourceHandle {
    channel: Arc<dyn Channel>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    status: watch::Sender<SourceStatus>,
    resync: mpsc::UnboundedSender<ResyncReply>,
}

/// What an ingestion pass needs, detached from `Ndb` so tasks do not keep
/// the database alive.
#[derive(Clone)]
struct Ingest {
    target: String,
    channel: Arc<dyn Channel>,
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    batch: usize,
}

impl Ingest {
    fn one(&self, event: &Event) -> bool {
        match self.store.apply(&self.target, event) {
            Ok(true) => {
                self.dispatcher.dispatch(&self.target, event);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(target = %self.target, kind = %event.kind, error = %e, "failed to apply event");
                false
            }
        }
    }

    /// Apply a full dump, then sweep rows the dump no longer contains.
    /// Returns `None` if cancelled part way.
    async fn dump(&self, events: Vec<Event>, cancel: &CancellationToken) -> Option<usize> {
        let mut seen = SeenKeys::new();
        let total = events.len();

        for (i, event) in events.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return None;
            }
            if self.one(&event) {
                if let Some(key) = schema::layout(event.kind).table.key_of(&event.attrs) {
                    seen.entry(event.kind).or_default().insert(key);
                }
            }
            if (i + 1) % self.batch.max(1) == 0 {
                tokio::task::yield_now().await;
            }
        }
        if cancel.is_cancelled() {
            return None;
        }

        let swept = match self.store.sweep(&self.target, &seen) {
            Ok(swept) => swept,
            Err(e) => {
                warn!(target = %self.target, error = %e, "sweep failed");
                Vec::new()
            }
        };
        for event in &swept {
            self.dispatcher.dispatch(&self.target, event);
        }
        debug!(target = %self.target, events = total, swept = swept.len(), "dump ingested");
        Some(swept.len())
    }

    /// Take a fresh dump and reconcile against it.
    async fn resync(&self, cancel: &CancellationToken) -> Result<usize, NdbError> {
        let gone = || NdbError::UnknownSource {
            target: self.target.clone(),
        };
        let dump = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(gone()),
            dump = self.channel.dump() => dump?,
        };
        let swept = self.dump(dump, cancel).await.ok_or_else(gone)?;
        info!(target = %self.target, swept, "source resynced");
        Ok(swept)
    }

    fn purge(&self) {
        if let Err(e) = self.store.purge_target(&self.target) {
            warn!(target = %self.target, error = %e, "failed to purge rows");
        }
    }
}

async fn ingestion_task(
    ingest: Ingest,
    dump: Vec<Event>,
    mut stream: EventStream,
    mut resyncs: mpsc::UnboundedReceiver<ResyncReply>,
    cancel: CancellationToken,
    status: watch::Sender<SourceStatus>,
    on_synced: Option<oneshot::Sender<()>>,
) {
    if ingest.dump(dump, &cancel).await.is_none() {
        debug!(target = %ingest.target, "dump cancelled, purging partial rows");
        ingest.purge();
        return;
    }

    status.send_modify(|s| {
        s.state = SourceState::Synced;
        s.synced_at = Some(Utc::now());
    });
    info!(target = %ingest.target, "source synced");
    if let Some(tx) = on_synced {
        let _ = tx.send(());
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(reply) = resyncs.recv() => {
                let _ = reply.send(ingest.resync(&cancel).await);
            }
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    ingest.one(&event);
                }
                Some(Err(ndb_api::Error::Lagged { skipped })) => {
                    warn!(target = %ingest.target, skipped, "events lost, resyncing");
                    if let Err(e) = ingest.resync(&cancel).await {
                        warn!(target = %ingest.target, error = %e, "resync after lag failed");
                    }
                }
                Some(Err(e)) => {
                    warn!(target = %ingest.target, error = %e, "source event stream failed");
                    status.send_modify(|s| s.state = SourceState::Disconnected);
                    break;
                }
                None => {
                    warn!(target = %ingest.target, "source event stream ended");
                    status.send_modify(|s| s.state = SourceState::Disconnected);
                    break;
                }
            },
        }
    }
}

impl Ndb {
    /// Register `channel` as the source for `target`.
    ///
    /// Opens the live stream and takes the initial dump before returning;
    /// a failure of either leaves no trace. Ingestion then continues on a
    /// background task, which signals `on_synced` once the dump is applied.
    pub async fn connect_source(
        &self,
        target: &str,
        channel: Arc<dyn Channel>,
        on_synced: Option<oneshot::Sender<()>>,
    ) -> Result<watch::Receiver<SourceStatus>, NdbError> {
        if self.inner.sources.lock().contains_key(target) {
            return Err(NdbError::SourceExists {
                target: target.to_owned(),
            });
        }
        info!(%target, channel = %channel.describe(), "connecting source");

        let unreachable = |e: ndb_api::Error| NdbError::SourceUnreachable {
            target: target.to_owned(),
            reason: e.to_string(),
        };
        let stream = channel.open().await.map_err(&unreachable)?;
        let dump = match channel.dump().await {
            Ok(dump) => dump,
            Err(e) => {
                let _ = channel.close().await;
                return Err(unreachable(e));
            }
        };

        let (status, rx) = watch::channel(SourceStatus {
            state: SourceState::Connecting,
            connected_at: Utc::now(),
            synced_at: None,
        });
        let cancel = self.inner.cancel.child_token();
        let (resync, resyncs) = mpsc::unbounded_channel();
        let ingest = Ingest {
            target: target.to_owned(),
            channel: Arc::clone(&channel),
            store: Arc::clone(&self.inner.store),
            dispatcher: Arc::clone(&self.inner.dispatcher),
            batch: self.inner.config.dump_batch_size,
        };

        // Another connect for the same target may have won while we dumped.
        let inserted = {
            let mut sources = self.inner.sources.lock();
            if sources.contains_key(target) {
                false
            } else {
                let task = tokio::spawn(ingestion_task(
                    ingest,
                    dump,
                    stream,
                    resyncs,
                    cancel.clone(),
                    status.clone(),
                    on_synced,
                ));
                sources.insert(
                    target.to_owned(),
                    SourceHandle {
                        channel: Arc::clone(&channel),
                        cancel,
                        task,
                        status,
                        resync,
                    },
                );
                true
            }
        };

        if !inserted {
            let _ = channel.close().await;
            return Err(NdbError::SourceExists {
                target: target.to_owned(),
            });
        }
        Ok(rx)
    }

    /// Connect `target` and wait until its initial dump is ingested.
    pub async fn attach(&self, target: &str, channel: Arc<dyn Channel>) -> Result<(), NdbError> {
        let (tx, rx) = oneshot::channel();
        self.connect_source(target, channel, Some(tx)).await?;
        rx.await.map_err(|_| NdbError::SourceUnreachable {
            target: target.to_owned(),
            reason: "ingestion stopped before the initial dump completed".into(),
        })
    }

    /// Stop ingesting `target`, delete every row it owns, and close its
    /// channel.
    pub async fn disconnect_source(&self, target: &str) -> Result<(), NdbError> {
        let handle = self
            .inner
            .sources
            .lock()
            .remove(target)
            .ok_or_else(|| NdbError::UnknownSource {
                target: target.to_owned(),
            })?;

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(%target, error = %e, "ingestion task failed");
        }
        let removed = self.inner.store.purge_target(target)?;
        if let Err(e) = handle.channel.close().await {
            warn!(%target, error = %e, "channel close failed (non-fatal)");
        }
        handle
            .status
            .send_modify(|s| s.state = SourceState::Disconnected);
        info!(%target, removed, "source disconnected");
        Ok(())
    }

    /// Re-dump a connected source and reconcile its rows. Returns the
    /// number of stale rows removed.
    ///
    /// Runs on the source's ingestion task, after the live events already
    /// received and before any that follow.
    pub async fn resync_source(&self, target: &str) -> Result<usize, NdbError> {
        let gone = || NdbError::UnknownSource {
            target: target.to_owned(),
        };
        let (tx, rx) = oneshot::channel();
        self.inner
            .sources
            .lock()
            .get(target)
            .ok_or_else(gone)?
            .resync
            .send(tx)
            .map_err(|_| gone())?;
        rx.await.map_err(|_| gone())?
    }

    /// Every connected source with its current state.
    pub fn sources(&self) -> Vec<SourceInfo> {
        let sources = self.inner.sources.lock();
        let mut list: Vec<SourceInfo> = sources
            .iter()
            .map(|(target, handle)| SourceInfo {
                target: target.clone(),
                channel: handle.channel.describe(),
                status: handle.status.borrow().clone(),
            })
            .collect();
        list.sort_by(|a, b| a.target.cmp(&b.target));
        list
    }

    /// Watch the lifecycle of `target`.
    pub fn source_status(&self, target: &str) -> Option<watch::Receiver<SourceStatus>> {
        self.inner
            .sources
            .lock()
            .get(target)
            .map(|h| h.status.subscribe())
    }

    /// The channel owning `target`.
    pub(crate) fn channel(&self, target: &str) -> Result<Arc<dyn Channel>, NdbError> {
        self.inner
            .sources
            .lock()
            .get(target)
            .map(|h| Arc::clone(&h.channel))
            .ok_or_else(|| NdbError::UnknownSource {
                target: target.to_owned(),
            })
    }

    /// Disconnect every source.
    pub async fn close(&self) {
        let targets: Vec<String> = self.inner.sources.lock().keys().cloned().collect();
        for target in targets {
            if let Err(e) = self.disconnect_source(&target).await {
                warn!(%target, error = %e, "disconnect failed");
            }
        }
    }
}
