// ── Remote channel client ──
//
// Proxies the `Channel` contract to a peer running `serve`. Calls are
// multiplexed over one connection by id; pushed events fan out through a
// broadcast channel so every `open()` stream sees them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frame::{Call, ClientFrame, MAX_FRAME_LEN, Outcome, Payload, ServerFrame};
use crate::channel::{Channel, EventStream};
use crate::error::Error;
use crate::message::{Event, Request};
use crate::value::Attrs;

const EVENT_BUFFER: usize = 4096;

/// What the reader pushes to `open()` streams.
#[derive(Debug, Clone)]
enum Pushed {
    Event(Event),
    Lagged(u64),
}

/// Channel proxied over a byte stream to a remote `serve` loop.
#[derive(Clone)]
pub struct RemoteChannel {
    inner: Arc<Inner>,
}

struct Inner {
    label: String,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Outcome>>,
    outgoing: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<Pushed>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RemoteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChannel")
            .field("label", &self.inner.label)
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl RemoteChannel {
    /// Connect over TCP to `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected to remote channel");
        Ok(Self::from_stream(stream, format!("remote {addr}")))
    }

    /// Run the protocol over an already established stream.
    ///
    /// Spawns the reader and writer tasks, so this must be called from
    /// within a Tokio runtime.
    pub fn from_stream<S>(stream: S, label: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        let (mut sink, mut lines) = framed.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let inner = Arc::new(Inner {
            label: label.into(),
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            outgoing,
            events,
            cancel: cancel.clone(),
        });

        // Writer: drains outgoing frames until closed or cancelled.
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = writer_cancel.cancelled() => break,
                    line = outgoing_rx.recv() => {
                        let Some(line) = line else { break };
                        if let Err(e) = sink.send(line).await {
                            warn!(error = %e, "remote channel write failed");
                            writer_cancel.cancel();
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        // Reader: routes replies to pending calls and events to subscribers.
        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = reader.cancel.cancelled() => break,
                    line = lines.next() => {
                        match line {
                            Some(Ok(line)) => reader.route(&line),
                            Some(Err(e)) => {
                                warn!(label = %reader.label, error = %e, "remote channel read failed");
                                break;
                            }
                            None => {
                                debug!(label = %reader.label, "remote peer closed the connection");
                                break;
                            }
                        }
                    }
                }
            }
            reader.cancel.cancel();
            // Dropping the senders fails every outstanding call with Closed.
            reader.pending.clear();
        });

        Self { inner }
    }

    async fn call(&self, call: Call) -> Result<Payload, Error> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(Error::Closed);
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);

        let line = serde_json::to_string(&ClientFrame::Call { id, call })?;
        if inner.outgoing.send(line).is_err() {
            inner.pending.remove(&id);
            return Err(Error::Closed);
        }

        tokio::select! {
            outcome = rx => outcome.map_err(|_| Error::Closed)?.into_result(),
            () = inner.cancel.cancelled() => {
                inner.pending.remove(&id);
                Err(Error::Closed)
            }
        }
    }
}

impl Inner {
    fn route(&self, line: &str) {
        match serde_json::from_str::<ServerFrame>(line) {
            Ok(ServerFrame::Reply { id, result }) => match self.pending.remove(&id) {
                Some((_, tx)) => {
                    let _ = tx.send(result);
                }
                None => warn!(label = %self.label, id, "reply for unknown call"),
            },
            Ok(ServerFrame::Event { event }) => {
                let _ = self.events.send(Pushed::Event(event));
            }
            Ok(ServerFrame::Lagged { skipped }) => {
                warn!(label = %self.label, skipped, "peer event stream lagged");
                let _ = self.events.send(Pushed::Lagged(skipped));
            }
            Err(e) => warn!(label = %self.label, error = %e, "dropping malformed frame"),
        }
    }
}

fn unexpected(payload: &Payload) -> Error {
    Error::Protocol(format!("unexpected reply payload: {payload:?}"))
}

#[async_trait]
impl Channel for RemoteChannel {
    fn describe(&self) -> String {
        self.inner.label.clone()
    }

    async fn open(&self) -> Result<EventStream, Error> {
        // Subscribe before the server starts forwarding so nothing slips by.
        let rx = self.inner.events.subscribe();
        match self.call(Call::Open).await? {
            Payload::Unit => {}
            other => return Err(unexpected(&other)),
        }

        let label = self.inner.label.clone();
        let cancel = self.inner.cancel.clone();
        let stream = BroadcastStream::new(rx)
            .map(move |item| match item {
                Ok(Pushed::Event(event)) => Ok(event),
                Ok(Pushed::Lagged(skipped)) => Err(Error::Lagged { skipped }),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(label = %label, skipped, "remote event stream lagged");
                    Err(Error::Lagged { skipped })
                }
            })
            .take_until(async move { cancel.cancelled().await });
        Ok(stream.boxed())
    }

    async fn dump(&self) -> Result<Vec<Event>, Error> {
        match self.call(Call::Dump).await? {
            Payload::Events(events) => Ok(events),
            other => Err(unexpected(&other)),
        }
    }

    async fn request(&self, request: Request) -> Result<Attrs, Error> {
        match self.call(Call::Request(request)).await? {
            Payload::Attrs(attrs) => Ok(attrs),
            other => Err(unexpected(&other)),
        }
    }

    async fn close(&self) -> Result<(), Error> {
        if self.inner.cancel.is_cancelled() {
            return Ok(());
        }
        let result = self.call(Call::Close).await;
        self.inner.cancel.cancel();
        match result {
            Ok(_) | Err(Error::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
