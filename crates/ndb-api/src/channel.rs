// ── Channel capability ──
//
// One interface over every source of network state. Local namespaces and
// remote proxies implement it identically; the database holds sources as
// `Arc<dyn Channel>` and never inspects the concrete type.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::Error;
use crate::message::{Event, Request};
use crate::value::Attrs;

/// Live event stream returned by [`Channel::open`]. An
/// [`Error::Lagged`] item reports lost events; the stream carries on
/// after it.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Error>> + Send>>;

/// A source of state-change events and a sink for state-change requests.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Short human label for logs (`"memory"`, `"remote 10.0.0.2:7400"`).
    fn describe(&self) -> String;

    /// Attach to the live event stream. Events that happen after this
    /// returns are delivered in source order.
    async fn open(&self) -> Result<EventStream, Error>;

    /// Full current state as a finite sequence of `New` events.
    async fn dump(&self) -> Result<Vec<Event>, Error>;

    /// Apply one mutation. Returns the realized entity: the attributes the
    /// source now holds (or held, for a delete).
    async fn request(&self, request: Request) -> Result<Attrs, Error>;

    /// Release the channel. Open streams end; further calls fail.
    async fn close(&self) -> Result<(), Error>;
}
