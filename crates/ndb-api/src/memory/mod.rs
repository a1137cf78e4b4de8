// ── In-process channel ──
//
// `MemoryChannel` exposes a `Namespace` through the `Channel` contract.
// Several channels may attach to one namespace; closing a channel ends
// its streams without touching the namespace.

mod namespace;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use namespace::Namespace;

use crate::channel::{Channel, EventStream};
use crate::error::Error;
use crate::message::{Event, Request};
use crate::value::Attrs;

/// Channel backed by an in-process [`Namespace`].
#[derive(Debug)]
pub struct MemoryChannel {
    namespace: Namespace,
    cancel: CancellationToken,
}

impl MemoryChannel {
    /// Channel over a brand new namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self::attach(&Namespace::new(name))
    }

    /// Channel over an existing namespace.
    pub fn attach(namespace: &Namespace) -> Self {
        Self {
            namespace: namespace.clone(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn describe(&self) -> String {
        format!("memory:{}", self.namespace.name())
    }

    async fn open(&self) -> Result<EventStream, Error> {
        self.ensure_open()?;

        let name = self.namespace.name().to_owned();
        let cancel = self.cancel.clone();
        let stream = BroadcastStream::new(self.namespace.subscribe())
            .map(move |item| match item {
                Ok(event) => Ok(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(namespace = %name, skipped, "event stream lagged");
                    Err(Error::Lagged { skipped })
                }
            })
            .take_until(async move { cancel.cancelled().await });

        Ok(stream.boxed())
    }

    async fn dump(&self) -> Result<Vec<Event>, Error> {
        self.ensure_open()?;
        Ok(self.namespace.snapshot())
    }

    async fn request(&self, request: Request) -> Result<Attrs, Error> {
        self.ensure_open()?;
        self.namespace.execute(&request)
    }

    async fn close(&self) -> Result<(), Error> {
        self.cancel.cancel();
        Ok(())
    }
}
