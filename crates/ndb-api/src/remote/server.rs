// ── Remote channel server ──
//
// Exposes any `Channel` to one client connection. Calls are processed in
// arrival order; once the client opens the stream, events are forwarded
// through the same writer so replies and events never interleave
// mid-frame.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{Call, ClientFrame, MAX_FRAME_LEN, Outcome, Payload, ServerFrame};
use crate::channel::Channel;
use crate::error::Error;

/// Serve `channel` over `stream` until the client closes, the stream ends,
/// or `cancel` fires. The served channel itself is left open.
pub async fn serve<S>(
    channel: Arc<dyn Channel>,
    stream: S,
    cancel: CancellationToken,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let (mut sink, mut lines) = framed.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let session = cancel.child_token();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(line).await {
                warn!(error = %e, "remote write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut forwarding = false;
    let result = loop {
        let line = tokio::select! {
            biased;
            () = session.cancelled() => break Ok(()),
            line = lines.next() => line,
        };
        let line = match line {
            None => break Ok(()),
            Some(Err(e)) => break Err(Error::from(e)),
            Some(Ok(line)) => line,
        };

        let ClientFrame::Call { id, call } = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed call");
                continue;
            }
        };
        debug!(id, ?call, "remote call");

        let closing = matches!(call, Call::Close);
        let outcome = match call {
            Call::Open if forwarding => Ok(Payload::Unit),
            Call::Open => match channel.open().await {
                Ok(mut events) => {
                    forwarding = true;
                    let tx = tx.clone();
                    let stop = session.clone();
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                biased;
                                () = stop.cancelled() => break,
                                event = events.next() => {
                                    let frame = match event {
                                        None => break,
                                        Some(Ok(event)) => ServerFrame::Event { event },
                                        Some(Err(Error::Lagged { skipped })) => ServerFrame::Lagged { skipped },
                                        Some(Err(e)) => {
                                            warn!(error = %e, "served event stream failed");
                                            break;
                                        }
                                    };
                                    if tx.send(frame).is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                    Ok(Payload::Unit)
                }
                Err(e) => Err(e),
            },
            Call::Dump => channel.dump().await.map(Payload::Events),
            Call::Request(request) => channel.request(request).await.map(Payload::Attrs),
            Call::Close => Ok(Payload::Unit),
        };

        let reply = ServerFrame::Reply {
            id,
            result: Outcome::from_result(outcome),
        };
        if tx.send(reply).is_err() || closing {
            break Ok(());
        }
    };

    session.cancel();
    drop(tx);
    let _ = writer.await;
    result
}

/// Accept connections on `listener` and serve `channel` on each until
/// `cancel` fires.
pub async fn serve_tcp(
    channel: Arc<dyn Channel>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<(), Error> {
    info!(addr = ?listener.local_addr().ok(), channel = %channel.describe(), "serving channel");
    loop {
        let accepted = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (socket, peer) = accepted?;
        if let Err(e) = socket.set_nodelay(true) {
            warn!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        info!(%peer, "client connected");

        let channel = Arc::clone(&channel);
        let token = cancel.child_token();
        tokio::spawn(async move {
            match serve(channel, socket, token).await {
                Ok(()) => info!(%peer, "client disconnected"),
                Err(e) => warn!(%peer, error = %e, "client session failed"),
            }
        });
    }
    Ok(())
}
