//! `ndb serve`: expose a fresh simulated namespace to remote clients.

use std::sync::Arc;

use ndb_api::{Channel, MemoryChannel, remote};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{GlobalOpts, ServeArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &ServeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let listener = TcpListener::bind(&args.listen).await?;
    let addr = listener.local_addr()?;
    let channel: Arc<dyn Channel> = Arc::new(MemoryChannel::new(args.name.clone()));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        shutdown.cancel();
    });

    output::print_output(
        &format!("serving namespace {} on tcp://{addr}", args.name),
        global.quiet,
    );
    remote::serve_tcp(channel, listener, cancel).await?;
    Ok(())
}
