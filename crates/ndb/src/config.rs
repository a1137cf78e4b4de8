//! CLI-aware wrappers over `ndb-config`: flag overrides and opening the
//! configured sources.

use std::path::PathBuf;
use std::sync::Arc;

use ndb_config::{Config, Endpoint};
use ndb_core::{Channel, MemoryChannel, Ndb, RemoteChannel};
use tracing::debug;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file this invocation reads.
pub fn path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(ndb_config::config_path)
}

/// Apply command-line overrides to a loaded config.
pub fn resolve(mut cfg: Config, global: &GlobalOpts) -> Config {
    if let Some(target) = &global.target {
        cfg.default_target.clone_from(target);
    }
    cfg
}

/// Create the database and attach every configured source, waiting for
/// each initial dump.
pub async fn open(cfg: &Config) -> Result<Ndb, CliError> {
    let ndb = Ndb::new(cfg.to_ndb_config())?;
    for source in &cfg.sources {
        let channel: Arc<dyn Channel> = match source.endpoint()? {
            Endpoint::Memory => Arc::new(MemoryChannel::new(source.target.clone())),
            Endpoint::Tcp(addr) => {
                let remote = RemoteChannel::connect(&addr).await.map_err(|e| {
                    CliError::SourceUnreachable {
                        target: source.target.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Arc::new(remote)
            }
        };
        debug!(target = %source.target, url = %source.url, "attaching source");
        ndb.attach(&source.target, channel).await?;
    }
    Ok(ndb)
}
