pub mod config_cmd;
pub mod edit;
pub mod query;
pub mod serve;
pub mod show;
pub mod sources;
pub mod util;
pub mod watch;

use ndb_core::Ndb;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Run a command that needs a connected database.
pub async fn dispatch(cmd: Command, ndb: &Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Show(args) => show::handle(&args, ndb, global),
        Command::Add(args) => edit::add(&args, ndb, global).await,
        Command::Set(args) => edit::set(&args, ndb, global).await,
        Command::Del(args) => edit::del(&args, ndb, global).await,
        Command::Query(args) => query::handle(&args, ndb, global),
        Command::Watch(args) => watch::handle(&args, ndb, global).await,
        Command::Sources => sources::handle(ndb, global),
        Command::Serve(_) | Command::Config(_) => unreachable!("handled before connecting"),
    }
}
