//! `ndb add` / `set` / `del`: stage a record and commit it.

use ndb_core::Ndb;
use tracing::info;

use super::util;
use crate::cli::{AddArgs, DelArgs, GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

pub async fn add(args: &AddArgs, ndb: &Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    let mut record = util::view(ndb, args.view)?.add(util::attrs(&args.attrs));
    record.commit().await?;
    info!(record = %record, "created");
    output::print_output(&util::render_record(&record, global.format)?, global.quiet);
    Ok(())
}

pub async fn set(args: &SetArgs, ndb: &Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    let mut record = util::view(ndb, args.view)?.get(util::selector(&args.selector))?;
    for (name, value) in &args.attrs {
        record.set(name.clone(), util::parse_value(value));
    }
    record.commit().await?;
    info!(record = %record, "updated");
    output::print_output(&util::render_record(&record, global.format)?, global.quiet);
    Ok(())
}

pub async fn del(args: &DelArgs, ndb: &Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    let mut record = util::view(ndb, args.view)?.get(util::selector(&args.selector))?;
    let label = record.label();
    record.remove();
    record.commit().await?;
    let cascaded = record.rollback_point().map_or(0, |ops| ops.len().saturating_sub(1));
    info!(record = %label, cascaded, "removed");
    output::print_output(&format!("removed {label}"), global.quiet);
    Ok(())
}
