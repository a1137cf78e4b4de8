//! `ndb watch`: print ingested events until interrupted.

use std::time::Duration;

use futures_util::StreamExt;
use ndb_core::{Event, Ndb};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &WatchArgs, ndb: &Ndb, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let mut events = Box::pin(ndb.events());

    let stop = async {
        match args.seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => break,
            item = events.next() => {
                let Some((target, event)) = item else { break };
                if args.kind.is_some_and(|kind| kind != event.kind) {
                    continue;
                }
                output::print_output(&format_event(&target, &event, global.format, color)?, global.quiet);
            }
        }
    }
    Ok(())
}

fn format_event(target: &str, event: &Event, format: OutputFormat, color: bool) -> Result<String, CliError> {
    if format == OutputFormat::Json {
        let mut line = output::json_attrs(target, &event.attrs);
        line.insert("action".into(), event.action.to_string().into());
        line.insert("kind".into(), event.kind.to_string().into());
        return Ok(serde_json::to_string(&line)?);
    }
    let attrs: Vec<String> = event
        .attrs
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    Ok(format!(
        "{} {target} {} {} {}",
        chrono::Local::now().format("%H:%M:%S"),
        output::paint_state(&event.action.to_string(), color),
        event.kind,
        attrs.join(" ")
    ))
}
