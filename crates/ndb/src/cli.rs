//! Clap derive structures for the `ndb` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ndb_core::Kind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ndb -- one relational view of many live network sources
#[derive(Debug, Parser)]
#[command(
    name = "ndb",
    version,
    about = "Query and edit network objects across live sources",
    long_about = "Keeps a relational replica of interfaces, addresses, routes, and\n\
        neighbours for every configured source, and commits record edits back\n\
        to the source that owns them.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "NDB_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Target to operate on (overrides default_target)
    #[arg(long, short = 't', global = true)]
    pub target: Option<String>,

    /// Output format
    #[arg(long, short = 'f', default_value = "table", global = true)]
    pub format: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table of every column
    Table,
    /// Bounded at-a-glance report
    Summary,
    /// Comma separated values, one line per row
    Csv,
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
    /// One label per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a view, or show one entity
    #[command(alias = "ls")]
    Show(ShowArgs),

    /// Create an entity: ndb add interfaces ifname=d0 kind=dummy
    Add(AddArgs),

    /// Change an entity: ndb set interfaces eth0 state=up
    Set(SetArgs),

    /// Remove an entity and everything depending on it
    #[command(alias = "rm")]
    Del(DelArgs),

    /// Run diagnostic SQL against the store
    Query(QueryArgs),

    /// Print ingested events as they arrive
    Watch(WatchArgs),

    /// List connected sources and their state
    Sources,

    /// Expose a fresh simulated namespace over TCP
    Serve(ServeArgs),

    /// Inspect or create the config file
    Config(ConfigArgs),
}

/// Views accept singular or plural names: interface(s)/link,
/// address(es)/addr, route(s), neighbour(s)/neigh.
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// View to list
    pub view: Kind,

    /// Name, index, addr/len, or dst/len of a single entity
    pub selector: Option<String>,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    pub view: Kind,

    /// Attributes as key=value
    #[arg(required = true, value_parser = parse_assignment)]
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    pub view: Kind,

    pub selector: String,

    /// Attributes as key=value
    #[arg(required = true, value_parser = parse_assignment)]
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct DelArgs {
    pub view: Kind,

    pub selector: String,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// SQL statement
    pub sql: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many seconds (default: until interrupted)
    #[arg(long, short = 's')]
    pub seconds: Option<u64>,

    /// Only print events of this kind
    #[arg(long, short = 'k')]
    pub kind: Option<Kind>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, short = 'l', default_value = "127.0.0.1:7700")]
    pub listen: String,

    /// Name of the served namespace
    #[arg(long, default_value = "served")]
    pub name: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Print the effective configuration as TOML
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected key=value, got '{arg}'")),
    }
}
