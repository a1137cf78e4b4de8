// ── Runtime database configuration ──
//
// Describes how the database is set up: where rows live, how long a
// commit waits for its confirming event, and report sizing. Never touches
// disk itself; `ndb-config` (or a test) builds one and hands it in.

use std::path::PathBuf;
use std::time::Duration;

/// Where the relational store keeps its tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Storage {
    /// Non-durable, process-local store.
    #[default]
    Memory,
    /// SQLite database file. Tables are recreated on open.
    File(PathBuf),
}

/// Configuration for one database instance.
#[derive(Debug, Clone)]
pub struct NdbConfig {
    pub storage: Storage,
    /// Target label used by views when none is given.
    pub default_target: String,
    /// How long a commit waits for a source to confirm one operation.
    pub request_timeout: Duration,
    /// Data lines rendered by a summary report before truncating.
    pub max_report_lines: usize,
    /// Rows read per store lock acquisition when iterating a view.
    pub dump_batch_size: usize,
}

impl Default for NdbConfig {
    fn default() -> Self {
        Self {
            storage: Storage::Memory,
            default_target: "localhost".into(),
            request_timeout: Duration::from_secs(5),
            max_report_lines: 100,
            dump_batch_size: 256,
        }
    }
}
