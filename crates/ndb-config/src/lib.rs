//! Shared configuration for the ndb tools.
//!
//! A TOML file plus `NDB_` environment overrides, translated into
//! `ndb_core::NdbConfig` and the list of sources to connect. The core never
//! reads files; the binary loads a [`Config`] here and hands the pieces in.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use ndb_core::{NdbConfig, Storage};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Target used when a command names none.
    pub default_target: String,

    /// SQLite file for the store; in memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// How long a commit waits for a source to confirm one operation.
    pub request_timeout_ms: u64,

    /// Rows read per store lock when iterating a view.
    pub dump_batch: usize,

    pub report: ReportConfig,

    pub log: LogConfig,

    /// Sources connected at startup.
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let core = NdbConfig::default();
        Self {
            sources: vec![SourceConfig::memory(&core.default_target)],
            default_target: core.default_target,
            database: None,
            request_timeout_ms: u64::try_from(core.request_timeout.as_millis()).unwrap_or(u64::MAX),
            dump_batch: core.dump_batch_size,
            report: ReportConfig {
                max_lines: core.max_report_lines,
            },
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Data lines a summary prints before `(...)`.
    pub max_lines: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_lines: NdbConfig::default().max_report_lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when neither `-v` nor `RUST_LOG` is given.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// One source to connect: `memory://` for a fresh simulated namespace, or
/// `tcp://host:port` for a remote proxy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub target: String,
    pub url: String,
}

/// Where a source's channel comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Memory,
    Tcp(String),
}

impl SourceConfig {
    /// A source backed by a fresh in-process namespace.
    pub fn memory(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            url: "memory://".into(),
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let field = || format!("sources.{}.url", self.target);
        let url = Url::parse(&self.url).map_err(|e| invalid(field(), format!("{}: {e}", self.url)))?;
        match url.scheme() {
            "memory" => Ok(Endpoint::Memory),
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid(field(), format!("missing host in {url}")))?;
                let port = url
                    .port()
                    .ok_or_else(|| invalid(field(), format!("missing port in {url}")))?;
                Ok(Endpoint::Tcp(format!("{host}:{port}")))
            }
            other => Err(invalid(
                field(),
                format!("expected 'memory' or 'tcp' scheme, got '{other}'"),
            )),
        }
    }
}

impl Config {
    /// Reject settings the database cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_target.is_empty() {
            return Err(invalid("default_target", "must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be greater than zero"));
        }
        if self.dump_batch == 0 {
            return Err(invalid("dump_batch", "must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.target.is_empty() {
                return Err(invalid("sources.target", "must not be empty"));
            }
            if !seen.insert(source.target.as_str()) {
                return Err(invalid(
                    "sources.target",
                    format!("'{}' is listed more than once", source.target),
                ));
            }
            source.endpoint()?;
        }
        Ok(())
    }

    /// Runtime settings for `ndb_core::Ndb`.
    pub fn to_ndb_config(&self) -> NdbConfig {
        NdbConfig {
            storage: self
                .database
                .clone()
                .map_or(Storage::Memory, Storage::File),
            default_target: self.default_target.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_report_lines: self.report.max_lines,
            dump_batch_size: self.dump_batch,
        }
    }

    pub fn source(&self, target: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.target == target)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "ndb", "ndb").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ndb");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// The layered provider: defaults, then the TOML file, then `NDB_*`
/// environment variables (`__` separates nested keys, e.g.
/// `NDB_LOG__LEVEL=debug`).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NDB_").split("__"))
}

/// Load and validate the config from `path`, or from the platform config
/// path when none is given. A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent
/// directories as needed.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_the_core() {
        let cfg = Config::default();
        let core = cfg.to_ndb_config();
        assert_eq!(core.default_target, "localhost");
        assert_eq!(core.request_timeout, Duration::from_secs(5));
        assert_eq!(core.max_report_lines, 100);
        assert_eq!(core.storage, Storage::Memory);
        assert_eq!(cfg.sources, vec![SourceConfig::memory("localhost")]);
        assert_eq!(cfg.sources[0].endpoint().unwrap(), Endpoint::Memory);
    }

    #[test]
    fn file_then_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "ndb.toml",
                r#"
                default_target = "edge"
                request_timeout_ms = 250

                [report]
                max_lines = 10

                [[sources]]
                target = "edge"
                url = "tcp://10.0.0.1:7700"
                "#,
            )?;
            jail.set_env("NDB_LOG__FORMAT", "json");
            jail.set_env("NDB_REPORT__MAX_LINES", "3");

            let cfg = load_config(Some(Path::new("ndb.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(cfg.default_target, "edge");
            assert_eq!(cfg.request_timeout_ms, 250);
            assert_eq!(cfg.report.max_lines, 3);
            assert_eq!(cfg.log.format, LogFormat::Json);
            assert_eq!(cfg.log.level, "warn");
            assert_eq!(cfg.sources.len(), 1);
            assert_eq!(
                cfg.source("edge").unwrap().endpoint().unwrap(),
                Endpoint::Tcp("10.0.0.1:7700".into())
            );
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let cfg = load_config(Some(Path::new("absent.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(cfg, Config::default());
            Ok(())
        });
    }

    #[test]
    fn database_path_selects_file_storage() {
        let cfg = Config {
            database: Some(PathBuf::from("/var/lib/ndb/ndb.sqlite")),
            ..Config::default()
        };
        assert_eq!(
            cfg.to_ndb_config().storage,
            Storage::File(PathBuf::from("/var/lib/ndb/ndb.sqlite"))
        );
    }

    #[test]
    fn rejects_duplicate_targets_and_bad_urls() {
        let mut cfg = Config::default();
        cfg.sources.push(SourceConfig::memory("localhost"));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Validation { ref field, .. }) if field == "sources.target"
        ));

        let bad = SourceConfig {
            target: "x".into(),
            url: "http://10.0.0.1".into(),
        };
        assert!(bad.endpoint().is_err());

        let no_port = SourceConfig {
            target: "y".into(),
            url: "tcp://10.0.0.1".into(),
        };
        assert!(no_port.endpoint().is_err());

        let garbage = SourceConfig {
            target: "z".into(),
            url: "not a url".into(),
        };
        assert!(garbage.endpoint().is_err());

        let cfg = Config {
            request_timeout_ms: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn saved_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            default_target: "lab".into(),
            sources: vec![SourceConfig::memory("lab")],
            ..Config::default()
        };
        save_config(&cfg, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("default_target = \"lab\""));
        let loaded: Config = Figment::new().merge(Toml::file(&path)).extract().unwrap();
        assert_eq!(loaded, cfg);
    }
}
