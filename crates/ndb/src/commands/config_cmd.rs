//! `ndb config`: inspect or create the config file.

use ndb_config::{Config, ConfigError};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(
    args: &ConfigArgs,
    global: &GlobalOpts,
    loaded: Result<Config, ConfigError>,
) -> Result<(), CliError> {
    let path = config::path(global);
    match &args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
        }
        ConfigCommand::Show => {
            let cfg = config::resolve(loaded?, global);
            let text = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            output::print_output(text.trim_end(), global.quiet);
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists (use --force to overwrite)", path.display()),
                });
            }
            ndb_config::save_config(&Config::default(), &path)?;
            output::print_output(&format!("wrote {}", path.display()), global.quiet);
        }
    }
    Ok(())
}
