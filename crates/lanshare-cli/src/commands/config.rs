//! Config command implementation.

use anyhow::{Context, Result};

use lanshare_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = super::load_config();
            let content =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            print!("{content}");
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Reset => {
            Config::default()
                .save()
                .context("Failed to write configuration")?;
            println!("Configuration reset: {}", Config::config_path().display());
        }
    }
    Ok(())
}
