//! Configuration view and validation commands: `civic config`.

use anyhow::{Result, bail};
use std::path::Path;

use civic_report::config::CivicToml;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    effective: &CivicToml,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("CivicReport Configuration");
            println!("=========================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No civic.toml found at {}; using defaults", config_path.display());
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", toml::to_string_pretty(effective)?);
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No civic.toml found. Using defaults (valid).");
                return Ok(());
            }
            let config = CivicToml::load(config_path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                bail!("{} already exists", config_path.display());
            }
            CivicToml::default().save(config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
