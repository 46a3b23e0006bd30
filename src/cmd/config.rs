//! Configuration view and validation commands: `topomap config`.

use anyhow::Result;

use topomap::config::{AppConfig, TopomapToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &AppConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Topomap Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No topomap.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            println!("Effective values (with env overrides):");
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();

            if !config_path.exists() {
                println!("Run 'topomap config init' to create a topomap.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No topomap.toml found. Using defaults.");
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                println!("topomap.toml already exists at {}", config_path.display());
                println!("Pass --force to overwrite it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            TopomapToml::default().save(config_path)?;

            println!("Created topomap.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [worker] program, args, script_folder, max_concurrent");
            println!("  - [progress] wait_timeout_secs, coalesce_window_ms, delivery_delay_ms");
            println!("  - [server] host, port, dev_mode");
            println!("  - [storage] temp_folder, dtk50_folder, dtk25_folder");
            println!("  - [logging] filter, json, directory");
            println!();
        }
    }

    Ok(())
}
