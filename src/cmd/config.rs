//! Configuration view and validation commands: `steward config`.

use anyhow::Result;
use console::style;
use std::path::Path;

use steward::config::{Config, STATE_DIR};
use steward::exit_codes;
use steward::steward_config::{CONFIG_FILE, StewardToml};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<i32> {
    let steward_dir = project_dir.join(STATE_DIR);
    let config_path = steward_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}; using defaults.", CONFIG_FILE, config_path.display());
            }
            println!();

            let config = Config::new(project_dir, false)?;
            print!("{}", config.toml.to_toml_string()?);
            println!();

            println!("{}", style("Effective values (with env overrides):").bold());
            println!("  repo = {}", config.repo.as_deref().unwrap_or("(from origin remote)"));
            println!("  mainline = \"{}\"", config.mainline);
            println!("  claude_cmd = \"{}\"", config.claude_cmd);
            println!("  model = \"{}\"", config.model);
            println!("  api_url = \"{}\"", config.api_url);
            println!("  mode = {}", config.mode);
            println!(
                "  github_token = {}",
                if config.github_token.is_some() { "set" } else { "not set" }
            );
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(exit_codes::OK);
            }
            let warnings = StewardToml::load(&config_path)?.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(exit_codes::OK);
            }
            std::fs::create_dir_all(&steward_dir)?;
            std::fs::write(&config_path, StewardToml::default().to_toml_string()?)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(exit_codes::OK)
}
