//! Configuration commands

use std::path::Path;

use anyhow::{Result, bail};
use rebuildd::config::{Config, LOCAL_CONFIG_FILE};

/// Print the effective configuration
pub fn cmd_config_show(explicit: Option<&Path>) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let config = Config::load(explicit, &cwd)?;

  let local = cwd.join(LOCAL_CONFIG_FILE);
  let user = Config::user_config_path();

  if let Some(path) = explicit {
    println!("Using config: {:?}", path);
  } else if local.exists() {
    println!("Using local config: {:?}", local);
  } else if let Some(user_path) = user.filter(|p| p.exists()) {
    println!("Using user config: {:?}", user_path);
  } else {
    println!("Using default configuration (no config file found)");
  }
  println!();

  println!("{}", toml::to_string_pretty(&config)?);
  Ok(())
}

/// Write a commented config template to ./rebuildd.toml
pub fn cmd_config_init(force: bool) -> Result<()> {
  let path = std::env::current_dir()?.join(LOCAL_CONFIG_FILE);

  if path.exists() && !force {
    bail!("Config file already exists: {:?} (use --force to overwrite)", path);
  }

  std::fs::write(&path, Config::generate_template())?;
  println!("Created config: {:?}", path);
  println!("Edit the file to customize settings.");
  Ok(())
}
