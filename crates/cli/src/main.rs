//! rebuildd - distributed projection rebuild coordinator

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use rebuildd::{
  RuntimeConfig,
  config::{Config, NodeMode},
};

mod client;
mod commands;
mod format;
mod logging;

use client::ApiClient;
use commands::{cmd_config_init, cmd_config_show, cmd_projections, cmd_run, cmd_serve, cmd_status};
use logging::{init_cli_logging, init_node_logging};

#[derive(Parser)]
#[command(name = "rebuildd")]
#[command(about = "Coordinate on-demand projection rebuilds across a cluster")]
#[command(after_help = "\
QUICK START:
  rebuildd serve                  # Run a node
  rebuildd projections            # List projections
  rebuildd run Weather            # Rebuild a projection
  rebuildd status --watch         # Follow rebuild status")]
struct Cli {
  /// Config file (default: ./rebuildd.toml, then the user config)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Node URL for client commands (default: derived from server.bind)
  #[arg(long, global = true, value_name = "URL")]
  url: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
  Disabled,
  Solo,
  HotCold,
}

impl From<ModeArg> for NodeMode {
  fn from(mode: ModeArg) -> Self {
    match mode {
      ModeArg::Disabled => NodeMode::Disabled,
      ModeArg::Solo => NodeMode::Solo,
      ModeArg::HotCold => NodeMode::HotCold,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Run a node in the foreground
  Serve {
    /// Listen address (overrides server.bind)
    #[arg(long)]
    bind: Option<String>,
    /// Processing mode (overrides node.mode)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Node identifier (overrides node.id)
    #[arg(long)]
    node_id: Option<String>,
  },
  /// List projections registered on the node
  Projections {
    #[arg(long)]
    json: bool,
  },
  /// Request a rebuild of one or more projections
  Run {
    /// Projection names
    #[arg(required_unless_present = "all")]
    projections: Vec<String>,
    /// Rebuild every registered projection
    #[arg(long, conflicts_with = "projections")]
    all: bool,
    #[arg(long)]
    json: bool,
  },
  /// Show the current rebuild status
  Status {
    /// Follow status changes until interrupted
    #[arg(short, long)]
    watch: bool,
    #[arg(long)]
    json: bool,
  },
  /// Configuration management
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[derive(Subcommand)]
enum ConfigCommand {
  /// Show the effective configuration
  Show,
  /// Write a config template to ./rebuildd.toml
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let cwd = std::env::current_dir()?;

  // Serving nodes log per config; client commands only warn on stderr
  if !matches!(cli.command, Commands::Serve { .. }) {
    init_cli_logging();
  }

  match cli.command {
    Commands::Serve { bind, mode, node_id } => {
      let mut runtime_config = RuntimeConfig::load(cli.config.as_deref(), &cwd)?;
      if let Some(bind) = bind {
        runtime_config.config.server.bind = bind;
      }
      if let Some(mode) = mode {
        runtime_config.config.node.mode = mode.into();
      }
      if let Some(id) = node_id {
        runtime_config.node = id.into();
      }

      let _guard = init_node_logging(&runtime_config.config.daemon);
      cmd_serve(runtime_config).await
    }
    Commands::Projections { json } => {
      let client = connect(cli.url, cli.config.as_deref(), &cwd)?;
      cmd_projections(&client, json).await
    }
    Commands::Run { projections, all, json } => {
      let client = connect(cli.url, cli.config.as_deref(), &cwd)?;
      cmd_run(&client, &projections, all, json).await
    }
    Commands::Status { watch, json } => {
      let client = connect(cli.url, cli.config.as_deref(), &cwd)?;
      cmd_status(&client, watch, json).await
    }
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(cli.config.as_deref()),
      ConfigCommand::Init { force } => cmd_config_init(force),
    },
  }
}

/// Client for `--url`, or for the node configured in `server.bind`
fn connect(url: Option<String>, config: Option<&Path>, cwd: &Path) -> Result<ApiClient> {
  let url = match url {
    Some(url) => url,
    None => format!("http://{}", Config::load(config, cwd)?.server.bind),
  };
  Ok(ApiClient::new(url))
}
