//! grepmux CLI - serve regex searches over one shared codesearch backend.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use grepmux::{Daemon, RuntimeConfig, config::Config};
use ipc::{Client, ReplyEvent, collect_events};

mod logging;

use logging::init_logging;

#[derive(Parser)]
#[command(name = "grepmux")]
#[command(about = "Multiplexing front end for a shared codesearch backend")]
struct Cli {
  /// Path to the config file (defaults apply if omitted)
  #[arg(short, long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the server
  Serve {
    /// Log to the console instead of the log file
    #[arg(long)]
    foreground: bool,
  },
  /// Run one search against a running server and print the matches
  Search {
    /// Regex to search for
    pattern: String,
    /// Optional path filter regex
    #[arg(short, long)]
    file: Option<String>,
    /// Fail fast instead of waiting for backend readiness
    #[arg(long)]
    fail_fast: bool,
  },
  /// Print the effective configuration
  Config,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = Config::load_or_default(cli.config.as_deref())?;

  match cli.command {
    Commands::Serve { foreground } => {
      let _guard = init_logging(foreground);
      let daemon = Daemon::new(RuntimeConfig { config, foreground });
      daemon.run().await?;
    }
    Commands::Search {
      pattern,
      file,
      fail_fast,
    } => {
      let _guard = init_logging(true);
      cmd_search(&config, &pattern, file.as_deref(), fail_fast).await?;
    }
    Commands::Config => {
      println!("{}", toml_pretty(&config)?);
    }
  }

  Ok(())
}

async fn cmd_search(config: &Config, pattern: &str, file: Option<&str>, fail_fast: bool) -> Result<()> {
  let (client, _ready) = Client::connect(&config.server.listen_addr).await?;

  let rx = if fail_fast {
    client.try_search(pattern, file).await?
  } else {
    client.search(pattern, file).await?
  };

  for event in collect_events(rx).await {
    match event {
      ReplyEvent::Match { items } => {
        for item in items {
          println!("{}:{}:{}", item.path, item.line_number, item.line);
        }
      }
      ReplyEvent::Done { stats } => {
        eprintln!("{} matches in {}ms", stats.matches, stats.elapsed_ms);
      }
      ReplyEvent::Error { error } => {
        anyhow::bail!("search failed: {error}");
      }
      ReplyEvent::NotReady => {
        anyhow::bail!("backend not ready, try again");
      }
      ReplyEvent::Ready => {}
    }
  }

  Ok(())
}

fn toml_pretty(config: &Config) -> Result<String> {
  Ok(toml::to_string_pretty(config)?)
}
