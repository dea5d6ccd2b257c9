//! statreg server binary.
//!
//! Reads `statreg.toml` (or the path given with `--config`) layered with
//! `STATREG__*` environment variables, opens the SQLite store and the
//! configured search mirror, then either serves the JSON API, runs a bulk
//! import, or resynchronises the mirror.
//!
//! ```text
//! statreg serve
//! statreg import units.jsonl
//! statreg resync --force
//! ```

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use statreg_core::hooks::IdentityContext;
use statreg_server::{app, build_registry, import_lines, load_config};
use tokio::{fs::File, io::BufReader, net::TcpListener};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Statistical business register server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "statreg.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API (the default).
  Serve,
  /// Apply a JSON-lines file of units as one bulk pass.
  Import {
    /// One unit per line, tagged by `kind`.
    file: PathBuf,
  },
  /// Bring the search mirror in line with the store.
  Resync {
    /// Rebuild even when the counts already match.
    #[arg(long)]
    force: bool,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = load_config(cli.config)?;
  let registry = build_registry(&config).await?;

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => {
      if config.index.resync_on_startup {
        match registry.synchronize(false).await {
          Ok(report) => info!(?report, "startup resync finished"),
          Err(e) => warn!(error = %e, "startup resync failed; will retry on first search"),
        }
      }

      let address = format!("{}:{}", config.host, config.port);
      info!("Listening on http://{address}");
      let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
      axum::serve(listener, app(registry)).await.context("server error")?;
    }

    Command::Import { file } => {
      let input = File::open(&file)
        .await
        .with_context(|| format!("failed to open {file:?}"))?;
      let who = IdentityContext::system(config.system_user);
      let summary = import_lines(&registry, who, BufReader::new(input)).await?;
      println!(
        "created {}, edited {}, unchanged {}, failed {}, history rows {}",
        summary.created,
        summary.edited,
        summary.unchanged,
        summary.failed.len(),
        summary.history_rows
      );
      registry.synchronize(false).await.context("post-import resync failed")?;
    }

    Command::Resync { force } => {
      let report = registry.synchronize(force).await.context("resync failed")?;
      println!("{report:?}");
    }
  }

  Ok(())
}
