use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use highlight_poller::{
    CheckpointStore, HighlightCallback, Highlight, JsonSpool, Poller, PollerState, PollingConfig,
    ReadwiseSource, ShutdownCoordinator,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    /// Write each delivered batch as a JSON file into this directory.
    #[arg(long, global = true)]
    spool_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll until SIGINT/SIGTERM.
    Run,
    /// Run a single cadence and print the result.
    Once,
    /// Print the persisted checkpoint.
    Status,
    /// Delete the persisted checkpoint.
    Reset,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "highlight_poller=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PollingConfig> {
    let config = match path {
        Some(path) => PollingConfig::from_yaml_file(path)?,
        None => PollingConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build_poller(config: PollingConfig, spool_dir: Option<PathBuf>, cancel: CancellationToken) -> Result<Poller> {
    let source = Arc::new(ReadwiseSource::from_env()?);
    let callback: Arc<dyn HighlightCallback> = match spool_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Spooling highlights to disk");
            Arc::new(JsonSpool::new(dir))
        }
        None => Arc::new(|items: &[Highlight], stats: &PollerState| -> Result<()> {
            for h in items {
                info!(id = h.id, book_id = ?h.book_id, "New highlight: {}", preview(&h.text));
            }
            info!(items = items.len(), total_items = stats.total_items, "Batch delivered");
            Ok(())
        }),
    };
    Ok(Poller::new(config, source, Some(callback), cancel)?)
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(80).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Status => {
            let store = CheckpointStore::new(config.state_file.clone());
            match store.try_load()? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => println!("No checkpoint at {}", store.path().display()),
            }
        }
        Command::Reset => {
            let store = CheckpointStore::new(config.state_file.clone());
            if store.reset()? {
                println!("Removed {}", store.path().display());
            } else {
                println!("Nothing to reset at {}", store.path().display());
            }
        }
        Command::Once => {
            let poller = build_poller(config, args.spool_dir, CancellationToken::new())?;
            let result = poller.poll_once().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Run => {
            info!("Highlight poller v{}", env!("CARGO_PKG_VERSION"));
            let cancel = CancellationToken::new();
            let poller = build_poller(config, args.spool_dir, cancel.clone())?;
            poller.start().await?;

            let coordinator = ShutdownCoordinator::new(poller);
            coordinator
                .listen()
                .await
                .context("Failed to install signal handlers")?;
            cancel.cancel();
        }
    }

    Ok(ExitCode::SUCCESS)
}
